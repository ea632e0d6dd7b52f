//! HTTP checker implementation.

use super::{tls, Attempt, Check, CheckError, CheckFailure, Completed, RetryPolicy};
use crate::db::CheckResult;
use crate::target::{AuthKind, CheckTarget, Credential};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::AUTHORIZATION;
use reqwest::tls::TlsInfo;
use reqwest::RequestBuilder;
use std::time::Instant;

/// Checks HTTP(S) endpoints with a shared client.
pub struct HttpChecker {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpChecker {
    pub fn new(retry: RetryPolicy) -> Result<Self, CheckError> {
        let client = reqwest::Client::builder()
            .tls_info(true)
            .user_agent(concat!("vigil/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self::with_client(client, retry))
    }

    /// Use a preconfigured client. Certificate expiry is only read when the
    /// client was built with `tls_info(true)`.
    pub fn with_client(client: reqwest::Client, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    /// Run a single HTTP attempt. The request timeout bounds the whole exchange.
    async fn attempt(&self, target: &CheckTarget) -> Attempt {
        let timeout = target.timeout();
        let request = apply_auth(self.client.get(&target.url).timeout(timeout), target.auth.as_ref());

        let start = Instant::now();

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => return Attempt::failed(CheckFailure::classify(&e, timeout)),
        };

        let status = response.status().as_u16();
        let peer_certificate = response
            .extensions()
            .get::<TlsInfo>()
            .and_then(|info| info.peer_certificate())
            .map(<[u8]>::to_vec);

        // Read the full body to measure complete transfer time
        if let Err(e) = response.bytes().await {
            return Attempt::failed(CheckFailure::classify(&e, timeout));
        }

        Attempt::Completed(Completed {
            status,
            elapsed_ms: start.elapsed().as_millis() as u64,
            peer_certificate,
        })
    }
}

#[async_trait]
impl Check for HttpChecker {
    async fn check(&self, target: &CheckTarget) -> Result<CheckResult, CheckError> {
        let checked_at = Utc::now();
        let result = CheckResult::new(&target.name, &target.url, checked_at);

        let mut attempt_no = 1;
        let outcome = loop {
            match self.attempt(target).await {
                Attempt::Transient(failure) if attempt_no < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt_no);
                    tracing::warn!(
                        "Attempt {} failed for {}: {}; retrying in {:?}",
                        attempt_no,
                        target.name,
                        failure,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt_no += 1;
                }
                other => break other,
            }
        };

        let result = match outcome {
            Attempt::Completed(completed) => evaluate(target, result, completed, checked_at),
            Attempt::Transient(failure) => {
                tracing::error!(
                    "Check failed for {} after {} attempts: {}",
                    target.name,
                    attempt_no,
                    failure
                );
                result.failure(failure.to_string())
            }
            Attempt::Permanent(failure) => result.failure(failure.to_string()),
        };

        Ok(result)
    }
}

/// Turn a completed response into a result according to the target policy.
fn evaluate(target: &CheckTarget, result: CheckResult, completed: Completed, checked_at: DateTime<Utc>) -> CheckResult {
    let Completed {
        status,
        elapsed_ms,
        peer_certificate,
    } = completed;

    let mut result = if status != target.expected_status {
        result
            .with_response(status, elapsed_ms)
            .failure(format!("unexpected status {} (expected {})", status, target.expected_status))
    } else if let Some(max) = target.max_response_time_ms.filter(|&max| elapsed_ms > max) {
        result
            .with_response(status, elapsed_ms)
            .failure(format!("slow response: {}ms exceeds {}ms", elapsed_ms, max))
    } else {
        result.success(status, elapsed_ms)
    };

    if target.check_ssl && target.is_https() {
        let days = peer_certificate
            .ok_or(tls::CertificateError::Missing)
            .and_then(|der| tls::days_until_expiry(&der, checked_at));

        result = match days {
            Ok(days) => result.with_ssl_days(days),
            Err(e) => {
                tracing::warn!("Certificate inspection failed for {}: {}", target.name, e);
                result.with_warning(e.to_string())
            }
        };
    }

    result
}

fn apply_auth(request: RequestBuilder, auth: Option<&Credential>) -> RequestBuilder {
    let Some(cred) = auth else {
        return request;
    };

    match cred.kind {
        AuthKind::Bearer => request.bearer_auth(&cred.value),
        AuthKind::Basic => match cred.value.split_once(':') {
            Some((user, password)) => request.basic_auth(user, Some(password)),
            None => request.basic_auth(&cred.value, None::<&str>),
        },
        AuthKind::Header => request.header(AUTHORIZATION, &cred.value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::dns::{Addrs, Name, Resolve, Resolving};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Resolves every name to `addr` (or fails when unset), counting lookups.
    /// Connections are never pooled here, so lookups equal attempts.
    struct CountingResolver {
        calls: AtomicUsize,
        addr: Option<SocketAddr>,
    }

    impl CountingResolver {
        fn new(addr: Option<SocketAddr>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                addr,
            })
        }
    }

    impl Resolve for CountingResolver {
        fn resolve(&self, _name: Name) -> Resolving {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let resolved: Result<Addrs, Box<dyn std::error::Error + Send + Sync>> = match self.addr {
                Some(addr) => Ok(Box::new(std::iter::once(addr))),
                None => Err("no such host".into()),
            };
            Box::pin(async move { resolved })
        }
    }

    fn checker_with(resolver: Arc<CountingResolver>, retry: RetryPolicy) -> HttpChecker {
        let client = reqwest::Client::builder().dns_resolver(resolver).build().unwrap();
        HttpChecker::with_client(client, retry)
    }

    /// Local listener handing each connection to `serve`; returns the number accepted so far.
    async fn raw_listener<F, Fut>(serve: F) -> (SocketAddr, Arc<AtomicUsize>)
    where
        F: Fn(TcpStream) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(stream));
            }
        });
        (addr, accepted)
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_expected_status_is_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let checker = HttpChecker::new(fast_retry(3)).unwrap();
        let target = CheckTarget::new("api", format!("{}/health", server.uri()));
        let result = checker.check(&target).await.unwrap();

        assert!(result.success);
        assert_eq!(result.target_name, "api");
        assert_eq!(result.http_status, Some(200));
        assert!(result.error_message.is_none());
        assert!(result.ssl_days_remaining.is_none());
    }

    #[tokio::test]
    async fn test_status_mismatch_fails_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let checker = HttpChecker::new(fast_retry(3)).unwrap();
        let target = CheckTarget::new("api", server.uri());
        let result = checker.check(&target).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.http_status, Some(503));
        assert_eq!(
            result.error_message.as_deref(),
            Some("unexpected status 503 (expected 200)")
        );
    }

    #[tokio::test]
    async fn test_custom_expected_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let checker = HttpChecker::new(RetryPolicy::none()).unwrap();
        let target = CheckTarget::new("api", server.uri()).with_expected_status(204);
        assert!(checker.check(&target).await.unwrap().success);
    }

    #[tokio::test]
    async fn test_auth_header_is_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("Authorization", "Bearer t0ken"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let checker = HttpChecker::new(RetryPolicy::none()).unwrap();

        let authed = CheckTarget::new("api", server.uri()).with_auth(AuthKind::Bearer, "t0ken");
        assert!(checker.check(&authed).await.unwrap().success);

        let anonymous = CheckTarget::new("api", server.uri());
        let result = checker.check(&anonymous).await.unwrap();
        assert_eq!(result.http_status, Some(401));
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_slow_response_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(150)))
            .mount(&server)
            .await;

        let checker = HttpChecker::new(RetryPolicy::none()).unwrap();
        let target = CheckTarget::new("api", server.uri()).with_max_response_time_ms(50);
        let result = checker.check(&target).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.http_status, Some(200));
        assert!(result.response_time_ms >= 50);
        assert!(result.error_message.unwrap().starts_with("slow response"));
    }

    #[tokio::test]
    async fn test_timeout_is_retried_then_folded_into_one_result() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .expect(3)
            .mount(&server)
            .await;

        let checker = HttpChecker::new(fast_retry(3)).unwrap();
        let target = CheckTarget::new("api", server.uri()).with_timeout_ms(50);
        let result = checker.check(&target).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.response_time_ms, 0);
        assert!(result.http_status.is_none());
        assert!(result.error_message.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_retried() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let resolver = CountingResolver::new(Some(addr));
        let checker = checker_with(resolver.clone(), fast_retry(3));
        let target = CheckTarget::new("gone", "http://gone.test/tls-health").with_timeout_ms(1000);
        let result = checker.check(&target).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.response_time_ms, 0);
        assert!(result.http_status.is_none());
        let message = result.error_message.unwrap();
        assert!(message.starts_with("connection refused"), "{}", message);
        assert!(!message.contains("gone.test"), "{}", message);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_dns_failure_is_not_retried() {
        let resolver = CountingResolver::new(None);
        let checker = checker_with(resolver.clone(), fast_retry(3));
        let target = CheckTarget::new("nowhere", "http://nowhere.test/ssl-expiry").with_timeout_ms(1000);
        let result = checker.check(&target).await.unwrap();

        assert!(!result.success);
        let message = result.error_message.unwrap();
        assert!(message.starts_with("DNS resolution failed"), "{}", message);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_closed_connection_is_retried_as_reset() {
        let (addr, accepted) = raw_listener(|mut stream| async move {
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf).await;
        })
        .await;

        let checker = HttpChecker::new(fast_retry(3)).unwrap();
        let target = CheckTarget::new("flaky", format!("http://{}/tls-status", addr)).with_timeout_ms(1000);
        let result = checker.check(&target).await.unwrap();

        assert!(!result.success);
        let message = result.error_message.unwrap();
        assert!(message.starts_with("connection reset"), "{}", message);
        assert_eq!(accepted.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_tls_handshake_failure_is_not_retried() {
        // Answers the client hello with plain HTTP.
        let (addr, accepted) = raw_listener(|mut stream| async move {
            let mut buf = [0u8; 16 * 1024];
            let _ = stream.read(&mut buf).await;
            let _ = stream
                .write_all(b"HTTP/1.1 400 Bad Request\r\ncontent-length: 0\r\n\r\n")
                .await;
            while matches!(stream.read(&mut buf).await, Ok(n) if n > 0) {}
        })
        .await;

        let checker = HttpChecker::new(fast_retry(3)).unwrap();
        let target = CheckTarget::new("secure", format!("https://{}/", addr))
            .with_ssl_check(true)
            .with_timeout_ms(2000);
        let result = checker.check(&target).await.unwrap();

        assert!(!result.success);
        assert!(result.ssl_days_remaining.is_none());
        let message = result.error_message.unwrap();
        assert!(message.starts_with("TLS error"), "{}", message);
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ssl_flag_ignored_for_plain_http() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let checker = HttpChecker::new(RetryPolicy::none()).unwrap();
        let target = CheckTarget::new("api", server.uri()).with_ssl_check(true);
        let result = checker.check(&target).await.unwrap();

        assert!(result.success);
        assert!(result.ssl_days_remaining.is_none());
        assert!(result.warning.is_none());
    }

    #[test]
    fn test_evaluate_missing_certificate_is_warning_only() {
        let target = CheckTarget::new("secure", "https://secure.example").with_ssl_check(true);
        let now = Utc::now();
        let completed = Completed {
            status: 200,
            elapsed_ms: 12,
            peer_certificate: None,
        };
        let result = evaluate(&target, CheckResult::new("secure", &target.url, now), completed, now);

        assert!(result.success);
        assert!(result.ssl_days_remaining.is_none());
        assert!(result.warning.is_some());
    }
}

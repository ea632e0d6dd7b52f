//! Probe module: executes one verification of one target.
//!
//! A check cycle may make several HTTP attempts, but always yields exactly
//! one [`CheckResult`]. Network failures are part of the result; only
//! faults inside the checker itself surface as [`CheckError`].

mod http;
mod tls;

pub use http::*;
pub use tls::*;

use crate::db::CheckResult;
use crate::target::CheckTarget;

use async_trait::async_trait;
use std::error::Error as StdError;
use std::io::ErrorKind;
use std::time::Duration;
use thiserror::Error;

/// Why a single HTTP attempt did not complete.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckFailure {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection reset: {0}")]
    ConnectionReset(String),
    #[error("connection refused: {0}")]
    ConnectionRefused(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("DNS resolution failed: {0}")]
    Dns(String),
    #[error("TLS error: {0}")]
    Tls(String),
    #[error("request failed: {0}")]
    Request(String),
}

impl CheckFailure {
    /// Transient failures are retried within the same check cycle.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CheckFailure::Timeout(_)
                | CheckFailure::ConnectionReset(_)
                | CheckFailure::ConnectionRefused(_)
                | CheckFailure::Connect(_)
        )
    }

    /// Classify a client error by walking its source chain.
    ///
    /// Only the causes are inspected and reported; the client error's own
    /// message embeds the request URL.
    pub fn classify(err: &reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            return CheckFailure::Timeout(timeout);
        }

        let detail = match err.source() {
            Some(cause) => error_chain(cause),
            None => request_kind(err).to_string(),
        };

        let mut source = err.source();
        while let Some(e) = source {
            if let Some(io) = e.downcast_ref::<std::io::Error>() {
                match io.kind() {
                    ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
                    | ErrorKind::UnexpectedEof => return CheckFailure::ConnectionReset(detail),
                    ErrorKind::ConnectionRefused => return CheckFailure::ConnectionRefused(detail),
                    ErrorKind::TimedOut => return CheckFailure::Timeout(timeout),
                    _ => {}
                }
            }
            if let Some(hyper) = e.downcast_ref::<hyper::Error>() {
                // Peer went away mid-exchange.
                if hyper.is_incomplete_message() || hyper.is_closed() || hyper.is_canceled() {
                    return CheckFailure::ConnectionReset(detail);
                }
            }
            source = e.source();
        }

        let lower = detail.to_lowercase();
        if lower.contains("dns error")
            || lower.contains("failed to lookup address")
            || lower.contains("name or service not known")
        {
            CheckFailure::Dns(detail)
        } else if lower.contains("certificate")
            || lower.contains("tls")
            || lower.contains("ssl")
            || lower.contains("handshake")
        {
            CheckFailure::Tls(detail)
        } else if err.is_connect() {
            CheckFailure::Connect(detail)
        } else {
            CheckFailure::Request(detail)
        }
    }
}

fn request_kind(err: &reqwest::Error) -> &'static str {
    if err.is_builder() {
        "invalid request"
    } else if err.is_redirect() {
        "error following redirect"
    } else if err.is_decode() {
        "error decoding response body"
    } else if err.is_body() {
        "request or response body error"
    } else {
        "error sending request"
    }
}

/// Faults inside the checker that are not a verification outcome.
#[derive(Error, Debug)]
pub enum CheckError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("internal checker error: {0}")]
    Internal(String),
}

/// Executes one check cycle for a target.
#[async_trait]
pub trait Check: Send + Sync {
    async fn check(&self, target: &CheckTarget) -> Result<CheckResult, CheckError>;
}

/// Bounded retry with capped exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per cycle, including the first.
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Outcome of a single HTTP attempt.
#[derive(Debug)]
pub(crate) enum Attempt {
    Completed(Completed),
    Transient(CheckFailure),
    Permanent(CheckFailure),
}

impl Attempt {
    pub(crate) fn failed(failure: CheckFailure) -> Self {
        if failure.is_transient() {
            Attempt::Transient(failure)
        } else {
            Attempt::Permanent(failure)
        }
    }
}

/// A request that produced a response.
#[derive(Debug)]
pub(crate) struct Completed {
    pub status: u16,
    pub elapsed_ms: u64,
    pub peer_certificate: Option<Vec<u8>>,
}

fn error_chain(err: &dyn StdError) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(e) = source {
        let part = e.to_string();
        if !msg.contains(&part) {
            msg.push_str(": ");
            msg.push_str(&part);
        }
        source = e.source();
    }
    msg
}

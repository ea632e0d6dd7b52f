//! Notification channels for alert events.

use crate::db::{AlertEvent, AlertKind};

use async_trait::async_trait;
use std::sync::Arc;

/// Delivers alert events. Delivery failures are reported, never retried here.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Channel name recorded in the alert log.
    fn channel(&self) -> &str;

    async fn notify(&self, event: &AlertEvent) -> Result<(), NotifierError>;
}

/// Human-readable one-line rendering of an event.
pub fn format_message(event: &AlertEvent) -> String {
    let status = match event.kind {
        AlertKind::Down => "DOWN",
        AlertKind::Recovered => "RECOVERED",
        AlertKind::SslExpiring => "SSL WARNING",
    };
    format!(
        "[{}] {} at {}: {}",
        status,
        event.target_name,
        event.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
        event.detail
    )
}

/// Writes alerts to the tracing log.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn channel(&self) -> &str {
        "log"
    }

    async fn notify(&self, event: &AlertEvent) -> Result<(), NotifierError> {
        tracing::warn!(
            target_name = %event.target_name,
            kind = %event.kind,
            "Alert: {}",
            format_message(event)
        );
        Ok(())
    }
}

/// POSTs alerts as JSON to a webhook.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn channel(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, event: &AlertEvent) -> Result<(), NotifierError> {
        let payload = serde_json::json!({
            "target": event.target_name,
            "kind": event.kind,
            "detail": event.detail,
            "message": format_message(event),
            "timestamp": event.timestamp.to_rfc3339(),
        });

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifierError::Webhook(format!("Failed to send webhook: {}", e)))?;

        if !response.status().is_success() {
            return Err(NotifierError::Webhook(format!(
                "Webhook returned status {}",
                response.status()
            )));
        }

        tracing::debug!(
            target_name = %event.target_name,
            url = %self.url,
            "Webhook notification sent"
        );

        Ok(())
    }
}

/// Fans an event out to every configured channel.
#[derive(Default)]
pub struct MultiNotifier {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl MultiNotifier {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self { notifiers }
    }

    pub fn push(&mut self, notifier: Arc<dyn Notifier>) {
        self.notifiers.push(notifier);
    }

    pub fn channels(&self) -> Vec<&str> {
        self.notifiers.iter().map(|n| n.channel()).collect()
    }

    /// Send to all channels and return the ones that delivered.
    ///
    /// Individual failures are logged. Fails only when every channel failed.
    pub async fn deliver(&self, event: &AlertEvent) -> Result<Vec<String>, NotifierError> {
        let mut delivered = Vec::with_capacity(self.notifiers.len());
        let mut errors = Vec::new();

        for notifier in &self.notifiers {
            match notifier.notify(event).await {
                Ok(()) => delivered.push(notifier.channel().to_string()),
                Err(e) => {
                    tracing::error!(
                        target_name = %event.target_name,
                        channel = notifier.channel(),
                        "Failed to deliver alert: {}",
                        e
                    );
                    errors.push(e);
                }
            }
        }

        if delivered.is_empty() && !errors.is_empty() {
            return Err(NotifierError::Multiple(errors));
        }
        Ok(delivered)
    }
}

#[async_trait]
impl Notifier for MultiNotifier {
    fn channel(&self) -> &str {
        "multi"
    }

    async fn notify(&self, event: &AlertEvent) -> Result<(), NotifierError> {
        self.deliver(event).await.map(|_| ())
    }
}

/// Notifier errors
#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("Webhook error: {0}")]
    Webhook(String),

    #[error("Multiple notification failures: {0:?}")]
    Multiple(Vec<NotifierError>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn event() -> AlertEvent {
        AlertEvent {
            target_name: "api".to_string(),
            kind: AlertKind::Down,
            detail: "connection refused".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
        }
    }

    #[test]
    fn test_format_message() {
        assert_eq!(
            format_message(&event()),
            "[DOWN] api at 2024-01-02 03:04:05 UTC: connection refused"
        );
    }

    #[tokio::test]
    async fn test_log_notification() {
        let notifier = LogNotifier;
        assert_eq!(notifier.channel(), "log");
        assert!(notifier.notify(&event()).await.is_ok());
    }

    #[tokio::test]
    async fn test_webhook_delivery() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(serde_json::json!({"target": "api", "kind": "down"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(format!("{}/hook", server.uri()));
        notifier.notify(&event()).await.unwrap();
    }

    #[tokio::test]
    async fn test_webhook_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(server.uri());
        let err = notifier.notify(&event()).await.unwrap_err();
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn test_multi_reports_delivered_channels() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let notifiers: Vec<Arc<dyn Notifier>> = vec![
            Arc::new(LogNotifier),
            Arc::new(WebhookNotifier::new(server.uri())),
        ];
        let multi = MultiNotifier::new(notifiers);
        assert_eq!(multi.channels(), vec!["log", "webhook"]);

        let delivered = multi.deliver(&event()).await.unwrap();
        assert_eq!(delivered, vec!["log".to_string()]);
    }

    #[tokio::test]
    async fn test_multi_fails_when_all_channels_fail() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let multi = MultiNotifier::new(vec![Arc::new(WebhookNotifier::new(server.uri())) as Arc<dyn Notifier>]);
        match multi.deliver(&event()).await {
            Err(NotifierError::Multiple(errors)) => assert_eq!(errors.len(), 1),
            other => panic!("expected Multiple, got {:?}", other),
        }

        assert!(MultiNotifier::default().deliver(&event()).await.unwrap().is_empty());
    }
}

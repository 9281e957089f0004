//! Operational channel notifications

use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;

use crate::errors::OrchestratorError;
use crate::http::client::HttpClient;

/// Sink for alerts the operations team should see
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str) -> Result<(), OrchestratorError>;
}

#[derive(Serialize)]
struct IncomingWebhookMessage<'a> {
    text: &'a str,
}

/// Posts alerts to a Slack-style incoming webhook, or logs them when no
/// webhook is configured
pub struct OpsChannel {
    http: HttpClient,
    webhook_url: Option<String>,
}

impl OpsChannel {
    pub fn new(webhook_url: Option<String>) -> Result<Self, OrchestratorError> {
        let http = HttpClient::new("", None)
            .map_err(|e| OrchestratorError::ConfigError(e.to_string()))?;
        Ok(Self { http, webhook_url })
    }
}

#[async_trait]
impl Notifier for OpsChannel {
    async fn notify(&self, message: &str) -> Result<(), OrchestratorError> {
        let Some(url) = &self.webhook_url else {
            warn!("[ops] {}", message);
            return Ok(());
        };

        self.http
            .post_absolute(url, &IncomingWebhookMessage { text: message })
            .await
            .map_err(|e| OrchestratorError::Internal(format!("ops notification failed: {}", e)))
    }
}

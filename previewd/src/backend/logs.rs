//! Task log pages, filtering and throttle handling

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::errors::OrchestratorError;
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// Line prefixes emitted by the container framework rather than the site
pub const INTERNAL_LOG_MARKERS: &[&str] = &["[container]", "[supervisor]", "[healthcheck]"];

/// Retries after the first throttled attempt
pub const MAX_THROTTLE_RETRIES: u32 = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEvent {
    pub timestamp: Option<DateTime<Utc>>,
    pub message: String,
}

/// A bounded page of application log lines
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogPage {
    pub events: Vec<LogEvent>,
    pub next_token: Option<String>,
}

/// Whether a log line was emitted by the application
pub fn is_application_line(message: &str) -> bool {
    let line = message.trim_start();
    !line.is_empty() && !INTERNAL_LOG_MARKERS.iter().any(|m| line.starts_with(m))
}

/// Run `op`, retrying throttled attempts with increasing backoff
pub async fn retry_throttled<T, F, Fut>(
    cooldown: &CooldownOptions,
    mut op: F,
) -> Result<T, OrchestratorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, OrchestratorError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(e) if e.is_throttling() && attempt < MAX_THROTTLE_RETRIES => {
                let delay = calc_exp_backoff(cooldown, attempt);
                attempt += 1;
                warn!(
                    "Log backend throttled (retry {}/{}), waiting {:?}",
                    attempt, MAX_THROTTLE_RETRIES, delay
                );
                tokio::time::sleep(delay).await;
            }
            result => return result,
        }
    }
}

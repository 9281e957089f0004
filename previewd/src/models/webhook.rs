//! Webhook payloads sent by running containers

use serde::{Deserialize, Serialize};

/// Lifecycle event reported once the container finished booting
pub const INITIALIZED_EVENT: &str = "initialized";

/// Body of `POST /project/{id}/webhook/container/{environment?}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum WebhookPayload {
    LifecycleEvent {
        #[serde(default)]
        event: Option<String>,
    },
    Health {
        #[serde(default)]
        healthy: Option<bool>,
        #[serde(default)]
        fatal: Option<bool>,
        #[serde(default)]
        version: Option<String>,
    },
    Activity,
    SsgState {
        #[serde(default, rename = "ssgState")]
        ssg_state: Option<String>,
        #[serde(default, rename = "ssgRestartNeeded")]
        ssg_restart_needed: Option<bool>,
    },
}

impl WebhookPayload {
    pub fn action(&self) -> &'static str {
        match self {
            Self::LifecycleEvent { .. } => "lifecycleEvent",
            Self::Health { .. } => "health",
            Self::Activity => "activity",
            Self::SsgState { .. } => "ssgState",
        }
    }
}

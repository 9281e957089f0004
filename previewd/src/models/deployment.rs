//! Container deployment state models

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a project environment's container
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    #[default]
    Hibernating,
    Starting,
    Running,
    Restarting,
    Failed,
    Unknown,
}

impl ContainerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hibernating => "hibernating",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Restarting => "restarting",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Opaque reference to a compute unit, backend-specific in representation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskHandle(String);

impl TaskHandle {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Live status of a task as reported by its backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    pub is_running: bool,
    pub healthy: bool,
    /// Stopped on purpose, as opposed to crashed
    pub explicitly_stopped: bool,
}

impl TaskStatus {
    /// Status of a task that never started or was intentionally removed
    pub fn stopped() -> Self {
        Self {
            is_running: false,
            healthy: false,
            explicitly_stopped: true,
        }
    }

    pub fn crashed(&self) -> bool {
        !self.is_running && !self.explicitly_stopped
    }
}

/// Raw network address of a task, used for routing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalAddress {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for ExternalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Deployment state of one project environment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContainerState {
    pub status: Option<ContainerStatus>,
    pub healthy: Option<bool>,
    pub hibernating: bool,
    pub task_handle: Option<TaskHandle>,
    pub new_task_handle: Option<TaskHandle>,
    pub prev_task_handle: Option<TaskHandle>,
    /// Set while an upgrade is in flight
    pub new_task_created_at: Option<DateTime<Utc>>,
    pub last_upgrade_at: Option<DateTime<Utc>>,
    pub url: Option<String>,
    pub internal_url: Option<String>,
    /// Source hostnames registered with the routing service
    pub routes: Vec<String>,
    pub last_activity: Option<DateTime<Utc>>,
    pub lifecycle_event: Option<String>,
    pub version: Option<String>,
    pub ssg_state: Option<String>,
    pub ssg_restart_needed: Option<bool>,
}

impl ContainerState {
    /// Current status, treating unset as hibernating
    pub fn status(&self) -> ContainerStatus {
        self.status.unwrap_or_default()
    }

    pub fn upgrade_in_flight(&self) -> bool {
        self.new_task_created_at.is_some()
    }

    /// Every handle the state still references
    pub fn referenced_handles(&self) -> Vec<&TaskHandle> {
        [&self.task_handle, &self.new_task_handle, &self.prev_task_handle]
            .into_iter()
            .flatten()
            .collect()
    }

    /// Apply a targeted field update
    pub fn apply(&mut self, field: ContainerField) {
        match field {
            ContainerField::Status(v) => self.status = Some(v),
            ContainerField::Healthy(v) => self.healthy = v,
            ContainerField::Hibernating(v) => self.hibernating = v,
            ContainerField::TaskHandle(v) => self.task_handle = v,
            ContainerField::NewTaskHandle(v) => self.new_task_handle = v,
            ContainerField::PrevTaskHandle(v) => self.prev_task_handle = v,
            ContainerField::NewTaskCreatedAt(v) => self.new_task_created_at = v,
            ContainerField::LastUpgradeAt(v) => self.last_upgrade_at = v,
            ContainerField::Url(v) => self.url = v,
            ContainerField::InternalUrl(v) => self.internal_url = v,
            ContainerField::Routes(v) => self.routes = v,
            ContainerField::LastActivity(v) => self.last_activity = v,
            ContainerField::LifecycleEvent(v) => self.lifecycle_event = v,
            ContainerField::Version(v) => self.version = v,
            ContainerField::SsgState(v) => self.ssg_state = v,
            ContainerField::SsgRestartNeeded(v) => self.ssg_restart_needed = v,
        }
    }
}

/// A single targeted update to a [`ContainerState`] field
#[derive(Debug, Clone, PartialEq)]
pub enum ContainerField {
    Status(ContainerStatus),
    Healthy(Option<bool>),
    Hibernating(bool),
    TaskHandle(Option<TaskHandle>),
    NewTaskHandle(Option<TaskHandle>),
    PrevTaskHandle(Option<TaskHandle>),
    NewTaskCreatedAt(Option<DateTime<Utc>>),
    LastUpgradeAt(Option<DateTime<Utc>>),
    Url(Option<String>),
    InternalUrl(Option<String>),
    Routes(Vec<String>),
    LastActivity(Option<DateTime<Utc>>),
    LifecycleEvent(Option<String>),
    Version(Option<String>),
    SsgState(Option<String>),
    SsgRestartNeeded(Option<bool>),
}

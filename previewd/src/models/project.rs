//! Project model (only the fields the orchestrator reads and writes)

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::deployment::ContainerState;

/// Key used in the deployment data map for the unnamed environment
pub const DEFAULT_ENVIRONMENT_KEY: &str = "default";

/// Default inactivity threshold before hibernation
pub const DEFAULT_INACTIVITY_THRESHOLD_MINUTES: u32 = 30;

/// Which execution backend serves a project's previews
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewMode {
    #[default]
    Managed,
    Local,
}

/// Deployment data keyed by backend name, then by environment key
pub type DeploymentData = HashMap<String, HashMap<String, ContainerState>>;

/// A project owning one container deployment per environment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    /// Named environments; empty means the single unnamed default
    #[serde(default)]
    pub environments: Vec<String>,

    #[serde(default)]
    pub preview_mode: PreviewMode,

    #[serde(default)]
    pub inactivity_threshold_minutes: Option<u32>,

    #[serde(default = "default_true")]
    pub should_hibernate: bool,

    /// Projects on a custom theme get operational alerts on failure
    #[serde(default)]
    pub custom_theme: bool,

    #[serde(default)]
    pub deployment_data: DeploymentData,
}

fn default_true() -> bool {
    true
}

impl Project {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            should_hibernate: true,
            ..Default::default()
        }
    }

    /// Environments to operate on; `None` is the unnamed default
    pub fn environment_names(&self) -> Vec<Option<String>> {
        if self.environments.is_empty() {
            vec![None]
        } else {
            self.environments.iter().cloned().map(Some).collect()
        }
    }

    pub fn inactivity_threshold(&self) -> Duration {
        let minutes = self
            .inactivity_threshold_minutes
            .unwrap_or(DEFAULT_INACTIVITY_THRESHOLD_MINUTES);
        Duration::minutes(i64::from(minutes))
    }

    /// Container state of one environment, if any was ever recorded
    pub fn container(&self, backend: &str, environment: Option<&str>) -> Option<&ContainerState> {
        self.deployment_data
            .get(backend)
            .and_then(|envs| envs.get(environment_key(environment)))
    }

    /// Container state of one environment, defaulting when absent
    pub fn container_or_default(&self, backend: &str, environment: Option<&str>) -> ContainerState {
        self.container(backend, environment).cloned().unwrap_or_default()
    }

    pub fn container_mut(&mut self, backend: &str, environment: Option<&str>) -> &mut ContainerState {
        self.deployment_data
            .entry(backend.to_string())
            .or_default()
            .entry(environment_key(environment).to_string())
            .or_default()
    }

    /// All recorded container states for a backend
    pub fn containers(&self, backend: &str) -> Vec<(Option<String>, &ContainerState)> {
        let Some(envs) = self.deployment_data.get(backend) else {
            return Vec::new();
        };
        let mut result: Vec<_> = envs
            .iter()
            .map(|(key, state)| (environment_from_key(key), state))
            .collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }

    /// Most recent activity across every environment of a backend
    pub fn last_activity(&self, backend: &str) -> Option<DateTime<Utc>> {
        self.containers(backend)
            .into_iter()
            .filter_map(|(_, state)| state.last_activity)
            .max()
    }
}

pub fn environment_key(environment: Option<&str>) -> &str {
    environment.unwrap_or(DEFAULT_ENVIRONMENT_KEY)
}

fn environment_from_key(key: &str) -> Option<String> {
    if key == DEFAULT_ENVIRONMENT_KEY {
        None
    } else {
        Some(key.to_string())
    }
}

//! Settings file management

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;

/// Daemon settings, read from `settings.json`
///
/// Secrets are never read from this file; see [`crate::app::options::Secrets`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub json_logs: bool,

    /// Drop the output of local preview processes from the daemon log
    #[serde(default)]
    pub mute_task_output: bool,

    /// Control and webhook HTTP server
    #[serde(default)]
    pub server: ServerSettings,

    /// Public API the containers call back into
    #[serde(default)]
    pub api: ApiSettings,

    /// Routing service
    #[serde(default)]
    pub routing: RoutingSettings,

    /// Managed (cloud scheduler) backend
    #[serde(default)]
    pub managed: ManagedSettings,

    /// Local (spawned process) backend
    #[serde(default)]
    pub local: LocalSettings,

    /// Orchestrator behaviour
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,
}

fn default_true() -> bool {
    true
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8085
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

/// Public API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    /// Base URL containers use for webhooks and config
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
}

fn default_api_base_url() -> String {
    "http://localhost:8085".to_string()
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
        }
    }
}

/// Routing service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingSettings {
    #[serde(default = "default_routing_url")]
    pub base_url: String,

    /// Page hibernating previews redirect to
    #[serde(default = "default_loading_page_url")]
    pub loading_page_url: String,
}

fn default_routing_url() -> String {
    "http://localhost:8090".to_string()
}

fn default_loading_page_url() -> String {
    "https://loading.preview.localhost".to_string()
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            base_url: default_routing_url(),
            loading_page_url: default_loading_page_url(),
        }
    }
}

/// Managed backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedSettings {
    #[serde(default = "default_scheduler_url")]
    pub scheduler_url: String,

    #[serde(default = "default_cluster")]
    pub cluster: String,

    #[serde(default = "default_task_definition")]
    pub task_definition: String,

    #[serde(default = "default_container_name")]
    pub container_name: String,

    #[serde(default = "default_log_group")]
    pub log_group: String,

    /// Domain under which previews are served
    #[serde(default = "default_preview_domain")]
    pub preview_domain: String,

    /// Delay before re-reading a task whose port is not assigned yet
    #[serde(default = "default_port_retry_delay_secs")]
    pub port_retry_delay_secs: u64,

    #[serde(default = "default_log_page_size")]
    pub log_page_size: u32,
}

fn default_scheduler_url() -> String {
    "http://localhost:8070".to_string()
}

fn default_cluster() -> String {
    "previews".to_string()
}

fn default_task_definition() -> String {
    "preview-container".to_string()
}

fn default_container_name() -> String {
    "preview".to_string()
}

fn default_log_group() -> String {
    "/previews/containers".to_string()
}

fn default_preview_domain() -> String {
    "preview.localhost".to_string()
}

fn default_port_retry_delay_secs() -> u64 {
    3
}

fn default_log_page_size() -> u32 {
    100
}

impl Default for ManagedSettings {
    fn default() -> Self {
        Self {
            scheduler_url: default_scheduler_url(),
            cluster: default_cluster(),
            task_definition: default_task_definition(),
            container_name: default_container_name(),
            log_group: default_log_group(),
            preview_domain: default_preview_domain(),
            port_retry_delay_secs: default_port_retry_delay_secs(),
            log_page_size: default_log_page_size(),
        }
    }
}

/// Local backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalSettings {
    /// Program that serves a preview
    #[serde(default = "default_local_command")]
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub working_dir: Option<String>,

    #[serde(default = "default_local_host")]
    pub host: String,

    /// Fixed port of the local preview
    #[serde(default = "default_local_port")]
    pub port: u16,

    #[serde(default = "default_health_path")]
    pub health_path: String,
}

fn default_local_command() -> String {
    "node".to_string()
}

fn default_local_host() -> String {
    "localhost".to_string()
}

fn default_local_port() -> u16 {
    8100
}

fn default_health_path() -> String {
    "/health".to_string()
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            command: default_local_command(),
            args: vec!["container/server.js".to_string()],
            working_dir: None,
            host: default_local_host(),
            port: default_local_port(),
            health_path: default_health_path(),
        }
    }
}

/// Orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    #[serde(default = "default_upgrade_timeout_minutes")]
    pub upgrade_timeout_minutes: i64,

    #[serde(default = "default_unhealthy_recheck_delay_secs")]
    pub unhealthy_recheck_delay_secs: u64,

    /// Refresh the container URL on every upgrade
    #[serde(default)]
    pub always_refresh_url: bool,

    /// Slack-style incoming webhook for operational alerts
    #[serde(default)]
    pub ops_webhook_url: Option<String>,

    #[serde(default = "default_true")]
    pub enable_sweeper: bool,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_upgrade_timeout_minutes() -> i64 {
    15
}

fn default_unhealthy_recheck_delay_secs() -> u64 {
    10
}

fn default_sweep_interval_secs() -> u64 {
    300
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            upgrade_timeout_minutes: default_upgrade_timeout_minutes(),
            unhealthy_recheck_delay_secs: default_unhealthy_recheck_delay_secs(),
            always_refresh_url: false,
            ops_webhook_url: None,
            enable_sweeper: true,
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

//! Application configuration options

use std::time::Duration;

use secrecy::SecretString;
use tracing::warn;

use crate::orchestrator::OrchestratorOptions;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{LocalSettings, ManagedSettings, Settings};
use crate::workers::sweeper;

pub const API_SECRET_ENV: &str = "PREVIEWD_API_SECRET";
pub const ROUTER_TOKEN_ENV: &str = "PREVIEWD_ROUTER_TOKEN";
pub const SCHEDULER_TOKEN_ENV: &str = "PREVIEWD_SCHEDULER_TOKEN";

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage layout paths
    pub layout: StorageLayout,

    /// Server configuration
    pub server: ServerOptions,

    /// Public API base URL handed to containers
    pub api_base_url: String,

    /// Routing service base URL
    pub routing_base_url: String,

    /// Operational alert webhook
    pub ops_webhook_url: Option<String>,

    /// Managed backend settings
    pub managed: ManagedSettings,

    /// Local backend settings
    pub local: LocalSettings,

    /// Orchestrator options
    pub orchestrator: OrchestratorOptions,

    /// Enable the inactivity sweeper
    pub enable_sweeper: bool,

    /// Sweeper worker options
    pub sweeper: sweeper::Options,

    /// Credentials, never read from the settings file
    pub secrets: Secrets,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self::from_settings(StorageLayout::default(), &Settings::default(), Secrets::default())
    }
}

impl AppOptions {
    pub fn from_settings(layout: StorageLayout, settings: &Settings, secrets: Secrets) -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            layout,
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            api_base_url: settings.api.base_url.clone(),
            routing_base_url: settings.routing.base_url.clone(),
            ops_webhook_url: settings.orchestrator.ops_webhook_url.clone(),
            managed: settings.managed.clone(),
            local: settings.local.clone(),
            orchestrator: OrchestratorOptions::from_settings(
                &settings.orchestrator,
                &settings.routing,
            ),
            enable_sweeper: settings.orchestrator.enable_sweeper,
            sweeper: sweeper::Options {
                interval: Duration::from_secs(settings.orchestrator.sweep_interval_secs),
                ..Default::default()
            },
            secrets,
        }
    }
}

/// Lifecycle options for the daemon
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8085,
        }
    }
}

/// Credentials taken from the environment
#[derive(Debug, Clone)]
pub struct Secrets {
    /// Shared secret containers present when calling back
    pub api_secret: SecretString,
    pub router_token: Option<SecretString>,
    pub scheduler_token: Option<SecretString>,
}

impl Default for Secrets {
    fn default() -> Self {
        Self {
            api_secret: SecretString::from(String::new()),
            router_token: None,
            scheduler_token: None,
        }
    }
}

impl Secrets {
    pub fn from_env() -> Self {
        let api_secret = env_secret(API_SECRET_ENV).unwrap_or_else(|| {
            warn!("{} is not set, containers get an empty API secret", API_SECRET_ENV);
            SecretString::from(String::new())
        });

        Self {
            api_secret,
            router_token: env_secret(ROUTER_TOKEN_ENV),
            scheduler_token: env_secret(SCHEDULER_TOKEN_ENV),
        }
    }
}

fn env_secret(name: &str) -> Option<SecretString> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .map(SecretString::from)
}

//! Application state management

use std::sync::Arc;

use tracing::{info, warn};

use crate::app::options::AppOptions;
use crate::backend::environment::TaskEnvOptions;
use crate::backend::local::LocalBackend;
use crate::backend::managed::ManagedBackend;
use crate::backend::{Backends, ExecutionBackend};
use crate::errors::OrchestratorError;
use crate::http::notify::OpsChannel;
use crate::http::routing::RoutingClient;
use crate::http::scheduler::HttpTaskScheduler;
use crate::orchestrator::Orchestrator;
use crate::storage::projects::FileProjectStore;

/// Main application state
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    /// Initialize application state
    pub async fn init(options: &AppOptions) -> Result<Self, OrchestratorError> {
        info!("Initializing application state...");

        options.layout.setup().await?;
        let store = Arc::new(FileProjectStore::open(options.layout.projects_file()).await?);

        let env_options = TaskEnvOptions {
            api_base_url: options.api_base_url.clone(),
            api_secret: options.secrets.api_secret.clone(),
        };

        let scheduler = HttpTaskScheduler::new(
            &options.managed.scheduler_url,
            &options.managed.cluster,
            options.secrets.scheduler_token.clone(),
        )?;
        let managed = Arc::new(ManagedBackend::new(
            Arc::new(scheduler),
            options.managed.clone(),
            env_options.clone(),
        ));
        let local = Arc::new(LocalBackend::new(
            options.local.clone(),
            env_options,
            options.layout.local_tasks_file(),
            options.layout.local_logs_dir(),
        )?);
        let backends = Backends::new(managed, local);

        // reconcile whatever a previous run left behind
        for backend in backends.all() {
            if let Err(e) = backend.initialize_container_environment().await {
                warn!("Failed to initialize {} backend: {}", backend.name(), e);
            }
        }

        let router = Arc::new(RoutingClient::new(
            &options.routing_base_url,
            options.secrets.router_token.clone(),
        )?);
        let notifier = Arc::new(OpsChannel::new(options.ops_webhook_url.clone())?);

        let orchestrator = Orchestrator::new(
            store,
            backends,
            router,
            notifier,
            options.orchestrator.clone(),
        );

        Ok(Self {
            orchestrator: Arc::new(orchestrator),
        })
    }
}

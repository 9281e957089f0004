//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::errors::OrchestratorError;
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::workers::sweeper;

/// Run the preview orchestrator daemon
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), OrchestratorError> {
    info!("Initializing previewd...");

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(&options, shutdown_tx.clone(), &mut shutdown_manager).await {
        error!("Failed to start previewd: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<Arc<AppState>, OrchestratorError> {
    let app_state = Arc::new(AppState::init(options).await?);

    init_server(
        options,
        app_state.clone(),
        shutdown_manager,
        shutdown_tx.subscribe(),
    )
    .await?;

    if options.enable_sweeper {
        init_sweeper_worker(
            options.sweeper.clone(),
            app_state.clone(),
            shutdown_manager,
            shutdown_tx.subscribe(),
        )
        .await?;
    }

    Ok(app_state)
}

async fn init_sweeper_worker(
    options: sweeper::Options,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), OrchestratorError> {
    info!("Initializing sweeper worker...");

    let orchestrator = app_state.orchestrator.clone();

    let sweeper_handle = tokio::spawn(async move {
        sweeper::run(
            &options,
            orchestrator.as_ref(),
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_sweeper_worker_handle(sweeper_handle)?;
    Ok(())
}

async fn init_server(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), OrchestratorError> {
    info!("Initializing HTTP server...");

    let server_state = ServerState::new(app_state.orchestrator.clone());

    let server_handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_server_handle(server_handle)?;
    Ok(())
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    server_handle: Option<JoinHandle<Result<(), OrchestratorError>>>,
    sweeper_worker_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            server_handle: None,
            sweeper_worker_handle: None,
        }
    }

    pub fn with_sweeper_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), OrchestratorError> {
        if self.sweeper_worker_handle.is_some() {
            return Err(OrchestratorError::ShutdownError("sweeper_handle already set".to_string()));
        }
        self.sweeper_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), OrchestratorError>>,
    ) -> Result<(), OrchestratorError> {
        if self.server_handle.is_some() {
            return Err(OrchestratorError::ShutdownError("server_handle already set".to_string()));
        }
        self.server_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), OrchestratorError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), OrchestratorError> {
        info!("Shutting down previewd...");

        // 1. Sweeper worker
        if let Some(handle) = self.sweeper_worker_handle.take() {
            handle.await.map_err(|e| OrchestratorError::ShutdownError(e.to_string()))?;
        }

        // 2. HTTP server
        if let Some(handle) = self.server_handle.take() {
            handle.await.map_err(|e| OrchestratorError::ShutdownError(e.to_string()))??;
        }

        // local preview processes keep running and are adopted on the next start
        info!("Shutdown complete");
        Ok(())
    }
}

//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::OrchestratorError;
use crate::server::handlers::{
    container_logs_handler, container_state_handler, create_container_handler,
    delete_container_handler, environment_webhook_handler, health_handler,
    hibernate_container_handler, put_project_handler, upgrade_container_handler,
    version_handler, webhook_handler,
};
use crate::server::state::ServerState;

/// Build the application router
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Projects
        .route("/project/{id}", put(put_project_handler))
        // Container control
        .route(
            "/project/{id}/container",
            get(container_state_handler)
                .post(create_container_handler)
                .delete(delete_container_handler),
        )
        .route("/project/{id}/container/upgrade", post(upgrade_container_handler))
        .route("/project/{id}/container/hibernate", post(hibernate_container_handler))
        .route("/project/{id}/container/logs", get(container_logs_handler))
        // Container webhooks
        .route("/project/{id}/webhook/container", post(webhook_handler))
        .route(
            "/project/{id}/webhook/container/{environment}",
            post(environment_webhook_handler),
        )
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), OrchestratorError>>, OrchestratorError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| OrchestratorError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| OrchestratorError::ServerError(e.to_string()))
    });

    Ok(handle)
}

//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::errors::OrchestratorError;
use crate::models::project::Project;
use crate::models::webhook::WebhookPayload;
use crate::server::state::ServerState;
use crate::utils::version_info;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for OrchestratorError {
    fn into_response(self) -> Response {
        let status = match &self {
            OrchestratorError::NotFound(_) => StatusCode::NOT_FOUND,
            OrchestratorError::InvalidTaskHandle(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "previewd".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    Json(version_info())
}

/// Acknowledgement body
#[derive(Debug, Serialize)]
pub struct Accepted {
    pub ok: bool,
}

const ACCEPTED: Accepted = Accepted { ok: true };

/// Query selecting one environment
#[derive(Debug, Default, Deserialize)]
pub struct EnvironmentQuery {
    pub environment: Option<String>,
}

/// Container webhook for the default environment
pub async fn webhook_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
    Json(payload): Json<WebhookPayload>,
) -> Result<Json<Accepted>, OrchestratorError> {
    state
        .orchestrator
        .handle_webhook(&project_id, None, payload)
        .await?;
    Ok(Json(ACCEPTED))
}

/// Container webhook for a named environment
pub async fn environment_webhook_handler(
    State(state): State<Arc<ServerState>>,
    Path((project_id, environment)): Path<(String, String)>,
    Json(payload): Json<WebhookPayload>,
) -> Result<Json<Accepted>, OrchestratorError> {
    state
        .orchestrator
        .handle_webhook(&project_id, Some(&environment), payload)
        .await?;
    Ok(Json(ACCEPTED))
}

/// Register or replace a project document, keeping its deployment state
pub async fn put_project_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
    Json(mut project): Json<Project>,
) -> Result<impl IntoResponse, OrchestratorError> {
    let store = state.orchestrator.store();
    project.id = project_id;
    if let Some(existing) = store.get_project(&project.id).await? {
        project.deployment_data = existing.deployment_data;
    }
    store.upsert_project(project.clone()).await?;
    Ok(Json(project))
}

/// Deployment state of one environment
pub async fn container_state_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
    Query(query): Query<EnvironmentQuery>,
) -> Result<impl IntoResponse, OrchestratorError> {
    let container = state
        .orchestrator
        .container_state(&project_id, query.environment.as_deref())
        .await?;
    Ok(Json(container))
}

/// Create a first task for an environment
pub async fn create_container_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
    Query(query): Query<EnvironmentQuery>,
) -> Result<impl IntoResponse, OrchestratorError> {
    let container = state
        .orchestrator
        .create(&project_id, query.environment.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(container)))
}

/// Upgrade one environment, or all of them when none is given
pub async fn upgrade_container_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
    Query(query): Query<EnvironmentQuery>,
) -> Result<Json<Accepted>, OrchestratorError> {
    match query.environment.as_deref() {
        Some(environment) => {
            state
                .orchestrator
                .upgrade_environment(&project_id, Some(environment))
                .await?
        }
        None => state.orchestrator.upgrade(&project_id).await?,
    }
    Ok(Json(ACCEPTED))
}

/// Hibernate one environment, or all of them when none is given
pub async fn hibernate_container_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
    Query(query): Query<EnvironmentQuery>,
) -> Result<Json<Accepted>, OrchestratorError> {
    match query.environment.as_deref() {
        Some(environment) => {
            state
                .orchestrator
                .hibernate_container(&project_id, Some(environment))
                .await?
        }
        None => state.orchestrator.hibernate_all(&project_id).await?,
    }
    Ok(Json(ACCEPTED))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteQuery {
    pub environment: Option<String>,
    #[serde(default)]
    pub suppress_unregister: bool,
}

/// Tear down an environment's tasks
pub async fn delete_container_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> Result<Json<Accepted>, OrchestratorError> {
    state
        .orchestrator
        .delete_container(
            &project_id,
            query.environment.as_deref(),
            query.suppress_unregister,
        )
        .await?;
    Ok(Json(ACCEPTED))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogsQuery {
    pub environment: Option<String>,
    pub next_token: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

/// Logs of the task serving an environment
pub async fn container_logs_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<impl IntoResponse, OrchestratorError> {
    let page = state
        .orchestrator
        .container_logs(
            &project_id,
            query.environment.as_deref(),
            query.next_token.as_deref(),
            query.since,
        )
        .await?;
    Ok(Json(page))
}

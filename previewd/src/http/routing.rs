//! Routing service client

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::OrchestratorError;
use crate::http::client::{ApiError, HttpClient};

/// Mode of a route whose effect is an HTTP redirect
pub const REDIRECT_MODE: &str = "redirect";

/// Body of `POST /api/routes/`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRequest {
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<RouteSettings>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSettings {
    pub mode: String,
}

/// Hostname mappings maintained by the external routing service
#[async_trait]
pub trait RoutingService: Send + Sync {
    /// Proxy `source_host` to `target`; upsert
    async fn register(&self, source_host: &str, target: &str) -> Result<(), OrchestratorError>;

    /// Remove the mapping for `source_host`; a missing mapping is not an error
    async fn unregister(&self, source_host: &str) -> Result<(), OrchestratorError>;

    /// Redirect `source_host` to `target_url`; upsert
    async fn redirect(&self, source_host: &str, target_url: &str) -> Result<(), OrchestratorError>;
}

/// REST client for the routing service
pub struct RoutingClient {
    http: HttpClient,
}

impl RoutingClient {
    pub fn new(base_url: &str, token: Option<SecretString>) -> Result<Self, OrchestratorError> {
        let http = HttpClient::new(base_url, token).map_err(router_error)?;
        Ok(Self { http })
    }

    async fn upsert(&self, request: &RouteRequest) -> Result<(), OrchestratorError> {
        self.http
            .post_no_content("/api/routes/", request)
            .await
            .map_err(router_error)
    }
}

fn router_error(err: ApiError) -> OrchestratorError {
    OrchestratorError::RouterApiError(err.to_string())
}

#[async_trait]
impl RoutingService for RoutingClient {
    async fn register(&self, source_host: &str, target: &str) -> Result<(), OrchestratorError> {
        debug!("Registering route {} -> {}", source_host, target);
        self.upsert(&RouteRequest {
            source: source_host.to_string(),
            target: target.to_string(),
            settings: None,
        })
        .await
    }

    async fn unregister(&self, source_host: &str) -> Result<(), OrchestratorError> {
        debug!("Removing route {}", source_host);
        match self.http.delete(&format!("/api/routes/{}/", source_host)).await {
            Ok(()) => Ok(()),
            Err(e) if e.status() == Some(StatusCode::NOT_FOUND) => {
                debug!("Route {} already absent", source_host);
                Ok(())
            }
            Err(e) => Err(router_error(e)),
        }
    }

    async fn redirect(&self, source_host: &str, target_url: &str) -> Result<(), OrchestratorError> {
        debug!("Redirecting {} -> {}", source_host, target_url);
        self.upsert(&RouteRequest {
            source: source_host.to_string(),
            target: target_url.to_string(),
            settings: Some(RouteSettings {
                mode: REDIRECT_MODE.to_string(),
            }),
        })
        .await
    }
}

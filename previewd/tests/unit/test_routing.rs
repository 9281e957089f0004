//! Routing client tests against an in-process routing service

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{delete, post},
    Json, Router,
};
use secrecy::SecretString;
use tokio::net::TcpListener;

use previewd::errors::OrchestratorError;
use previewd::http::routing::{RouteRequest, RoutingClient, RoutingService, REDIRECT_MODE};

#[derive(Default)]
struct RouteTable {
    routes: Mutex<HashMap<String, RouteRequest>>,
    auth: Mutex<Vec<Option<String>>>,
}

impl RouteTable {
    fn record_auth(&self, headers: &HeaderMap) {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        self.auth.lock().unwrap().push(auth);
    }
}

async fn upsert_route(
    State(table): State<Arc<RouteTable>>,
    headers: HeaderMap,
    Json(request): Json<RouteRequest>,
) -> StatusCode {
    table.record_auth(&headers);
    if request.source == "broken.preview.test" {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    table
        .routes
        .lock()
        .unwrap()
        .insert(request.source.clone(), request);
    StatusCode::CREATED
}

async fn delete_route(
    State(table): State<Arc<RouteTable>>,
    headers: HeaderMap,
    Path(source): Path<String>,
) -> StatusCode {
    table.record_auth(&headers);
    match table.routes.lock().unwrap().remove(&source) {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}

async fn start_routing_service() -> (String, Arc<RouteTable>) {
    let table = Arc::new(RouteTable::default());
    let app = Router::new()
        .route("/api/routes/", post(upsert_route))
        .route("/api/routes/{source}/", delete(delete_route))
        .with_state(table.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), table)
}

#[tokio::test]
async fn test_register_and_unregister() {
    let (base_url, table) = start_routing_service().await;
    let client = RoutingClient::new(&base_url, None).unwrap();

    client
        .register("p1.preview.test", "10.0.0.7:8080")
        .await
        .unwrap();
    assert_eq!(
        table.routes.lock().unwrap().get("p1.preview.test"),
        Some(&RouteRequest {
            source: "p1.preview.test".to_string(),
            target: "10.0.0.7:8080".to_string(),
            settings: None,
        })
    );

    client.unregister("p1.preview.test").await.unwrap();
    assert!(table.routes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_register_is_an_upsert() {
    let (base_url, table) = start_routing_service().await;
    let client = RoutingClient::new(&base_url, None).unwrap();

    client.register("p1.preview.test", "10.0.0.7:8080").await.unwrap();
    client.register("p1.preview.test", "10.0.0.9:8080").await.unwrap();

    let routes = table.routes.lock().unwrap();
    assert_eq!(routes.len(), 1);
    assert_eq!(routes["p1.preview.test"].target, "10.0.0.9:8080");
}

#[tokio::test]
async fn test_unregister_missing_route_is_ok() {
    let (base_url, _table) = start_routing_service().await;
    let client = RoutingClient::new(&base_url, None).unwrap();

    client.unregister("never-registered.preview.test").await.unwrap();
}

#[tokio::test]
async fn test_redirect_sets_redirect_mode() {
    let (base_url, table) = start_routing_service().await;
    let client = RoutingClient::new(&base_url, None).unwrap();

    client
        .redirect("p1.preview.test", "https://loading.preview.test/p1")
        .await
        .unwrap();

    let routes = table.routes.lock().unwrap();
    let route = &routes["p1.preview.test"];
    assert_eq!(route.target, "https://loading.preview.test/p1");
    assert_eq!(route.settings.as_ref().unwrap().mode, REDIRECT_MODE);
}

#[tokio::test]
async fn test_server_error_is_router_error() {
    let (base_url, _table) = start_routing_service().await;
    let client = RoutingClient::new(&base_url, None).unwrap();

    let err = client
        .register("broken.preview.test", "10.0.0.7:8080")
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::RouterApiError(_)));
}

#[tokio::test]
async fn test_bearer_token_is_sent() {
    let (base_url, table) = start_routing_service().await;
    let token = SecretString::from("route-token".to_string());
    let client = RoutingClient::new(&format!("{}/", base_url), Some(token)).unwrap();

    client.register("p1.preview.test", "10.0.0.7:8080").await.unwrap();
    client.unregister("p1.preview.test").await.unwrap();

    let auth = table.auth.lock().unwrap().clone();
    assert_eq!(
        auth,
        vec![
            Some("Bearer route-token".to_string()),
            Some("Bearer route-token".to_string())
        ]
    );
}

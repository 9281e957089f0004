//! Webhook and control API tests

mod common;

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use previewd::models::project::Project;
use previewd::server::serve::router;
use previewd::server::state::ServerState;

use common::Harness;

fn app(h: &Harness) -> Router {
    router(Arc::new(ServerState::new(h.orchestrator.clone())))
}

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn empty_request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn test_health_endpoint() {
    let h = Harness::new(vec![]);
    let (status, body) = send(&app(&h), empty_request(Method::GET, "/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "previewd");
}

#[tokio::test]
async fn test_webhook_for_unknown_project_is_not_found() {
    let h = Harness::new(vec![]);
    let (status, body) = send(
        &app(&h),
        json_request(
            Method::POST,
            "/project/ghost/webhook/container",
            json!({"action": "activity"}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("ghost"));
}

#[tokio::test]
async fn test_malformed_webhook_is_rejected() {
    let h = Harness::new(vec![Project::new("p1")]);
    let app = app(&h);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/project/p1/webhook/container")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        json_request(
            Method::POST,
            "/project/p1/webhook/container",
            json!({"action": "selfDestruct"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_create_then_healthy_webhook() {
    let h = Harness::new(vec![]);
    let app = app(&h);

    let (status, project) = send(
        &app,
        json_request(
            Method::PUT,
            "/project/p1",
            json!({"id": "p1", "environments": ["prod"], "previewMode": "managed"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(project["id"], "p1");

    let (status, container) = send(
        &app,
        empty_request(Method::POST, "/project/p1/container?environment=prod"),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(container["taskHandle"], "H1");
    assert_eq!(container["status"], "starting");

    let (status, body) = send(
        &app,
        json_request(
            Method::POST,
            "/project/p1/webhook/container/prod",
            json!({"action": "health", "healthy": true, "version": "2.0.1"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"ok": true}));

    let (status, container) = send(
        &app,
        empty_request(Method::GET, "/project/p1/container?environment=prod"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(container["status"], "running");
    assert_eq!(container["version"], "2.0.1");
    assert_eq!(container["routes"], json!(["prod--p1.preview.test"]));
}

#[tokio::test]
async fn test_put_project_keeps_deployment_state() {
    let h = Harness::new(vec![Project::new("p1")]);
    let app = app(&h);
    assert!(h.orchestrator.create("p1", None).await.is_ok());

    let (status, project) = send(
        &app,
        json_request(
            Method::PUT,
            "/project/p1",
            json!({"id": "p1", "name": "Renamed", "deploymentData": {}}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(project["name"], "Renamed");
    assert_eq!(
        project["deploymentData"]["managed"]["default"]["taskHandle"],
        "H1"
    );
}

#[tokio::test]
async fn test_upgrade_hibernate_and_delete() {
    let h = Harness::new(vec![Project::new("p1")]);
    let app = app(&h);
    assert!(h.orchestrator.create("p1", None).await.is_ok());

    let (status, _) = send(&app, empty_request(Method::POST, "/project/p1/container/upgrade")).await;
    assert_eq!(status, StatusCode::OK);
    let state = h.state("p1", "managed", None).await;
    assert!(state.new_task_handle.is_some());

    let (status, _) = send(&app, empty_request(Method::POST, "/project/p1/container/hibernate")).await;
    assert_eq!(status, StatusCode::OK);
    let state = h.state("p1", "managed", None).await;
    assert!(state.hibernating);
    assert_eq!(state.task_handle, None);

    let (status, _) = send(
        &app,
        empty_request(Method::DELETE, "/project/p1/container?suppressUnregister=true"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_logs_endpoint() {
    let h = Harness::new(vec![Project::new("p1")]);
    let app = app(&h);

    let (status, _) = send(&app, empty_request(Method::GET, "/project/p1/container/logs")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    assert!(h.orchestrator.create("p1", None).await.is_ok());
    let (status, page) = send(
        &app,
        empty_request(
            Method::GET,
            "/project/p1/container/logs?nextToken=abc&since=2024-01-01T00:00:00Z",
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["events"][0]["message"], "served by H1");
}

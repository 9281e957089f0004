//! Local backend tests with real spawned processes

#![cfg(unix)]

use std::path::Path;
use std::time::Duration;

use axum::{routing::get, Router};
use secrecy::SecretString;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::net::TcpListener;
use tokio_test::assert_ok;

use previewd::backend::environment::TaskEnvOptions;
use previewd::backend::local::LocalBackend;
use previewd::backend::ExecutionBackend;
use previewd::filesys::dir::Dir;
use previewd::filesys::file::File;
use previewd::models::deployment::{TaskHandle, TaskStatus};
use previewd::models::project::Project;
use previewd::storage::settings::LocalSettings;

const UNUSED_PORT: u16 = 18999;

fn settings(script: &str, port: u16) -> LocalSettings {
    LocalSettings {
        command: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
        port,
        ..Default::default()
    }
}

fn backend(dir: &Path, settings: LocalSettings) -> LocalBackend {
    LocalBackend::new(
        settings,
        TaskEnvOptions {
            api_base_url: "http://localhost:8085".to_string(),
            api_secret: SecretString::from("secret".to_string()),
        },
        File::new(dir.join("local-tasks.json")),
        Dir::new(dir.join("logs")),
    )
    .unwrap()
}

fn pid_of(handle: &TaskHandle) -> u32 {
    handle.as_str().split(':').next().unwrap().parse().unwrap()
}

fn process_exists(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system
        .process(pid)
        .is_some_and(|p| p.status() != sysinfo::ProcessStatus::Zombie)
}

/// Serve a health endpoint standing in for the preview's own
async fn start_health_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let app = Router::new().route("/health", get(|| async { "ok" }));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

#[tokio::test]
async fn test_create_spawns_running_process() {
    let dir = tempfile::tempdir().unwrap();
    let backend = backend(dir.path(), settings("exec sleep 30", UNUSED_PORT));

    let handle = assert_ok!(backend.create_task(&Project::new("p1"), None).await);
    assert!(handle.as_str().ends_with(&format!(":{}", UNUSED_PORT)));
    assert!(process_exists(pid_of(&handle)));

    // running, but nothing answers on the port yet
    let status = assert_ok!(backend.get_task(&handle).await);
    assert!(status.is_running);
    assert!(!status.healthy);

    assert_ok!(backend.remove_task(&handle).await);
}

#[tokio::test]
async fn test_running_process_with_health_endpoint_is_healthy() {
    let dir = tempfile::tempdir().unwrap();
    let port = start_health_server().await;
    let backend = backend(dir.path(), settings("exec sleep 30", port));

    let handle = assert_ok!(backend.create_task(&Project::new("p1"), None).await);
    let status = assert_ok!(backend.get_task(&handle).await);
    assert!(status.is_running);
    assert!(status.healthy);

    let url = assert_ok!(
        backend
            .get_container_url(&Project::new("p1"), None, &handle)
            .await
    );
    assert_eq!(url, format!("http://localhost:{}", port));

    assert_ok!(backend.remove_task(&handle).await);
}

#[tokio::test]
async fn test_single_instance() {
    let dir = tempfile::tempdir().unwrap();
    let backend = backend(dir.path(), settings("exec sleep 30", UNUSED_PORT));

    let first = assert_ok!(backend.create_task(&Project::new("a"), None).await);
    let second = assert_ok!(backend.create_task(&Project::new("b"), None).await);

    assert!(!process_exists(pid_of(&first)));
    assert!(process_exists(pid_of(&second)));
    assert_eq!(assert_ok!(backend.get_task(&first).await), TaskStatus::stopped());

    assert_ok!(backend.remove_task(&second).await);
}

#[tokio::test]
async fn test_remove_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let backend = backend(dir.path(), settings("exec sleep 30", UNUSED_PORT));

    let handle = assert_ok!(backend.create_task(&Project::new("p1"), None).await);
    assert_ok!(backend.remove_task(&handle).await);
    assert_ok!(backend.remove_task(&handle).await);

    assert!(!process_exists(pid_of(&handle)));
    let status = assert_ok!(backend.get_task(&handle).await);
    assert_eq!(status, TaskStatus::stopped());

    // never tracked at all
    assert_ok!(backend.remove_task(&TaskHandle::new("999999:8100")).await);
}

#[tokio::test]
async fn test_exited_process_reports_crashed() {
    let dir = tempfile::tempdir().unwrap();
    let backend = backend(dir.path(), settings("exit 3", UNUSED_PORT));

    let handle = assert_ok!(backend.create_task(&Project::new("p1"), None).await);
    tokio::time::sleep(Duration::from_millis(300)).await;

    let status = assert_ok!(backend.get_task(&handle).await);
    assert!(status.crashed());
}

#[tokio::test]
async fn test_task_environment_and_logs() {
    let dir = tempfile::tempdir().unwrap();
    let script = r#"echo "[container] booting"; echo "port=$PORT env=$CONFIG_ENV project=$STACKBIT_PROJECT_ID"; exec sleep 30"#;
    let backend = backend(dir.path(), settings(script, UNUSED_PORT));

    let handle = assert_ok!(
        backend
            .create_task(&Project::new("p1"), Some("staging"))
            .await
    );

    let mut events = Vec::new();
    for _ in 0..40 {
        let page = assert_ok!(backend.get_logs(&handle, None, None).await);
        if !page.events.is_empty() {
            events = page.events;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let messages: Vec<String> = events.into_iter().map(|e| e.message).collect();
    assert_eq!(
        messages,
        vec![format!("port={} env=staging project=p1", UNUSED_PORT)]
    );

    assert_ok!(backend.remove_task(&handle).await);
}

#[tokio::test]
async fn test_restarted_daemon_adopts_live_process() {
    let dir = tempfile::tempdir().unwrap();

    let handle = {
        let first_run = backend(dir.path(), settings("exec sleep 30", UNUSED_PORT));
        assert_ok!(first_run.create_task(&Project::new("p1"), None).await)
    };
    assert!(process_exists(pid_of(&handle)));

    let second_run = backend(dir.path(), settings("exec sleep 30", UNUSED_PORT));
    assert_ok!(second_run.initialize_container_environment().await);

    let status = assert_ok!(second_run.get_task(&handle).await);
    assert!(status.is_running);

    assert_ok!(second_run.remove_task(&handle).await);
    let status = assert_ok!(second_run.get_task(&handle).await);
    assert_eq!(status, TaskStatus::stopped());
}

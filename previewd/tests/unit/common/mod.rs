//! In-memory collaborators shared by the integration tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use previewd::backend::logs::{LogEvent, LogPage};
use previewd::backend::{Backends, ExecutionBackend};
use previewd::errors::OrchestratorError;
use previewd::http::notify::Notifier;
use previewd::http::routing::RoutingService;
use previewd::models::deployment::{ContainerState, ExternalAddress, TaskHandle, TaskStatus};
use previewd::models::project::Project;
use previewd::orchestrator::{Orchestrator, OrchestratorOptions};
use previewd::storage::projects::{MemoryProjectStore, ProjectStore};

pub const RUNNING_HEALTHY: TaskStatus = TaskStatus {
    is_running: true,
    healthy: true,
    explicitly_stopped: false,
};

pub const RUNNING_UNHEALTHY: TaskStatus = TaskStatus {
    is_running: true,
    healthy: false,
    explicitly_stopped: false,
};

pub const CRASHED: TaskStatus = TaskStatus {
    is_running: false,
    healthy: false,
    explicitly_stopped: false,
};

/// Backend handing out `H1`, `H2`, ... and recording every call
pub struct FakeBackend {
    name: &'static str,
    exclusive: bool,
    next_id: AtomicUsize,
    tasks: Mutex<HashMap<String, TaskStatus>>,
    events: Mutex<Vec<String>>,
    failing_removals: Mutex<HashSet<String>>,
}

impl FakeBackend {
    pub fn new(name: &'static str, exclusive: bool) -> Self {
        Self {
            name,
            exclusive,
            next_id: AtomicUsize::new(1),
            tasks: Mutex::new(HashMap::new()),
            events: Mutex::new(Vec::new()),
            failing_removals: Mutex::new(HashSet::new()),
        }
    }

    /// Make every removal of `handle` fail with an infrastructure error
    pub fn fail_removal_of(&self, handle: &str) {
        self.failing_removals
            .lock()
            .unwrap()
            .insert(handle.to_string());
    }

    pub fn set_status(&self, handle: &str, status: TaskStatus) {
        self.tasks
            .lock()
            .unwrap()
            .insert(handle.to_string(), status);
    }

    pub fn is_live(&self, handle: &str) -> bool {
        self.tasks.lock().unwrap().contains_key(handle)
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| e.strip_prefix("remove:").map(|h| h.to_string()))
            .collect()
    }
}

#[async_trait]
impl ExecutionBackend for FakeBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    async fn create_task(
        &self,
        project: &Project,
        _environment: Option<&str>,
    ) -> Result<TaskHandle, OrchestratorError> {
        let id = format!("H{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.set_status(&id, RUNNING_HEALTHY);
        self.events
            .lock()
            .unwrap()
            .push(format!("create:{}", project.id));
        Ok(TaskHandle::new(id))
    }

    async fn remove_task(&self, handle: &TaskHandle) -> Result<(), OrchestratorError> {
        if self.failing_removals.lock().unwrap().contains(handle.as_str()) {
            return Err(OrchestratorError::InfraError(format!(
                "scheduler refused to stop {}",
                handle
            )));
        }
        self.tasks.lock().unwrap().remove(handle.as_str());
        self.events
            .lock()
            .unwrap()
            .push(format!("remove:{}", handle));
        Ok(())
    }

    async fn get_task(&self, handle: &TaskHandle) -> Result<TaskStatus, OrchestratorError> {
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .get(handle.as_str())
            .copied()
            .unwrap_or_else(TaskStatus::stopped))
    }

    async fn get_container_url(
        &self,
        project: &Project,
        environment: Option<&str>,
        _handle: &TaskHandle,
    ) -> Result<String, OrchestratorError> {
        Ok(match environment {
            Some(env) => format!("https://{}--{}.preview.test", env, project.id),
            None => format!("https://{}.preview.test", project.id),
        })
    }

    async fn get_external_address(
        &self,
        _handle: &TaskHandle,
    ) -> Result<Option<ExternalAddress>, OrchestratorError> {
        Ok(Some(ExternalAddress {
            host: "10.0.0.7".to_string(),
            port: 8080,
        }))
    }

    async fn get_logs(
        &self,
        handle: &TaskHandle,
        _page_token: Option<&str>,
        _since: Option<DateTime<Utc>>,
    ) -> Result<LogPage, OrchestratorError> {
        Ok(LogPage {
            events: vec![LogEvent {
                timestamp: None,
                message: format!("served by {}", handle),
            }],
            next_token: None,
        })
    }
}

/// Routing service recording `register`, `unregister` and `redirect` calls
#[derive(Default)]
pub struct FakeRouter {
    calls: Mutex<Vec<(String, String, String)>>,
}

impl FakeRouter {
    pub fn calls(&self) -> Vec<(String, String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_of(&self, op: &str) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter(|(o, _, _)| o == op)
            .map(|(_, source, target)| (source, target))
            .collect()
    }

    fn record(&self, op: &str, source: &str, target: &str) {
        self.calls
            .lock()
            .unwrap()
            .push((op.to_string(), source.to_string(), target.to_string()));
    }
}

#[async_trait]
impl RoutingService for FakeRouter {
    async fn register(&self, source_host: &str, target: &str) -> Result<(), OrchestratorError> {
        self.record("register", source_host, target);
        Ok(())
    }

    async fn unregister(&self, source_host: &str) -> Result<(), OrchestratorError> {
        self.record("unregister", source_host, "");
        Ok(())
    }

    async fn redirect(&self, source_host: &str, target_url: &str) -> Result<(), OrchestratorError> {
        self.record("redirect", source_host, target_url);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeNotifier {
    messages: Mutex<Vec<String>>,
}

impl FakeNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn notify(&self, message: &str) -> Result<(), OrchestratorError> {
        self.messages.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<MemoryProjectStore>,
    pub managed: Arc<FakeBackend>,
    pub local: Arc<FakeBackend>,
    pub router: Arc<FakeRouter>,
    pub notifier: Arc<FakeNotifier>,
}

impl Harness {
    pub fn new(projects: Vec<Project>) -> Self {
        let store = Arc::new(MemoryProjectStore::with_projects(projects));
        let managed = Arc::new(FakeBackend::new("managed", false));
        let local = Arc::new(FakeBackend::new("local", true));
        let router = Arc::new(FakeRouter::default());
        let notifier = Arc::new(FakeNotifier::default());

        let options = OrchestratorOptions {
            unhealthy_recheck_delay: Duration::from_millis(20),
            ..Default::default()
        };
        let orchestrator = Orchestrator::new(
            store.clone(),
            Backends::new(managed.clone(), local.clone()),
            router.clone(),
            notifier.clone(),
            options,
        );

        Self {
            orchestrator: Arc::new(orchestrator),
            store,
            managed,
            local,
            router,
            notifier,
        }
    }

    /// Stored state of one environment on the given backend
    pub async fn state(&self, project_id: &str, backend: &str, environment: Option<&str>) -> ContainerState {
        self.store
            .get_project(project_id)
            .await
            .unwrap()
            .unwrap()
            .container_or_default(backend, environment)
    }
}

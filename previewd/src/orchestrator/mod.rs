//! Preview container orchestration
//!
//! The orchestrator owns every mutation of a project's container deployment
//! state. It asks the project's backend for tasks, persists handles through
//! targeted field updates and keeps the routing service pointed at the task
//! currently serving each environment.

pub mod fsm;
pub mod lock;
mod upgrade;
mod webhook;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::backend::logs::LogPage;
use crate::backend::{Backends, ExecutionBackend};
use crate::errors::OrchestratorError;
use crate::http::notify::Notifier;
use crate::http::routing::RoutingService;
use crate::models::deployment::{ContainerField, ContainerState, TaskHandle};
use crate::models::project::Project;
use crate::orchestrator::fsm::{next_status, ContainerEvent};
use crate::orchestrator::lock::KeyedLock;
use crate::storage::projects::ProjectStore;
use crate::storage::settings::{OrchestratorSettings, RoutingSettings};
use crate::utils::url_host;

/// Orchestrator options
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Age after which an in-flight upgrade counts as failed
    pub upgrade_timeout: chrono::Duration,

    /// Delay before re-checking an unconfirmed unhealthy signal
    pub unhealthy_recheck_delay: Duration,

    /// Refresh the container URL on every upgrade
    pub always_refresh_url: bool,

    /// Page hibernated previews redirect to
    pub loading_page_url: String,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self::from_settings(&OrchestratorSettings::default(), &RoutingSettings::default())
    }
}

impl OrchestratorOptions {
    pub fn from_settings(orchestrator: &OrchestratorSettings, routing: &RoutingSettings) -> Self {
        Self {
            upgrade_timeout: chrono::Duration::minutes(orchestrator.upgrade_timeout_minutes),
            unhealthy_recheck_delay: Duration::from_secs(orchestrator.unhealthy_recheck_delay_secs),
            always_refresh_url: orchestrator.always_refresh_url,
            loading_page_url: routing.loading_page_url.clone(),
        }
    }
}

pub struct Orchestrator {
    store: Arc<dyn ProjectStore>,
    backends: Backends,
    router: Arc<dyn RoutingService>,
    notifier: Arc<dyn Notifier>,
    options: OrchestratorOptions,
    /// Serializes webhook handling per project environment
    webhook_locks: KeyedLock,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ProjectStore>,
        backends: Backends,
        router: Arc<dyn RoutingService>,
        notifier: Arc<dyn Notifier>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            store,
            backends,
            router,
            notifier,
            options,
            webhook_locks: KeyedLock::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ProjectStore> {
        &self.store
    }

    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    async fn load_project(&self, project_id: &str) -> Result<Project, OrchestratorError> {
        self.store
            .get_project(project_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("project {}", project_id)))
    }

    async fn update(
        &self,
        project_id: &str,
        backend: &dyn ExecutionBackend,
        environment: Option<&str>,
        fields: Vec<ContainerField>,
    ) -> Result<Project, OrchestratorError> {
        self.store
            .update_container(project_id, backend.name(), environment, fields)
            .await
    }

    /// Remove an environment's current and pending tasks. When one removal
    /// fails the handles already removed are still cleared before the first
    /// error is returned.
    async fn remove_tasks(
        &self,
        project_id: &str,
        backend: &dyn ExecutionBackend,
        environment: Option<&str>,
        state: &ContainerState,
    ) -> Result<(), OrchestratorError> {
        let mut cleared = Vec::new();
        let mut first_error = None;

        if let Some(handle) = &state.task_handle {
            match backend.remove_task(handle).await {
                Ok(()) => {
                    cleared.push(ContainerField::TaskHandle(None));
                    cleared.push(ContainerField::PrevTaskHandle(Some(handle.clone())));
                }
                Err(e) => {
                    error!("Failed to remove task {}: {}", handle, e);
                    first_error = Some(e);
                }
            }
        }
        if let Some(handle) = &state.new_task_handle {
            match backend.remove_task(handle).await {
                Ok(()) => {
                    cleared.push(ContainerField::NewTaskHandle(None));
                    cleared.push(ContainerField::NewTaskCreatedAt(None));
                }
                Err(e) => {
                    error!("Failed to remove task {}: {}", handle, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        let Some(e) = first_error else {
            return Ok(());
        };
        if !cleared.is_empty() {
            self.update(project_id, backend, environment, cleared).await?;
        }
        Err(e)
    }

    /// Loading page for a hibernated environment
    fn loading_url(&self, project_id: &str, environment: Option<&str>) -> String {
        let base = self.options.loading_page_url.trim_end_matches('/');
        match environment {
            Some(env) => format!("{}/{}?environment={}", base, project_id, env),
            None => format!("{}/{}", base, project_id),
        }
    }

    /// Deployment state of one environment
    pub async fn container_state(
        &self,
        project_id: &str,
        environment: Option<&str>,
    ) -> Result<ContainerState, OrchestratorError> {
        let project = self.load_project(project_id).await?;
        let backend = self.backends.for_project(&project);
        Ok(project.container_or_default(backend.name(), environment))
    }

    /// Create a first task for an environment
    pub async fn create(
        &self,
        project_id: &str,
        environment: Option<&str>,
    ) -> Result<ContainerState, OrchestratorError> {
        let project = self.load_project(project_id).await?;
        let backend = self.backends.for_project(&project);
        if backend.is_exclusive() {
            self.evict_exclusive(&project, environment, backend.as_ref())
                .await?;
        }

        let current = project.container_or_default(backend.name(), environment);
        let handle = backend.create_task(&project, environment).await?;
        let url = backend
            .get_container_url(&project, environment, &handle)
            .await?;
        let status = next_status(current.status(), ContainerEvent::Created)
            .map_err(OrchestratorError::Internal)?;

        let mut fields = vec![
            ContainerField::TaskHandle(Some(handle.clone())),
            ContainerField::Url(Some(url.clone())),
            ContainerField::InternalUrl(Some(url)),
            ContainerField::Hibernating(false),
            ContainerField::Status(status),
        ];

        // a create over live state replaces it
        let stale: Vec<TaskHandle> = [current.task_handle, current.new_task_handle]
            .into_iter()
            .flatten()
            .filter(|h| *h != handle)
            .collect();
        if !stale.is_empty() {
            fields.push(ContainerField::NewTaskHandle(None));
            fields.push(ContainerField::NewTaskCreatedAt(None));
            fields.push(ContainerField::PrevTaskHandle(stale.first().cloned()));
        }

        let updated = self
            .update(project_id, backend.as_ref(), environment, fields)
            .await?;
        info!(
            "Created task {} for project {} ({})",
            handle,
            project_id,
            environment.unwrap_or("default")
        );

        for stale_handle in &stale {
            if let Err(e) = backend.remove_task(stale_handle).await {
                warn!("Failed to remove replaced task {}: {}", stale_handle, e);
            }
        }

        if let Err(e) = backend.initialize_container_environment().await {
            warn!("Failed to initialize {} container environment: {}", backend.name(), e);
        }

        Ok(updated.container_or_default(backend.name(), environment))
    }

    /// Tear down every other deployment on an exclusive backend
    async fn evict_exclusive(
        &self,
        project: &Project,
        environment: Option<&str>,
        backend: &dyn ExecutionBackend,
    ) -> Result<(), OrchestratorError> {
        for other in self.store.list_projects().await? {
            if other.preview_mode != project.preview_mode {
                continue;
            }
            for (other_env, state) in other.containers(backend.name()) {
                let same_target = other.id == project.id && other_env.as_deref() == environment;
                if same_target || (state.task_handle.is_none() && state.new_task_handle.is_none()) {
                    continue;
                }
                info!(
                    "Evicting {} task of project {} for project {}",
                    backend.name(),
                    other.id,
                    project.id
                );
                self.delete_container(&other.id, other_env.as_deref(), false)
                    .await?;
            }
        }
        Ok(())
    }

    /// Stop an environment's tasks and redirect its routes to the loading page
    pub async fn hibernate_container(
        &self,
        project_id: &str,
        environment: Option<&str>,
    ) -> Result<(), OrchestratorError> {
        let project = self.load_project(project_id).await?;
        let backend = self.backends.for_project(&project);
        let state = project.container_or_default(backend.name(), environment);

        let loading_url = self.loading_url(project_id, environment);
        for route in &state.routes {
            if let Err(e) = self.router.redirect(route, &loading_url).await {
                error!("Failed to redirect {} to loading page: {}", route, e);
            }
        }

        // routes were redirected above, so the tasks are removed without unregistering
        self.remove_tasks(project_id, backend.as_ref(), environment, &state)
            .await?;

        let status = next_status(state.status(), ContainerEvent::Hibernated)
            .map_err(OrchestratorError::Internal)?;
        let mut fields = vec![
            ContainerField::Hibernating(true),
            ContainerField::Healthy(None),
            ContainerField::Status(status),
            ContainerField::TaskHandle(None),
            ContainerField::NewTaskHandle(None),
            ContainerField::NewTaskCreatedAt(None),
        ];
        if let Some(removed) = state.task_handle.clone().or(state.new_task_handle.clone()) {
            fields.push(ContainerField::PrevTaskHandle(Some(removed)));
        }

        self.update(project_id, backend.as_ref(), environment, fields)
            .await?;
        info!(
            "Hibernated project {} ({})",
            project_id,
            environment.unwrap_or("default")
        );
        Ok(())
    }

    /// Hibernate every environment of a project
    pub async fn hibernate_all(&self, project_id: &str) -> Result<(), OrchestratorError> {
        let project = self.load_project(project_id).await?;
        for environment in project.environment_names() {
            self.hibernate_container(project_id, environment.as_deref())
                .await?;
        }
        Ok(())
    }

    /// Hibernate a project whose environments have all been idle past its
    /// threshold; returns whether anything was hibernated
    pub async fn check_inactivity(&self, project_id: &str) -> Result<bool, OrchestratorError> {
        let project = self.load_project(project_id).await?;
        if !project.should_hibernate {
            return Ok(false);
        }

        let backend = self.backends.for_project(&project);
        let Some(last_activity) = project.last_activity(backend.name()) else {
            return Ok(false);
        };
        if Utc::now() - last_activity <= project.inactivity_threshold() {
            return Ok(false);
        }

        let awake: Vec<Option<String>> = project
            .containers(backend.name())
            .into_iter()
            .filter(|(_, state)| state.healthy.is_some())
            .map(|(environment, _)| environment)
            .collect();
        if awake.is_empty() {
            return Ok(false);
        }

        info!(
            "Project {} inactive since {}, hibernating {} environment(s)",
            project_id,
            last_activity,
            awake.len()
        );
        for environment in awake {
            if let Err(e) = self
                .hibernate_container(project_id, environment.as_deref())
                .await
            {
                error!("Failed to hibernate project {}: {}", project_id, e);
            }
        }
        Ok(true)
    }

    /// Run the inactivity check over every project; returns how many were hibernated
    pub async fn sweep_inactive(&self) -> Result<usize, OrchestratorError> {
        let mut hibernated = 0;
        for project in self.store.list_projects().await? {
            match self.check_inactivity(&project.id).await {
                Ok(true) => hibernated += 1,
                Ok(false) => {}
                Err(e) => error!("Inactivity check of project {} failed: {}", project.id, e),
            }
        }
        Ok(hibernated)
    }

    /// Remove an environment's tasks and reset its deployment state
    pub async fn delete_container(
        &self,
        project_id: &str,
        environment: Option<&str>,
        suppress_unregister: bool,
    ) -> Result<(), OrchestratorError> {
        let project = self.load_project(project_id).await?;
        let backend = self.backends.for_project(&project);
        let state = project.container_or_default(backend.name(), environment);

        if !suppress_unregister {
            for route in &state.routes {
                if let Err(e) = self.router.unregister(route).await {
                    error!("Failed to unregister route {}: {}", route, e);
                }
            }
        }

        self.remove_tasks(project_id, backend.as_ref(), environment, &state)
            .await?;

        let status = next_status(state.status(), ContainerEvent::Deleted)
            .map_err(OrchestratorError::Internal)?;
        let mut fields = vec![
            ContainerField::TaskHandle(None),
            ContainerField::NewTaskHandle(None),
            ContainerField::NewTaskCreatedAt(None),
            ContainerField::Healthy(None),
            ContainerField::LastActivity(None),
            ContainerField::Hibernating(true),
            ContainerField::Status(status),
        ];
        if let Some(removed) = state.task_handle.clone().or(state.new_task_handle.clone()) {
            fields.push(ContainerField::PrevTaskHandle(Some(removed)));
        }
        if !suppress_unregister {
            fields.push(ContainerField::Routes(Vec::new()));
        }

        self.update(project_id, backend.as_ref(), environment, fields)
            .await?;
        info!(
            "Deleted container of project {} ({})",
            project_id,
            environment.unwrap_or("default")
        );
        Ok(())
    }

    /// Logs of the task currently serving an environment
    pub async fn container_logs(
        &self,
        project_id: &str,
        environment: Option<&str>,
        page_token: Option<&str>,
        since: Option<chrono::DateTime<Utc>>,
    ) -> Result<LogPage, OrchestratorError> {
        let project = self.load_project(project_id).await?;
        let backend = self.backends.for_project(&project);
        let state = project.container_or_default(backend.name(), environment);
        let handle = state.task_handle.or(state.new_task_handle).ok_or_else(|| {
            OrchestratorError::NotFound(format!("no running container for project {}", project_id))
        })?;

        backend.get_logs(&handle, page_token, since).await
    }

    /// Point every routed hostname of an environment at `handle`; returns the
    /// hostnames now registered
    async fn register_routes(
        &self,
        backend: &dyn ExecutionBackend,
        state: &ContainerState,
        handle: &TaskHandle,
    ) -> Result<Option<Vec<String>>, OrchestratorError> {
        let Some(address) = backend.get_external_address(handle).await? else {
            debug!("Backend {} has no routable address", backend.name());
            return Ok(None);
        };

        let target = address.to_string();
        let mut routes = Vec::new();
        for source in routed_hosts(state) {
            match self.router.register(&source, &target).await {
                Ok(()) => {
                    debug!("Routed {} to {}", source, target);
                    routes.push(source);
                }
                Err(e) => error!("Failed to route {} to {}: {}", source, target, e),
            }
        }
        Ok(Some(routes))
    }
}

/// Hostnames the routing service should map to an environment's task
fn routed_hosts(state: &ContainerState) -> Vec<String> {
    let mut hosts: Vec<String> = state.url.as_deref().and_then(url_host).into_iter().collect();
    for route in &state.routes {
        if !hosts.contains(route) {
            hosts.push(route.clone());
        }
    }
    hosts
}

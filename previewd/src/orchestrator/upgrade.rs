//! Zero-downtime upgrades and unhealthy task handling

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::backend::ExecutionBackend;
use crate::errors::OrchestratorError;
use crate::models::deployment::{ContainerField, ContainerState, ContainerStatus, TaskHandle};
use crate::models::project::{environment_key, Project};
use crate::orchestrator::fsm::{next_status, ContainerEvent};
use crate::orchestrator::Orchestrator;

impl Orchestrator {
    /// Upgrade every environment of a project concurrently
    pub async fn upgrade(&self, project_id: &str) -> Result<(), OrchestratorError> {
        let project = self.load_project(project_id).await?;
        let environments = project.environment_names();

        let results = join_all(
            environments
                .iter()
                .map(|env| self.upgrade_environment(project_id, env.as_deref())),
        )
        .await;

        let mut first_error = None;
        for (env, result) in environments.iter().zip(results) {
            if let Err(e) = result {
                error!(
                    "Upgrade of project {} ({}) failed: {}",
                    project_id,
                    environment_key(env.as_deref()),
                    e
                );
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Start a replacement task; the swap happens once it reports healthy
    pub async fn upgrade_environment(
        &self,
        project_id: &str,
        environment: Option<&str>,
    ) -> Result<(), OrchestratorError> {
        let project = self.load_project(project_id).await?;
        let backend = self.backends.for_project(&project);

        self.update(
            project_id,
            backend.as_ref(),
            environment,
            vec![ContainerField::NewTaskCreatedAt(Some(Utc::now()))],
        )
        .await?;

        if backend.is_exclusive() {
            self.evict_exclusive(&project, environment, backend.as_ref())
                .await?;
        }
        let handle = backend.create_task(&project, environment).await?;

        let project = self.load_project(project_id).await?;
        let state = project.container_or_default(backend.name(), environment);

        if let Some(pending) = state.new_task_handle.as_ref().filter(|h| **h != handle) {
            info!("Dropping superseded upgrade task {}", pending);
            if let Err(e) = backend.remove_task(pending).await {
                warn!("Failed to remove superseded task {}: {}", pending, e);
            }
        }

        let now = Utc::now();
        let status = next_status(
            state.status(),
            ContainerEvent::UpgradeStarted {
                replacing: state.task_handle.is_some(),
            },
        )
        .map_err(OrchestratorError::Internal)?;

        let mut fields = vec![
            ContainerField::NewTaskHandle(Some(handle.clone())),
            ContainerField::NewTaskCreatedAt(Some(now)),
            ContainerField::LastUpgradeAt(Some(now)),
            ContainerField::Hibernating(false),
            ContainerField::LastActivity(None),
            ContainerField::Status(status),
        ];
        if state.internal_url.is_none() || self.options.always_refresh_url {
            let url = backend
                .get_container_url(&project, environment, &handle)
                .await?;
            fields.push(ContainerField::Url(Some(url.clone())));
            fields.push(ContainerField::InternalUrl(Some(url)));
        }

        self.update(project_id, backend.as_ref(), environment, fields)
            .await?;
        info!(
            "Upgrade of project {} ({}) started with task {}",
            project_id,
            environment_key(environment),
            handle
        );
        Ok(())
    }

    /// Swap in the pending task if it is the one reporting healthy
    pub(super) async fn complete_upgrade(
        &self,
        project: &Project,
        backend: &dyn ExecutionBackend,
        environment: Option<&str>,
        state: &ContainerState,
        new_handle: &TaskHandle,
        version: Option<String>,
    ) -> Result<(), OrchestratorError> {
        let task = backend.get_task(new_handle).await?;
        if !task.healthy {
            // the old task reported; the new one is still booting
            self.update(
                &project.id,
                backend,
                environment,
                vec![ContainerField::Healthy(Some(true))],
            )
            .await?;
            return Ok(());
        }

        let status = match next_status(state.status(), ContainerEvent::UpgradeCompleted) {
            Ok(status) => status,
            Err(e) => {
                warn!("Ignoring upgrade completion for project {}: {}", project.id, e);
                return Ok(());
            }
        };

        let routes = self.register_routes(backend, state, new_handle).await?;

        let mut fields = vec![
            ContainerField::TaskHandle(Some(new_handle.clone())),
            ContainerField::NewTaskHandle(None),
            ContainerField::NewTaskCreatedAt(None),
            ContainerField::Status(status),
            ContainerField::Healthy(Some(true)),
            ContainerField::Hibernating(false),
        ];
        if let Some(previous) = &state.task_handle {
            fields.push(ContainerField::PrevTaskHandle(Some(previous.clone())));
        }
        if let Some(version) = version {
            fields.push(ContainerField::Version(Some(version)));
        }
        if let Some(routes) = routes {
            fields.push(ContainerField::Routes(routes));
        }

        self.update(&project.id, backend, environment, fields).await?;
        info!(
            "Project {} ({}) now served by task {}",
            project.id,
            environment_key(environment),
            new_handle
        );

        if let Some(previous) = &state.task_handle {
            if let Err(e) = backend.remove_task(previous).await {
                warn!("Failed to remove previous task {}: {}", previous, e);
            }
        }
        Ok(())
    }

    /// React to an unhealthy or fatal health signal
    pub(super) async fn handle_unhealthy(
        self: &Arc<Self>,
        project: &Project,
        backend: &dyn ExecutionBackend,
        environment: Option<&str>,
        state: &ContainerState,
        fatal: bool,
    ) -> Result<(), OrchestratorError> {
        if state.upgrade_in_flight() || (fatal && state.status() == ContainerStatus::Starting) {
            return self
                .resolve_failed_upgrade(project, backend, environment, state, fatal)
                .await;
        }

        if fatal {
            info!("Fatal health signal from project {}, upgrading", project.id);
            return self.upgrade_environment(&project.id, environment).await;
        }

        let Some(current) = state.task_handle.clone() else {
            debug!("Project {} has no current task", project.id);
            return Ok(());
        };

        self.update(
            &project.id,
            backend,
            environment,
            vec![ContainerField::Healthy(Some(false))],
        )
        .await?;

        if backend.get_task(&current).await?.crashed() {
            info!("Task {} crashed, upgrading project {}", current, project.id);
            return self.upgrade_environment(&project.id, environment).await;
        }

        self.schedule_recheck(&project.id, environment, current);
        Ok(())
    }

    async fn resolve_failed_upgrade(
        &self,
        project: &Project,
        backend: &dyn ExecutionBackend,
        environment: Option<&str>,
        state: &ContainerState,
        fatal: bool,
    ) -> Result<(), OrchestratorError> {
        let timed_out = state
            .new_task_created_at
            .is_some_and(|created| Utc::now() - created > self.options.upgrade_timeout);
        let mut upgrade_failed = fatal || timed_out;

        if !upgrade_failed {
            if let Some(new_handle) = &state.new_task_handle {
                upgrade_failed = backend.get_task(new_handle).await?.crashed();
            }
        }
        if !upgrade_failed {
            debug!("Upgrade of project {} still in progress", project.id);
            return Ok(());
        }

        let old_healthy = match &state.task_handle {
            Some(handle) => backend.get_task(handle).await?.healthy,
            None => false,
        };

        if !old_healthy {
            warn!(
                "Upgrade of project {} ({}) failed with no healthy task left",
                project.id,
                environment_key(environment)
            );
            self.hibernate_container(&project.id, environment).await?;
            let status = next_status(ContainerStatus::Hibernating, ContainerEvent::Failed)
                .map_err(OrchestratorError::Internal)?;
            self.update(
                &project.id,
                backend,
                environment,
                vec![ContainerField::Status(status)],
            )
            .await?;

            if project.custom_theme {
                let message = format!(
                    "Preview container of project {} ({}) failed to start",
                    project.id,
                    environment_key(environment)
                );
                if let Err(e) = self.notifier.notify(&message).await {
                    error!("Failed to notify ops channel: {}", e);
                }
            }
            return Ok(());
        }

        info!(
            "Aborting upgrade of project {} ({}), old task still healthy",
            project.id,
            environment_key(environment)
        );
        if let Some(new_handle) = &state.new_task_handle {
            if let Err(e) = backend.remove_task(new_handle).await {
                warn!("Failed to remove failed upgrade task {}: {}", new_handle, e);
            }
        }
        let status = next_status(state.status(), ContainerEvent::UpgradeAborted)
            .map_err(OrchestratorError::Internal)?;
        self.update(
            &project.id,
            backend,
            environment,
            vec![
                ContainerField::NewTaskHandle(None),
                ContainerField::NewTaskCreatedAt(None),
                ContainerField::Status(status),
            ],
        )
        .await?;
        Ok(())
    }

    fn schedule_recheck(self: &Arc<Self>, project_id: &str, environment: Option<&str>, handle: TaskHandle) {
        let this = self.clone();
        let project_id = project_id.to_string();
        let environment = environment.map(|e| e.to_string());
        let delay = self.options.unhealthy_recheck_delay;

        debug!("Re-checking task {} in {:?}", handle, delay);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = this
                .recheck_unhealthy(&project_id, environment.as_deref(), &handle)
                .await
            {
                error!("Health re-check of project {} failed: {}", project_id, e);
            }
        });
    }

    /// Second look at a task that reported unhealthy
    async fn recheck_unhealthy(
        &self,
        project_id: &str,
        environment: Option<&str>,
        handle: &TaskHandle,
    ) -> Result<(), OrchestratorError> {
        let _guard = self.webhook_locks.lock(&lock_key(project_id, environment)).await;

        let project = self.load_project(project_id).await?;
        let backend = self.backends.for_project(&project);
        let state = project.container_or_default(backend.name(), environment);
        if state.task_handle.as_ref() != Some(handle) || state.upgrade_in_flight() {
            debug!("State of project {} moved on, skipping re-check", project_id);
            return Ok(());
        }

        let task = backend.get_task(handle).await?;
        if !task.healthy || task.crashed() {
            info!(
                "Task {} still unhealthy, upgrading project {}",
                handle, project_id
            );
            return self.upgrade_environment(project_id, environment).await;
        }
        Ok(())
    }
}

/// Key serializing work on one project environment
pub(super) fn lock_key(project_id: &str, environment: Option<&str>) -> String {
    format!("{}/{}", project_id, environment_key(environment))
}

//! Container webhook reconciliation

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info};

use crate::backend::ExecutionBackend;
use crate::errors::OrchestratorError;
use crate::models::deployment::{ContainerField, ContainerState, ContainerStatus};
use crate::models::project::{environment_key, Project};
use crate::models::webhook::{WebhookPayload, INITIALIZED_EVENT};
use crate::orchestrator::fsm::{next_status, ContainerEvent};
use crate::orchestrator::upgrade::lock_key;
use crate::orchestrator::Orchestrator;

impl Orchestrator {
    /// Apply a webhook sent by a running container
    ///
    /// Only an unknown project is reported back; reconciliation failures are
    /// logged, as the container cannot act on them.
    pub async fn handle_webhook(
        self: &Arc<Self>,
        project_id: &str,
        environment: Option<&str>,
        payload: WebhookPayload,
    ) -> Result<(), OrchestratorError> {
        let _guard = self.webhook_locks.lock(&lock_key(project_id, environment)).await;

        let project = self.load_project(project_id).await?;
        let backend = self.backends.for_project(&project);
        let state = project.container_or_default(backend.name(), environment);
        let action = payload.action();
        debug!(
            "Webhook {} from project {} ({})",
            action,
            project_id,
            environment_key(environment)
        );

        let result = match payload {
            WebhookPayload::LifecycleEvent { event } => {
                self.on_lifecycle_event(&project, backend.as_ref(), environment, &state, event)
                    .await
            }
            WebhookPayload::Health {
                healthy,
                fatal,
                version,
            } => {
                self.on_health(
                    &project,
                    backend.as_ref(),
                    environment,
                    &state,
                    healthy,
                    fatal.unwrap_or(false),
                    version,
                )
                .await
            }
            WebhookPayload::Activity => self
                .update(
                    project_id,
                    backend.as_ref(),
                    environment,
                    vec![ContainerField::LastActivity(Some(Utc::now()))],
                )
                .await
                .map(|_| ()),
            WebhookPayload::SsgState {
                ssg_state,
                ssg_restart_needed,
            } => self
                .update(
                    project_id,
                    backend.as_ref(),
                    environment,
                    vec![
                        ContainerField::SsgState(ssg_state),
                        ContainerField::SsgRestartNeeded(ssg_restart_needed),
                    ],
                )
                .await
                .map(|_| ()),
        };

        if let Err(e) = result {
            error!(
                "Failed to handle {} webhook of project {}: {}",
                action, project_id, e
            );
        }
        Ok(())
    }

    async fn on_lifecycle_event(
        &self,
        project: &Project,
        backend: &dyn ExecutionBackend,
        environment: Option<&str>,
        state: &ContainerState,
        event: Option<String>,
    ) -> Result<(), OrchestratorError> {
        let initialized = event.as_deref() == Some(INITIALIZED_EVENT);
        self.update(
            &project.id,
            backend,
            environment,
            vec![
                ContainerField::LifecycleEvent(event),
                ContainerField::LastActivity(Some(Utc::now())),
            ],
        )
        .await?;

        if !initialized || !state.routes.is_empty() {
            return Ok(());
        }
        let Some(handle) = &state.task_handle else {
            return Ok(());
        };
        if let Some(routes) = self.register_routes(backend, state, handle).await? {
            self.update(
                &project.id,
                backend,
                environment,
                vec![ContainerField::Routes(routes)],
            )
            .await?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn on_health(
        self: &Arc<Self>,
        project: &Project,
        backend: &dyn ExecutionBackend,
        environment: Option<&str>,
        state: &ContainerState,
        healthy: Option<bool>,
        fatal: bool,
        version: Option<String>,
    ) -> Result<(), OrchestratorError> {
        match healthy {
            Some(true) if !fatal => {
                if let Some(new_handle) = &state.new_task_handle {
                    self.complete_upgrade(project, backend, environment, state, new_handle, version)
                        .await?;
                } else {
                    self.on_steady_healthy(project, backend, environment, state, version)
                        .await?;
                }
                if let Err(e) = self.check_inactivity(&project.id).await {
                    error!("Inactivity check of project {} failed: {}", project.id, e);
                }
                Ok(())
            }
            Some(false) | Some(true) => {
                self.handle_unhealthy(project, backend, environment, state, fatal)
                    .await
            }
            None if fatal => {
                self.handle_unhealthy(project, backend, environment, state, fatal)
                    .await
            }
            None => {
                debug!("Health webhook of project {} without a verdict", project.id);
                Ok(())
            }
        }
    }

    async fn on_steady_healthy(
        &self,
        project: &Project,
        backend: &dyn ExecutionBackend,
        environment: Option<&str>,
        state: &ContainerState,
        version: Option<String>,
    ) -> Result<(), OrchestratorError> {
        let status = match next_status(state.status(), ContainerEvent::Healthy) {
            Ok(status) => status,
            Err(e) => {
                debug!("Ignoring stale health signal of project {}: {}", project.id, e);
                return Ok(());
            }
        };

        let mut fields = vec![
            ContainerField::Healthy(Some(true)),
            ContainerField::Status(status),
        ];
        if let Some(version) = version {
            fields.push(ContainerField::Version(Some(version)));
        }

        // first healthy signal of a fresh task: make sure traffic reaches it
        if state.status() != ContainerStatus::Running {
            if let Some(handle) = &state.task_handle {
                if let Some(routes) = self.register_routes(backend, state, handle).await? {
                    fields.push(ContainerField::Routes(routes));
                }
            }
            info!(
                "Project {} ({}) is running",
                project.id,
                environment_key(environment)
            );
        }

        self.update(&project.id, backend, environment, fields).await?;
        Ok(())
    }
}

//! Managed backend: previews run as tasks on the cloud scheduler

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::backend::environment::{build_task_environment, TaskEnvOptions};
use crate::backend::logs::{is_application_line, retry_throttled, LogEvent, LogPage};
use crate::backend::ExecutionBackend;
use crate::errors::OrchestratorError;
use crate::http::scheduler::{
    EnvironmentVariable, LogQuery, RunTaskRequest, TaskDescription, TaskScheduler,
};
use crate::models::deployment::{ExternalAddress, TaskHandle, TaskStatus};
use crate::models::project::Project;
use crate::storage::settings::ManagedSettings;
use crate::utils::{short_id, CooldownOptions};

pub const BACKEND_NAME: &str = "managed";

const STOP_REASON: &str = "preview container removed";

pub struct ManagedBackend {
    scheduler: Arc<dyn TaskScheduler>,
    settings: ManagedSettings,
    env_options: TaskEnvOptions,
    log_cooldown: CooldownOptions,
    /// Reachable address per physical host
    hosts: RwLock<HashMap<String, String>>,
}

impl ManagedBackend {
    pub fn new(
        scheduler: Arc<dyn TaskScheduler>,
        settings: ManagedSettings,
        env_options: TaskEnvOptions,
    ) -> Self {
        Self {
            scheduler,
            settings,
            env_options,
            log_cooldown: CooldownOptions::default(),
            hosts: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_log_cooldown(mut self, cooldown: CooldownOptions) -> Self {
        self.log_cooldown = cooldown;
        self
    }

    fn container_name(&self, project_id: &str) -> String {
        format!("{}-{}-{}", self.settings.container_name, project_id, short_id())
    }

    fn log_stream(&self, task_id: &str) -> String {
        let name = &self.settings.container_name;
        format!("{}/{}/{}", name, name, task_id)
    }

    async fn host_address(&self, host_id: &str) -> Result<String, OrchestratorError> {
        if let Some(address) = self.hosts.read().await.get(host_id) {
            return Ok(address.clone());
        }

        let host = self.scheduler.describe_host(host_id).await?;
        let instance = self.scheduler.describe_instance(&host.instance_id).await?;
        let address = instance.reachable_address().ok_or_else(|| {
            OrchestratorError::InfraError(format!(
                "instance {} has no reachable address",
                instance.instance_id
            ))
        })?;

        debug!("Resolved host {} to {}", host_id, address);
        self.hosts
            .write()
            .await
            .insert(host_id.to_string(), address.to_string());
        Ok(address.to_string())
    }

    /// Describe a task, retrying once if its port is not bound yet
    async fn describe_with_port(
        &self,
        handle: &TaskHandle,
    ) -> Result<(TaskDescription, u16), OrchestratorError> {
        for attempt in 0..2 {
            let task = self
                .scheduler
                .describe_task(handle.as_str())
                .await?
                .ok_or_else(|| OrchestratorError::TaskNotFound(handle.to_string()))?;

            if let Some(port) = task.host_port {
                return Ok((task, port));
            }
            if attempt == 0 {
                debug!("Task {} has no port yet, retrying", handle);
                tokio::time::sleep(Duration::from_secs(self.settings.port_retry_delay_secs)).await;
            }
        }
        Err(OrchestratorError::InfraError(format!(
            "task {} has no port assigned",
            handle
        )))
    }
}

#[async_trait]
impl ExecutionBackend for ManagedBackend {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    async fn create_task(
        &self,
        project: &Project,
        environment: Option<&str>,
    ) -> Result<TaskHandle, OrchestratorError> {
        let container_name = self.container_name(&project.id);
        let environment_vars =
            build_task_environment(&self.env_options, &project.id, environment, &container_name)
                .into_iter()
                .map(|(name, value)| EnvironmentVariable { name, value })
                .collect();

        let request = RunTaskRequest {
            task_definition: self.settings.task_definition.clone(),
            container_name: container_name.clone(),
            started_by: project.id.clone(),
            environment: environment_vars,
        };

        let task_id = self.scheduler.run_task(request).await?;
        info!("Started task {} ({}) for project {}", task_id, container_name, project.id);
        Ok(TaskHandle::new(task_id))
    }

    async fn remove_task(&self, handle: &TaskHandle) -> Result<(), OrchestratorError> {
        match self.scheduler.stop_task(handle.as_str(), STOP_REASON).await {
            Ok(()) => {
                info!("Stopped task {}", handle);
                Ok(())
            }
            Err(e) if e.is_task_not_found() => {
                debug!("Task {} already gone", handle);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn get_task(&self, handle: &TaskHandle) -> Result<TaskStatus, OrchestratorError> {
        if handle.as_str().is_empty() {
            return Ok(TaskStatus::stopped());
        }

        let Some(task) = self.scheduler.describe_task(handle.as_str()).await? else {
            return Ok(TaskStatus::stopped());
        };
        // not placed yet, nothing to reach
        if task.host_port.is_none() {
            debug!("Task {} has no port bound yet", handle);
            return Ok(TaskStatus::stopped());
        }

        Ok(TaskStatus {
            is_running: task.is_running(),
            healthy: task.is_running() && task.is_healthy(),
            explicitly_stopped: task.stopped_by_user(),
        })
    }

    async fn get_container_url(
        &self,
        project: &Project,
        environment: Option<&str>,
        _handle: &TaskHandle,
    ) -> Result<String, OrchestratorError> {
        let prefix = environment
            .map(|env| format!("{}--", env))
            .unwrap_or_default();
        Ok(format!(
            "https://{}{}.{}",
            prefix, project.id, self.settings.preview_domain
        ))
    }

    async fn get_external_address(
        &self,
        handle: &TaskHandle,
    ) -> Result<Option<ExternalAddress>, OrchestratorError> {
        let (task, port) = self.describe_with_port(handle).await?;
        let host_id = task.host_id.ok_or_else(|| {
            OrchestratorError::InfraError(format!("task {} is not placed on a host", handle))
        })?;

        let host = self.host_address(&host_id).await?;
        Ok(Some(ExternalAddress { host, port }))
    }

    async fn get_logs(
        &self,
        handle: &TaskHandle,
        page_token: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<LogPage, OrchestratorError> {
        let query = LogQuery {
            group: self.settings.log_group.clone(),
            stream: self.log_stream(handle.as_str()),
            next_token: page_token.map(|t| t.to_string()),
            start_time: since.map(|t| t.timestamp_millis()),
            limit: self.settings.log_page_size,
        };

        let page = retry_throttled(&self.log_cooldown, || self.scheduler.get_log_events(&query))
            .await
            .inspect_err(|e| warn!("Failed to fetch logs of task {}: {}", handle, e))?;

        let events = page
            .events
            .into_iter()
            .filter(|event| is_application_line(&event.message))
            .map(|event| LogEvent {
                timestamp: DateTime::from_timestamp_millis(event.timestamp),
                message: event.message,
            })
            .collect();

        Ok(LogPage {
            events,
            next_token: page.next_token,
        })
    }
}

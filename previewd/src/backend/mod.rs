//! Backend execution services
//!
//! A preview runs either as a task on the managed cloud scheduler or as a
//! locally spawned process. Both implement [`ExecutionBackend`]; the project's
//! preview mode picks one through [`Backends::for_project`].

pub mod environment;
pub mod local;
pub mod logs;
pub mod managed;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::backend::logs::LogPage;
use crate::errors::OrchestratorError;
use crate::models::deployment::{ExternalAddress, TaskHandle, TaskStatus};
use crate::models::project::{PreviewMode, Project};

/// Capability set shared by every execution backend
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Key of this backend in a project's deployment data
    fn name(&self) -> &'static str;

    /// Whether at most one task of this backend may run process-wide
    fn is_exclusive(&self) -> bool {
        false
    }

    /// Allocate a new compute unit; does not wait for it to become healthy
    async fn create_task(
        &self,
        project: &Project,
        environment: Option<&str>,
    ) -> Result<TaskHandle, OrchestratorError>;

    /// Remove a task; an already-gone task is not an error
    async fn remove_task(&self, handle: &TaskHandle) -> Result<(), OrchestratorError>;

    async fn get_task(&self, handle: &TaskHandle) -> Result<TaskStatus, OrchestratorError>;

    /// Externally advertised URL, stable per environment
    async fn get_container_url(
        &self,
        project: &Project,
        environment: Option<&str>,
        handle: &TaskHandle,
    ) -> Result<String, OrchestratorError>;

    /// Raw network address for the routing service, when the backend has one
    async fn get_external_address(
        &self,
        _handle: &TaskHandle,
    ) -> Result<Option<ExternalAddress>, OrchestratorError> {
        Ok(None)
    }

    async fn get_logs(
        &self,
        handle: &TaskHandle,
        page_token: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<LogPage, OrchestratorError>;

    /// Reconcile backend-local state left over from a previous run
    async fn initialize_container_environment(&self) -> Result<(), OrchestratorError> {
        Ok(())
    }
}

/// The backends available to the orchestrator
#[derive(Clone)]
pub struct Backends {
    pub managed: Arc<dyn ExecutionBackend>,
    pub local: Arc<dyn ExecutionBackend>,
}

impl Backends {
    pub fn new(managed: Arc<dyn ExecutionBackend>, local: Arc<dyn ExecutionBackend>) -> Self {
        Self { managed, local }
    }

    pub fn for_mode(&self, mode: PreviewMode) -> Arc<dyn ExecutionBackend> {
        match mode {
            PreviewMode::Managed => self.managed.clone(),
            PreviewMode::Local => self.local.clone(),
        }
    }

    pub fn for_project(&self, project: &Project) -> Arc<dyn ExecutionBackend> {
        self.for_mode(project.preview_mode)
    }

    pub fn all(&self) -> [Arc<dyn ExecutionBackend>; 2] {
        [self.managed.clone(), self.local.clone()]
    }
}

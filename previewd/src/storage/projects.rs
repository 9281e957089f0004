//! Project store

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::errors::OrchestratorError;
use crate::filesys::file::File;
use crate::models::deployment::ContainerField;
use crate::models::project::Project;

/// Persistence boundary for projects and their deployment state
///
/// Container state is only ever mutated through targeted field updates.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn get_project(&self, project_id: &str) -> Result<Option<Project>, OrchestratorError>;

    async fn list_projects(&self) -> Result<Vec<Project>, OrchestratorError>;

    async fn upsert_project(&self, project: Project) -> Result<(), OrchestratorError>;

    /// Apply field updates to one environment's container state and return
    /// the updated project
    async fn update_container(
        &self,
        project_id: &str,
        backend: &str,
        environment: Option<&str>,
        fields: Vec<ContainerField>,
    ) -> Result<Project, OrchestratorError>;
}

/// In-memory project store
#[derive(Default)]
pub struct MemoryProjectStore {
    projects: RwLock<HashMap<String, Project>>,
}

impl MemoryProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_projects(projects: impl IntoIterator<Item = Project>) -> Self {
        Self {
            projects: RwLock::new(projects.into_iter().map(|p| (p.id.clone(), p)).collect()),
        }
    }

    async fn snapshot(&self) -> HashMap<String, Project> {
        self.projects.read().await.clone()
    }
}

#[async_trait]
impl ProjectStore for MemoryProjectStore {
    async fn get_project(&self, project_id: &str) -> Result<Option<Project>, OrchestratorError> {
        Ok(self.projects.read().await.get(project_id).cloned())
    }

    async fn list_projects(&self) -> Result<Vec<Project>, OrchestratorError> {
        let mut projects: Vec<Project> = self.projects.read().await.values().cloned().collect();
        projects.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(projects)
    }

    async fn upsert_project(&self, project: Project) -> Result<(), OrchestratorError> {
        self.projects.write().await.insert(project.id.clone(), project);
        Ok(())
    }

    async fn update_container(
        &self,
        project_id: &str,
        backend: &str,
        environment: Option<&str>,
        fields: Vec<ContainerField>,
    ) -> Result<Project, OrchestratorError> {
        let mut projects = self.projects.write().await;
        let project = projects
            .get_mut(project_id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("project {}", project_id)))?;

        let state = project.container_mut(backend, environment);
        for field in fields {
            state.apply(field);
        }

        Ok(project.clone())
    }
}

/// Project store persisted to a JSON file after every mutation
pub struct FileProjectStore {
    file: File,
    inner: MemoryProjectStore,
    write_lock: Mutex<()>,
}

impl FileProjectStore {
    /// Open the store, loading existing projects from disk
    pub async fn open(file: File) -> Result<Self, OrchestratorError> {
        let projects: HashMap<String, Project> = file
            .read_json_or_default()
            .await
            .map_err(|e| OrchestratorError::StoreError(format!("{}: {}", file.path().display(), e)))?;

        info!("Loaded {} project(s) from {}", projects.len(), file.path().display());

        Ok(Self {
            file,
            inner: MemoryProjectStore::with_projects(projects.into_values()),
            write_lock: Mutex::new(()),
        })
    }

    async fn persist(&self) -> Result<(), OrchestratorError> {
        let snapshot = self.inner.snapshot().await;
        self.file
            .write_json(&snapshot)
            .await
            .map_err(|e| OrchestratorError::StoreError(e.to_string()))?;
        debug!("Persisted {} project(s)", snapshot.len());
        Ok(())
    }
}

#[async_trait]
impl ProjectStore for FileProjectStore {
    async fn get_project(&self, project_id: &str) -> Result<Option<Project>, OrchestratorError> {
        self.inner.get_project(project_id).await
    }

    async fn list_projects(&self) -> Result<Vec<Project>, OrchestratorError> {
        self.inner.list_projects().await
    }

    async fn upsert_project(&self, project: Project) -> Result<(), OrchestratorError> {
        let _guard = self.write_lock.lock().await;
        self.inner.upsert_project(project).await?;
        self.persist().await
    }

    async fn update_container(
        &self,
        project_id: &str,
        backend: &str,
        environment: Option<&str>,
        fields: Vec<ContainerField>,
    ) -> Result<Project, OrchestratorError> {
        let _guard = self.write_lock.lock().await;
        let project = self
            .inner
            .update_container(project_id, backend, environment, fields)
            .await?;
        self.persist().await?;
        Ok(project)
    }
}

//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::OrchestratorError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// On-disk layout of the daemon's data directory
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Persisted project documents
    pub fn projects_file(&self) -> File {
        File::new(self.base_dir.join("projects.json"))
    }

    /// Registry of locally spawned preview processes
    pub fn local_tasks_file(&self) -> File {
        File::new(self.base_dir.join("local-tasks.json"))
    }

    /// Output of locally spawned preview processes
    pub fn local_logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs").join("local"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), OrchestratorError> {
        Dir::new(&self.base_dir).create().await?;
        self.local_logs_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        #[cfg(target_os = "linux")]
        let base_dir = PathBuf::from("/var/lib/previewd");

        #[cfg(not(target_os = "linux"))]
        let base_dir = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".previewd");

        Self::new(base_dir)
    }
}

//! Remote store boundary.
//!
//! The remote delivers and accepts whole project rows. Every successful
//! push returns the version the remote committed.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use weft_engine::{Project, ProjectId, Version};

use crate::autosave::write_atomic;

/// Errors reported by a remote store.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("remote unavailable: {0}")]
    Unavailable(String),

    #[error("remote rejected the write: {0}")]
    Rejected(String),

    #[error("remote IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("remote payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Async access to the authoritative copy of each project.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch the current remote row, or `None` if the project is unknown.
    async fn fetch_project(&self, project_id: &str) -> Result<Option<Project>, RemoteError>;

    /// Write a project and return the version the remote committed.
    async fn push_project(&self, project: &Project) -> Result<Version, RemoteError>;

    /// Ids of all projects the remote knows about.
    async fn list_projects(&self) -> Result<Vec<ProjectId>, RemoteError>;
}

/// Remote store backed by one JSON file per project in a directory.
///
/// Several devices can share a synced or network directory. Writes from
/// this process are serialized; the version is bumped on every push.
#[derive(Debug)]
pub struct DirectoryRemote {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl DirectoryRemote {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn project_path(&self, project_id: &str) -> Result<PathBuf, RemoteError> {
        let valid = !project_id.is_empty()
            && project_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(RemoteError::Rejected(format!(
                "project id '{project_id}' is not a valid file name"
            )));
        }
        Ok(self.dir.join(format!("{project_id}.json")))
    }

    async fn read(&self, path: &Path) -> Result<Option<Project>, RemoteError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl RemoteStore for DirectoryRemote {
    async fn fetch_project(&self, project_id: &str) -> Result<Option<Project>, RemoteError> {
        let path = self.project_path(project_id)?;
        self.read(&path).await
    }

    async fn push_project(&self, project: &Project) -> Result<Version, RemoteError> {
        let path = self.project_path(&project.id)?;
        let _guard = self.write_lock.lock().await;

        let current = self.read(&path).await?.map(|p| p.version).unwrap_or(0);
        let version = current.max(project.version) + 1;
        let stored = Project {
            version,
            ..project.clone()
        };

        tokio::fs::create_dir_all(&self.dir).await?;
        write_atomic(&path, &serde_json::to_vec_pretty(&stored)?).await?;
        tracing::debug!(project_id = %project.id, version, "project written to remote directory");
        Ok(version)
    }

    async fn list_projects(&self) -> Result<Vec<ProjectId>, RemoteError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

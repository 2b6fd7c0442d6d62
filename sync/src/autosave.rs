//! Local-only autosave of the whole workspace.
//!
//! The file is written atomically: the JSON goes to a sibling temp file
//! which is then renamed over the target, so a crash never leaves a half
//! written autosave behind.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use weft_engine::Workspace;

use crate::error::Result;

/// On-disk autosave document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutosaveEnvelope {
    pub saved_at: DateTime<Utc>,
    pub workspace: Workspace,
}

/// Autosave file location.
#[derive(Debug, Clone)]
pub struct AutosaveFile {
    path: PathBuf,
}

impl AutosaveFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `workspace` atomically.
    pub async fn save(&self, workspace: Workspace) -> Result<DateTime<Utc>> {
        let envelope = AutosaveEnvelope {
            saved_at: Utc::now(),
            workspace,
        };
        let bytes = serde_json::to_vec_pretty(&envelope)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        write_atomic(&self.path, &bytes).await?;

        tracing::debug!(
            path = %self.path.display(),
            bytes = bytes.len(),
            projects = envelope.workspace.projects.len(),
            "autosave written"
        );
        Ok(envelope.saved_at)
    }

    /// Load the last autosave. A missing file yields `None`.
    pub async fn load(&self) -> Result<Option<AutosaveEnvelope>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let envelope: AutosaveEnvelope = serde_json::from_slice(&bytes)?;
        envelope.workspace.ensure_loadable()?;
        tracing::info!(
            path = %self.path.display(),
            saved_at = %envelope.saved_at,
            "autosave loaded"
        );
        Ok(Some(envelope))
    }
}

/// Write `bytes` to `path` through a temp file and rename.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(format!(".{}.tmp", uuid::Uuid::new_v4()));
    let tmp = PathBuf::from(tmp);

    if let Err(e) = tokio::fs::write(&tmp, bytes).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

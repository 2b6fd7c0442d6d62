//! User-facing notifications emitted by the engine.
//!
//! The engine never talks to a UI directly. Rollbacks, undo refusals and
//! conflict copies are reported as [`Notice`] values through a [`Notifier`].

use crate::{TaskId, Version};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// A structured notification suitable for direct display or telemetry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Notice {
    /// An optimistic action failed remotely and local state was rolled back.
    #[serde(rename_all = "camelCase")]
    RollbackFailed { title: String, message: String },
    /// Undo/redo refused because the project moved on too far.
    #[serde(rename_all = "camelCase")]
    UndoRefused { title: String, message: String },
    /// Undo/redo refused, but the caller may force the replay.
    #[serde(rename_all = "camelCase")]
    UndoForceable {
        title: String,
        message: String,
        version_gap: Version,
    },
    /// First forced replay in this session; newer remote content may be lost.
    #[serde(rename_all = "camelCase")]
    ForceReplayWarning { title: String, message: String },
    /// A merge preserved a diverging local edit as a sibling task.
    #[serde(rename_all = "camelCase")]
    ConflictCopyCreated {
        copy_id: TaskId,
        source_id: TaskId,
        local_length: usize,
        remote_length: usize,
    },
}

impl Notice {
    /// Build the notice shown after a rollback.
    pub fn rollback(label: Option<&str>) -> Self {
        let message = match label {
            Some(label) => format!("{label} could not be saved and was reverted."),
            None => "A change could not be saved and was reverted.".to_string(),
        };
        Notice::RollbackFailed {
            title: "Change reverted".to_string(),
            message,
        }
    }
}

/// Receiver of engine notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Notifier that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: Notice) {
        match &notice {
            Notice::RollbackFailed { message, .. } => {
                tracing::warn!(%message, "rollback notice");
            }
            Notice::UndoRefused { message, .. } | Notice::ForceReplayWarning { message, .. } => {
                tracing::warn!(%message, "undo notice");
            }
            Notice::UndoForceable {
                message,
                version_gap,
                ..
            } => {
                tracing::warn!(%message, version_gap, "forceable undo notice");
            }
            Notice::ConflictCopyCreated {
                copy_id,
                source_id,
                local_length,
                remote_length,
            } => {
                tracing::info!(
                    copy_id = %copy_id,
                    source_id = %source_id,
                    local_length,
                    remote_length,
                    "conflict copy created"
                );
            }
        }
    }
}

/// Notifier that keeps every notice in memory.
///
/// Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    notices: Arc<Mutex<Vec<Notice>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every notice received so far.
    pub fn notices(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .map(|n| n.clone())
            .unwrap_or_default()
    }

    /// Remove and return every notice received so far.
    pub fn take(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .map(|mut n| std::mem::take(&mut *n))
            .unwrap_or_default()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        if let Ok(mut notices) = self.notices.lock() {
            notices.push(notice);
        }
    }
}

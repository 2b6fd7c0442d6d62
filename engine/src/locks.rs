//! Field locks held by the editing layer.
//!
//! A lock means a person is typing into that field right now. The merge
//! engine only reads locks; it never takes or releases them.

use crate::{Clock, ProjectId, TaskField, TaskId, Timestamp};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Lookup of currently locked fields for a task.
pub trait FieldLocks: Send + Sync {
    fn locked_fields(&self, task_id: &str, project_id: &str) -> Vec<TaskField>;
}

/// No field is ever locked.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLocks;

impl FieldLocks for NoLocks {
    fn locked_fields(&self, _task_id: &str, _project_id: &str) -> Vec<TaskField> {
        Vec::new()
    }
}

type LockKey = (ProjectId, TaskId, TaskField);

/// Expiring lock table.
///
/// Entries past their expiry are ignored on lookup and dropped by
/// [`LockTable::purge_expired`].
pub struct LockTable {
    locks: RwLock<HashMap<LockKey, Timestamp>>,
    clock: Arc<dyn Clock>,
}

impl LockTable {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            locks: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Lock `field` until `expires_at`. Re-locking extends the expiry.
    pub fn lock(&self, project_id: &str, task_id: &str, field: TaskField, expires_at: Timestamp) {
        if let Ok(mut locks) = self.locks.write() {
            locks.insert(
                (project_id.to_string(), task_id.to_string(), field),
                expires_at,
            );
        }
    }

    pub fn unlock(&self, project_id: &str, task_id: &str, field: TaskField) {
        if let Ok(mut locks) = self.locks.write() {
            locks.remove(&(project_id.to_string(), task_id.to_string(), field));
        }
    }

    /// Drop expired entries and return how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        match self.locks.write() {
            Ok(mut locks) => {
                let before = locks.len();
                locks.retain(|_, expires_at| *expires_at > now);
                before - locks.len()
            }
            Err(_) => 0,
        }
    }
}

impl FieldLocks for LockTable {
    fn locked_fields(&self, task_id: &str, project_id: &str) -> Vec<TaskField> {
        let now = self.clock.now_ms();
        let Ok(locks) = self.locks.read() else {
            return Vec::new();
        };
        let mut fields: Vec<TaskField> = locks
            .iter()
            .filter(|((p, t, _), expires_at)| p == project_id && t == task_id && **expires_at > now)
            .map(|((_, _, field), _)| *field)
            .collect();
        fields.sort();
        fields
    }
}

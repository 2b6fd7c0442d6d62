//! Snapshot manager for optimistic mutations.
//!
//! Every optimistic change captures a deep copy of the whole [`Workspace`]
//! first. The copy is dropped when the change is confirmed (commit) or
//! written back verbatim when it is not (rollback). There are no inverse
//! operations: rollback is always whole-workspace replacement, and the
//! [`SnapshotKind`] only labels the change.

use crate::{
    config::SnapshotConfig, error::Result, ChangeKind, Clock, Error, JsonClone, Notice, Notifier,
    StructuralClone, Timestamp, Workspace, WorkspaceCloner,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// How many evicted ids are remembered for diagnostics.
const EVICTED_LEDGER_LEN: usize = 64;

/// What kind of mutation a snapshot protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SnapshotKind {
    TaskCreate,
    TaskUpdate,
    TaskDelete,
    TaskMove,
    ConnectionCreate,
    ConnectionDelete,
    ProjectCreate,
    ProjectUpdate,
    ProjectDelete,
}

impl SnapshotKind {
    /// Persist class of a committed mutation of this kind.
    pub fn change_kind(&self) -> ChangeKind {
        match self {
            SnapshotKind::TaskUpdate | SnapshotKind::ProjectUpdate => ChangeKind::Content,
            _ => ChangeKind::Structural,
        }
    }
}

/// Identifier of a stored snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SnapshotId(pub u64);

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "snap-{}", self.0)
    }
}

/// A captured copy of the workspace.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub kind: SnapshotKind,
    /// Human-readable description used in failure notices
    pub label: Option<String>,
    pub created_at: Timestamp,
    workspace: Workspace,
}

impl Snapshot {
    /// The captured state.
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }
}

/// Counters describing how snapshots ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotStats {
    pub created: u64,
    pub committed: u64,
    pub rolled_back: u64,
    pub evicted: u64,
}

/// Result of [`SnapshotManager::run_optimistic_action`].
#[derive(Debug, Clone, PartialEq)]
pub enum OptimisticOutcome<T> {
    /// The remote action succeeded and the snapshot was committed.
    Committed(T),
    /// The local mutation itself failed. State was untouched, so the
    /// snapshot was discarded without a rollback.
    ApplyFailed { error: Error },
    /// The remote action failed after the local mutation.
    ActionFailed {
        error: String,
        /// False when the snapshot had already been evicted
        rolled_back: bool,
    },
}

impl<T> OptimisticOutcome<T> {
    pub fn is_committed(&self) -> bool {
        matches!(self, OptimisticOutcome::Committed(_))
    }
}

/// Owner of all live snapshots.
pub struct SnapshotManager {
    config: SnapshotConfig,
    clock: Arc<dyn Clock>,
    primary: Box<dyn WorkspaceCloner>,
    fallback: Box<dyn WorkspaceCloner>,
    snapshots: BTreeMap<SnapshotId, Snapshot>,
    next_id: u64,
    evicted: VecDeque<SnapshotId>,
    stats: SnapshotStats,
}

impl SnapshotManager {
    /// Create a manager with the structural clone as primary strategy and
    /// the JSON round-trip as fallback.
    pub fn new(config: SnapshotConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_cloners(config, clock, Box::new(StructuralClone), Box::new(JsonClone))
    }

    /// Create a manager with explicit clone strategies.
    pub fn with_cloners(
        config: SnapshotConfig,
        clock: Arc<dyn Clock>,
        primary: Box<dyn WorkspaceCloner>,
        fallback: Box<dyn WorkspaceCloner>,
    ) -> Self {
        Self {
            config,
            clock,
            primary,
            fallback,
            snapshots: BTreeMap::new(),
            next_id: 1,
            evicted: VecDeque::new(),
            stats: SnapshotStats::default(),
        }
    }

    /// Number of live snapshots.
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn contains(&self, id: SnapshotId) -> bool {
        self.snapshots.contains_key(&id)
    }

    pub fn get(&self, id: SnapshotId) -> Option<&Snapshot> {
        self.snapshots.get(&id)
    }

    pub fn stats(&self) -> SnapshotStats {
        self.stats
    }

    /// Capture the workspace before a mutation.
    ///
    /// Fails only when both clone strategies fail; the caller must then not
    /// mutate.
    pub fn create_snapshot(
        &mut self,
        workspace: &Workspace,
        kind: SnapshotKind,
        label: Option<&str>,
    ) -> Result<SnapshotId> {
        let copy = self.capture(workspace)?;
        let id = SnapshotId(self.next_id);
        self.next_id += 1;

        let created_at = self.clock.now_ms();
        self.snapshots.insert(
            id,
            Snapshot {
                id,
                kind,
                label: label.map(str::to_string),
                created_at,
                workspace: copy,
            },
        );
        self.stats.created += 1;
        tracing::debug!(snapshot_id = %id, ?kind, "snapshot created");

        while self.snapshots.len() > self.config.max_snapshots {
            let Some(oldest) = self
                .snapshots
                .values()
                .min_by_key(|s| (s.created_at, s.id))
                .map(|s| s.id)
            else {
                break;
            };
            self.evict(oldest, "snapshot limit reached");
        }

        Ok(id)
    }

    fn capture(&self, workspace: &Workspace) -> Result<Workspace> {
        match self.primary.clone_workspace(workspace) {
            Ok(copy) => Ok(copy),
            Err(primary_err) => {
                tracing::warn!(
                    strategy = self.primary.name(),
                    error = %primary_err,
                    "primary clone failed, using fallback"
                );
                self.fallback
                    .clone_workspace(workspace)
                    .map_err(|fallback_err| {
                        tracing::error!(
                            strategy = self.fallback.name(),
                            error = %fallback_err,
                            "fallback clone failed"
                        );
                        Error::SnapshotCapture {
                            primary: primary_err.to_string(),
                            fallback: fallback_err.to_string(),
                        }
                    })
            }
        }
    }

    /// Discard a snapshot without touching state. Unknown ids are a no-op.
    pub fn commit_snapshot(&mut self, id: SnapshotId) {
        if self.snapshots.remove(&id).is_some() {
            self.stats.committed += 1;
            tracing::debug!(snapshot_id = %id, "snapshot committed");
        } else {
            self.log_unknown(id, "commit");
        }
    }

    /// Restore the workspace from a snapshot and discard it.
    ///
    /// Returns `false` if the snapshot is unknown (already settled or
    /// evicted); there is then nothing to roll back.
    pub fn rollback_snapshot(
        &mut self,
        id: SnapshotId,
        workspace: &mut Workspace,
        notifier: &dyn Notifier,
        notify: bool,
    ) -> bool {
        let Some(snapshot) = self.snapshots.remove(&id) else {
            self.log_unknown(id, "rollback");
            return false;
        };

        *workspace = snapshot.workspace;
        self.stats.rolled_back += 1;
        tracing::info!(
            snapshot_id = %id,
            kind = ?snapshot.kind,
            label = snapshot.label.as_deref().unwrap_or(""),
            "snapshot rolled back"
        );

        if notify {
            notifier.notify(Notice::rollback(snapshot.label.as_deref()));
        }
        true
    }

    /// Run one optimistic mutation with guaranteed commit/rollback pairing.
    ///
    /// 1. Capture a snapshot (a capture failure aborts before any mutation)
    /// 2. Apply the local mutation; on failure discard the snapshot
    /// 3. Await the remote action; commit on success, roll back on failure
    pub async fn run_optimistic_action<A, F, Fut, T, E>(
        &mut self,
        workspace: &mut Workspace,
        notifier: &dyn Notifier,
        kind: SnapshotKind,
        label: &str,
        apply: A,
        action: F,
    ) -> Result<OptimisticOutcome<T>>
    where
        A: FnOnce(&mut Workspace) -> Result<()>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: fmt::Display,
    {
        let id = self.create_snapshot(workspace, kind, Some(label))?;

        if let Err(error) = apply(workspace) {
            tracing::warn!(snapshot_id = %id, %label, %error, "optimistic apply failed");
            self.commit_snapshot(id);
            return Ok(OptimisticOutcome::ApplyFailed { error });
        }

        match action().await {
            Ok(value) => {
                self.commit_snapshot(id);
                Ok(OptimisticOutcome::Committed(value))
            }
            Err(error) => {
                let error = error.to_string();
                tracing::warn!(snapshot_id = %id, %label, %error, "optimistic action failed");
                let rolled_back = self.rollback_snapshot(id, workspace, notifier, true);
                Ok(OptimisticOutcome::ActionFailed { error, rolled_back })
            }
        }
    }

    /// Evict snapshots older than the configured max age.
    pub fn sweep_expired(&mut self) -> usize {
        let now = self.clock.now_ms();
        let expired: Vec<SnapshotId> = self
            .snapshots
            .values()
            .filter(|s| now.saturating_sub(s.created_at) > self.config.max_age_ms)
            .map(|s| s.id)
            .collect();

        for id in &expired {
            self.evict(*id, "snapshot expired");
        }
        expired.len()
    }

    fn evict(&mut self, id: SnapshotId, reason: &str) {
        if let Some(snapshot) = self.snapshots.remove(&id) {
            self.stats.evicted += 1;
            self.evicted.push_back(id);
            if self.evicted.len() > EVICTED_LEDGER_LEN {
                self.evicted.pop_front();
            }
            tracing::info!(
                snapshot_id = %id,
                kind = ?snapshot.kind,
                created_at = snapshot.created_at,
                reason,
                "snapshot evicted"
            );
        }
    }

    fn log_unknown(&self, id: SnapshotId, action: &str) {
        if self.evicted.contains(&id) {
            // The mutation it guarded is now permanently accepted
            tracing::warn!(snapshot_id = %id, action, "snapshot was evicted before it settled");
        } else {
            tracing::debug!(snapshot_id = %id, action, "unknown snapshot id");
        }
    }
}

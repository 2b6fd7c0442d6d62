//! Store - the single owner of workspace state.
//!
//! The Store holds the [`Workspace`] together with the four components that
//! act on it and wires them in a fixed order: mutation, diff, undo push,
//! dirty mark. Every entry point takes `&mut self`; hosts that share a Store
//! across tasks put it behind one lock.

use crate::{
    changes::{diff_states, stamp_changed, EntityChange, ProjectState},
    error::Result,
    ChangeKind, Clock, CompactSiblingOrder, Direction, EngineConfig, Error, FieldLocks,
    FlushTicket, MergeEngine, NoLocks, Notifier, OptimisticOutcome, PersistScheduler, Project,
    ProjectId, Rebalancer, SnapshotKind, SnapshotManager, Timestamp, TracingNotifier, UndoAction,
    UndoOutcome, UndoTracker, Version, Workspace,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Projects handed to the host for one push.
#[derive(Debug)]
pub struct FlushBatch {
    pub ticket: FlushTicket,
    /// Copies of every project with unflushed local changes
    pub projects: Vec<Project>,
}

/// Summary of reconciling one remote project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    pub project_id: ProjectId,
    /// Tasks that had at least one conflicting field
    pub conflicted: Vec<String>,
    /// Ids of conflict copies added to the project
    pub conflict_copies: Vec<String>,
    pub version: Version,
    /// Whether the merged project differs from the remote and needs a push
    pub needs_push: bool,
}

/// The main store holding all state.
pub struct Store {
    config: EngineConfig,
    workspace: Workspace,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    locks: Arc<dyn FieldLocks>,
    rebalancer: Arc<dyn Rebalancer>,
    snapshots: SnapshotManager,
    merge: MergeEngine,
    undo: UndoTracker,
    persist: PersistScheduler,
    changes: Vec<EntityChange>,
    dirty: BTreeSet<ProjectId>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("projects", &self.workspace.projects.len())
            .field("active_project_id", &self.workspace.active_project_id)
            .field("snapshots", &self.snapshots.len())
            .field("undo_depth", &self.undo.undo_depth())
            .field("pending", &self.persist.is_pending())
            .finish()
    }
}

impl Store {
    /// Create a store over `workspace`.
    ///
    /// Notices go to the tracing log, no field is locked and replays compact
    /// sibling order until the corresponding `with_*` builder is used.
    pub fn new(workspace: Workspace, config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            snapshots: SnapshotManager::new(config.snapshots.clone(), clock.clone()),
            merge: MergeEngine::new(config.merge.clone()),
            undo: UndoTracker::new(config.undo.clone()),
            persist: PersistScheduler::new(config.persist.clone(), clock.clone()),
            config,
            workspace,
            clock,
            notifier: Arc::new(TracingNotifier),
            locks: Arc::new(NoLocks),
            rebalancer: Arc::new(CompactSiblingOrder),
            changes: Vec::new(),
            dirty: BTreeSet::new(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_locks(mut self, locks: Arc<dyn FieldLocks>) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_rebalancer(mut self, rebalancer: Arc<dyn Rebalancer>) -> Self {
        self.rebalancer = rebalancer;
        self
    }

    /// Replace the snapshot manager, e.g. to use custom clone strategies.
    pub fn with_snapshot_manager(mut self, snapshots: SnapshotManager) -> Self {
        self.snapshots = snapshots;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn active_project(&self) -> Option<&Project> {
        self.workspace.active_project()
    }

    pub fn project(&self, id: &str) -> Option<&Project> {
        self.workspace.project(id)
    }

    pub fn snapshots(&self) -> &SnapshotManager {
        &self.snapshots
    }

    pub fn undo_tracker(&self) -> &UndoTracker {
        &self.undo
    }

    pub fn persist(&self) -> &PersistScheduler {
        &self.persist
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now_ms()
    }

    /// Switch the active project.
    pub fn set_active_project(&mut self, id: &str) -> Result<()> {
        if self.workspace.project(id).is_none() {
            return Err(Error::ProjectNotFound(id.to_string()));
        }
        self.workspace.active_project_id = Some(id.to_string());
        Ok(())
    }

    /// Add or replace a project without recording history.
    pub fn insert_project(&mut self, project: Project) {
        self.workspace.insert_project(project);
    }

    // ------------------------------------------------------------------
    // Recorded mutations and history
    // ------------------------------------------------------------------

    /// Apply `mutator` to the active project and record it for undo.
    ///
    /// A failing mutator leaves the project exactly as it was and records
    /// nothing. Entities the mutator changed are stamped with the current
    /// time. Returns the number of entity changes logged; a mutation that
    /// changes nothing is not recorded.
    pub fn record_and_apply<F>(&mut self, kind: ChangeKind, mutator: F) -> Result<usize>
    where
        F: FnOnce(&mut Project) -> Result<()>,
    {
        let now = self.clock.now_ms();
        let project = self.workspace.active_project_mut()?;
        let project_id = project.id.clone();
        let version = project.version;
        let pristine = project.clone();
        let before = ProjectState::capture(project);

        if let Err(error) = mutator(project) {
            *project = pristine;
            tracing::warn!(project_id = %project_id, %error, "recorded mutation failed");
            return Err(error);
        }

        stamp_changed(&before, project, now);
        let after = ProjectState::capture(project);
        let changes = diff_states(&project_id, &before, &after);
        if changes.is_empty() {
            return Ok(0);
        }

        let count = changes.len();
        self.changes.extend(changes);
        self.undo.push(UndoAction {
            kind,
            project_id: project_id.clone(),
            project_version: version,
            before,
            after,
        });
        self.mark_dirty(project_id, kind);
        Ok(count)
    }

    pub fn undo(&mut self) -> Result<UndoOutcome> {
        self.replay(Direction::Undo, false)
    }

    pub fn redo(&mut self) -> Result<UndoOutcome> {
        self.replay(Direction::Redo, false)
    }

    /// Undo even if the project has moved on since the action was recorded.
    pub fn force_undo(&mut self) -> Result<UndoOutcome> {
        self.replay(Direction::Undo, true)
    }

    /// Redo even if the project has moved on since the action was recorded.
    pub fn force_redo(&mut self) -> Result<UndoOutcome> {
        self.replay(Direction::Redo, true)
    }

    fn replay(&mut self, direction: Direction, force: bool) -> Result<UndoOutcome> {
        let Some((project_id, kind)) = self
            .undo
            .peek(direction)
            .map(|action| (action.project_id.clone(), action.kind))
        else {
            return Ok(UndoOutcome::Empty);
        };

        let now = self.clock.now_ms();
        let project = self
            .workspace
            .project_mut(&project_id)
            .ok_or_else(|| Error::ProjectNotFound(project_id.clone()))?;
        let before = ProjectState::capture(project);

        let outcome = self.undo.replay(
            direction,
            project,
            force,
            now,
            self.rebalancer.as_ref(),
            self.notifier.as_ref(),
        );

        if outcome == UndoOutcome::Applied {
            let after = ProjectState::capture(project);
            self.changes.extend(diff_states(&project_id, &before, &after));
            self.mark_dirty(project_id, kind);
        }
        Ok(outcome)
    }

    // ------------------------------------------------------------------
    // Optimistic actions
    // ------------------------------------------------------------------

    /// Run an optimistic mutation guarded by a workspace snapshot.
    ///
    /// On commit the active project is marked dirty with the change class
    /// of `kind`. See [`SnapshotManager::run_optimistic_action`].
    pub async fn run_optimistic_action<A, F, Fut, T, E>(
        &mut self,
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
        let outcome = self
            .snapshots
            .run_optimistic_action(
                &mut self.workspace,
                self.notifier.as_ref(),
                kind,
                label,
                apply,
                action,
            )
            .await?;

        if outcome.is_committed() {
            if let Some(project_id) = self.workspace.active_project_id.clone() {
                self.mark_dirty(project_id, kind.change_kind());
            } else {
                self.persist.mark_local_changes(kind.change_kind());
            }
        }
        Ok(outcome)
    }

    /// Evict expired snapshots.
    pub fn sweep_snapshots(&mut self) -> usize {
        self.snapshots.sweep_expired()
    }

    // ------------------------------------------------------------------
    // Remote reconciliation
    // ------------------------------------------------------------------

    /// Reconcile a remote variant of a project with local state.
    ///
    /// An unknown project is adopted as is. Conflict-copy notices are
    /// forwarded to the notifier. If the result differs from the remote the
    /// project is marked dirty so the merge is pushed back.
    pub fn merge_remote(&mut self, remote: Project) -> MergeReport {
        let now = self.clock.now_ms();
        let project_id = remote.id.clone();

        let Some(local) = self.workspace.project(&project_id) else {
            tracing::info!(project_id = %project_id, version = remote.version, "adopted remote project");
            let version = remote.version;
            self.workspace.insert_project(remote);
            return MergeReport {
                project_id,
                conflicted: Vec::new(),
                conflict_copies: Vec::new(),
                version,
                needs_push: false,
            };
        };

        let merged = self.merge.merge_project(local, &remote, self.locks.as_ref(), now);
        let conflict_copies = merged
            .notices
            .iter()
            .filter_map(|notice| match notice {
                crate::Notice::ConflictCopyCreated { copy_id, .. } => Some(copy_id.clone()),
                _ => None,
            })
            .collect();
        for notice in merged.notices {
            self.notifier.notify(notice);
        }

        let needs_push = ProjectState::capture(&merged.project) != ProjectState::capture(&remote);
        let version = merged.project.version;
        self.workspace.insert_project(merged.project);
        if needs_push {
            self.mark_dirty(project_id.clone(), ChangeKind::Content);
        }

        MergeReport {
            project_id,
            conflicted: merged.conflicted,
            conflict_copies,
            version,
            needs_push,
        }
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Mark local changes that bypassed the recorder, such as canvas drags.
    pub fn mark_local_changes(&mut self, kind: ChangeKind) {
        match self.workspace.active_project_id.clone() {
            Some(project_id) => self.mark_dirty(project_id, kind),
            None => self.persist.mark_local_changes(kind),
        }
    }

    fn mark_dirty(&mut self, project_id: ProjectId, kind: ChangeKind) {
        self.dirty.insert(project_id);
        self.persist.mark_local_changes(kind);
    }

    /// Projects with local changes not yet flushed.
    pub fn dirty_projects(&self) -> impl Iterator<Item = &ProjectId> {
        self.dirty.iter()
    }

    /// Whether the debounce deadline has passed.
    pub fn flush_due(&self) -> bool {
        self.persist.is_due()
    }

    pub fn next_flush_deadline(&self) -> Option<Timestamp> {
        self.persist.next_deadline()
    }

    /// Start a flush if one is due or `force` is set.
    pub fn begin_flush(&mut self, force: bool) -> Option<FlushBatch> {
        let ticket = if force {
            self.persist.flush_pending_persist()?
        } else {
            if !self.persist.is_due() {
                return None;
            }
            self.persist.begin_flush()?
        };

        let projects = std::mem::take(&mut self.dirty)
            .into_iter()
            .filter_map(|id| self.workspace.project(&id).cloned())
            .collect();
        Some(FlushBatch { ticket, projects })
    }

    /// Complete a flush.
    ///
    /// `acked` carries the committed version for every project the remote
    /// accepted; `failed` lists projects that must be pushed again.
    pub fn finish_flush(
        &mut self,
        ticket: FlushTicket,
        acked: &[(ProjectId, Version)],
        failed: &[ProjectId],
    ) {
        for (project_id, version) in acked {
            self.acknowledge_flush(project_id, *version);
        }
        self.dirty.extend(failed.iter().cloned());
        self.persist.finish_flush(ticket, failed.is_empty());
    }

    /// Adopt the version the remote committed for this replica's own write.
    ///
    /// Undo actions recorded at the previous version are rebased onto the
    /// new one only when the write directly followed it. A larger jump means
    /// another device committed in between, so the history stays stale.
    pub fn acknowledge_flush(&mut self, project_id: &str, new_version: Version) {
        let Some(project) = self.workspace.project_mut(project_id) else {
            tracing::debug!(project_id, "flush acknowledged for unknown project");
            return;
        };
        let old_version = project.version;
        if new_version <= old_version {
            return;
        }
        project.version = new_version;

        if new_version == old_version + 1 {
            self.undo.rebase_versions(project_id, old_version, new_version);
            tracing::debug!(project_id, old_version, new_version, "flush acknowledged");
        } else {
            tracing::info!(
                project_id,
                old_version,
                new_version,
                "flush acknowledged past foreign writes, history left stale"
            );
        }
    }

    /// Take all logged entity changes.
    pub fn drain_changes(&mut self) -> Vec<EntityChange> {
        std::mem::take(&mut self.changes)
    }

    pub fn autosave_due(&self) -> bool {
        self.persist.autosave_due()
    }

    /// Copy the workspace for a local autosave and restart the autosave
    /// interval.
    pub fn autosave_snapshot(&mut self) -> Workspace {
        self.persist.record_autosave();
        self.workspace.clone()
    }
}

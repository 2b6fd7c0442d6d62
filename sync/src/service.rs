//! Sync service - hosts a [`Store`] on the tokio runtime.
//!
//! The store sits behind one async mutex. Remote IO never runs while the
//! lock is held: a flush copies the dirty projects out under the lock,
//! pushes them without it and reports the result back under the lock.
//! Background tasks drive the debounced flush, snapshot sweeping, the
//! autosave interval and optional polling of the remote.

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use weft_engine::{
    ChangeKind, Clock, EngineConfig, EntityChange, MergeReport, OptimisticOutcome, Project,
    ProjectId, SnapshotKind, Store, UndoOutcome, Version, Workspace,
};

use crate::autosave::AutosaveFile;
use crate::error::{Result, SyncError};
use crate::notify::{NoticeHub, NoticeReceiver};
use crate::transport::RemoteStore;

/// Delay before the flush loop re-checks a deadline that passed while
/// another flush was in flight.
const FLUSH_RETRY: Duration = Duration::from_millis(50);

/// Outcome of one flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Projects the remote accepted, with the version it committed
    pub pushed: Vec<(ProjectId, Version)>,
    /// Projects that stay dirty and will be pushed again
    pub failed: Vec<ProjectId>,
}

impl FlushReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

struct Inner {
    store: Mutex<Store>,
    remote: Arc<dyn RemoteStore>,
    autosave: AutosaveFile,
    hub: Arc<NoticeHub>,
    clock: Arc<dyn Clock>,
    wake: Notify,
}

/// Async host for the engine.
pub struct SyncService {
    inner: Arc<Inner>,
    pull_interval: Duration,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl fmt::Debug for SyncService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncService")
            .field("autosave", &self.inner.autosave.path())
            .field("pull_interval", &self.pull_interval)
            .field("running_tasks", &self.tasks.len())
            .finish()
    }
}

impl SyncService {
    /// Create a service over `workspace`. Nothing runs until [`start`].
    ///
    /// [`start`]: SyncService::start
    pub fn new(
        workspace: Workspace,
        config: EngineConfig,
        remote: Arc<dyn RemoteStore>,
        autosave: AutosaveFile,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let hub = NoticeHub::new_shared();
        let store = Store::new(workspace, config, clock.clone()).with_notifier(hub.clone());
        let (shutdown, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                store: Mutex::new(store),
                remote,
                autosave,
                hub,
                clock,
                wake: Notify::new(),
            }),
            pull_interval: Duration::ZERO,
            shutdown,
            tasks: Vec::new(),
        }
    }

    /// Poll the remote for every known project at this interval.
    pub fn with_pull_interval(mut self, interval: Duration) -> Self {
        self.pull_interval = interval;
        self
    }

    /// Receive every notice the store emits.
    pub fn subscribe(&self) -> (String, NoticeReceiver) {
        self.inner.hub.subscribe()
    }

    pub fn unsubscribe(&self, id: &str) {
        self.inner.hub.unsubscribe(id);
    }

    /// Read the store under the lock.
    pub async fn with_store<R>(&self, f: impl FnOnce(&Store) -> R) -> R {
        let store = self.inner.store.lock().await;
        f(&store)
    }

    // ------------------------------------------------------------------
    // Local edits
    // ------------------------------------------------------------------

    /// Apply a recorded mutation to the active project.
    ///
    /// Recorded mutations never queue: if the store is held by another
    /// operation the call fails with [`SyncError::Busy`].
    pub fn record<F>(&self, kind: ChangeKind, mutator: F) -> Result<usize>
    where
        F: FnOnce(&mut Project) -> weft_engine::error::Result<()>,
    {
        let mut store = self.inner.store.try_lock().map_err(|_| SyncError::Busy)?;
        let changed = store.record_and_apply(kind, mutator)?;
        drop(store);

        if changed > 0 {
            self.inner.wake.notify_one();
        }
        Ok(changed)
    }

    /// Mark unrecorded changes, such as a canvas drag, for persistence.
    pub async fn mark_local_changes(&self, kind: ChangeKind) {
        self.inner.store.lock().await.mark_local_changes(kind);
        self.inner.wake.notify_one();
    }

    pub async fn undo(&self) -> Result<UndoOutcome> {
        self.replay(|store| store.undo()).await
    }

    pub async fn redo(&self) -> Result<UndoOutcome> {
        self.replay(|store| store.redo()).await
    }

    pub async fn force_undo(&self) -> Result<UndoOutcome> {
        self.replay(|store| store.force_undo()).await
    }

    pub async fn force_redo(&self) -> Result<UndoOutcome> {
        self.replay(|store| store.force_redo()).await
    }

    async fn replay(
        &self,
        f: impl FnOnce(&mut Store) -> weft_engine::error::Result<UndoOutcome>,
    ) -> Result<UndoOutcome> {
        let outcome = f(&mut *self.inner.store.lock().await)?;
        if outcome == UndoOutcome::Applied {
            self.inner.wake.notify_one();
        }
        Ok(outcome)
    }

    /// Run an optimistic mutation whose confirmation comes from `action`.
    ///
    /// The store stays locked until `action` resolves, so a rollback never
    /// overwrites edits made while the action was in flight.
    pub async fn run_optimistic<A, F, Fut, T, E>(
        &self,
        kind: SnapshotKind,
        label: &str,
        apply: A,
        action: F,
    ) -> Result<OptimisticOutcome<T>>
    where
        A: FnOnce(&mut Workspace) -> weft_engine::error::Result<()>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: fmt::Display,
    {
        let outcome = self
            .inner
            .store
            .lock()
            .await
            .run_optimistic_action(kind, label, apply, action)
            .await?;

        if outcome.is_committed() {
            self.inner.wake.notify_one();
        }
        Ok(outcome)
    }

    /// Take the entity changes logged since the last call.
    pub async fn drain_changes(&self) -> Vec<EntityChange> {
        self.inner.store.lock().await.drain_changes()
    }

    // ------------------------------------------------------------------
    // Remote
    // ------------------------------------------------------------------

    /// Fetch one project and merge it into local state.
    pub async fn pull(&self, project_id: &str) -> Result<Option<MergeReport>> {
        self.inner.pull(project_id).await
    }

    /// Pull every project known locally or remotely.
    pub async fn pull_all(&self) -> Result<Vec<MergeReport>> {
        self.inner.pull_all().await
    }

    /// Push all dirty projects now, ignoring the debounce.
    pub async fn flush_now(&self) -> Result<Option<FlushReport>> {
        self.inner.flush(true).await
    }

    /// Push dirty projects if the debounce deadline has passed.
    pub async fn flush_if_due(&self) -> Result<Option<FlushReport>> {
        self.inner.flush(false).await
    }

    /// Write the local autosave now.
    pub async fn autosave_now(&self) -> Result<()> {
        self.inner.autosave().await
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Spawn the background loops. Calling it twice is a no-op.
    pub async fn start(&mut self) {
        if !self.tasks.is_empty() {
            return;
        }

        let (sweep_every, autosave_every) = {
            let store = self.inner.store.lock().await;
            let config = store.config();
            (
                Duration::from_millis(config.snapshots.sweep_interval_ms.max(1)),
                Duration::from_millis(config.persist.autosave_interval_ms.max(1)),
            )
        };

        self.tasks.push(tokio::spawn(flush_loop(
            self.inner.clone(),
            self.shutdown.subscribe(),
        )));
        self.tasks.push(tokio::spawn(every(
            sweep_every,
            self.shutdown.subscribe(),
            self.inner.clone(),
            |inner| async move {
                let evicted = inner.store.lock().await.sweep_snapshots();
                if evicted > 0 {
                    tracing::debug!(evicted, "expired snapshots swept");
                }
            },
        )));
        self.tasks.push(tokio::spawn(every(
            autosave_every,
            self.shutdown.subscribe(),
            self.inner.clone(),
            |inner| async move {
                if !inner.store.lock().await.autosave_due() {
                    return;
                }
                if let Err(e) = inner.autosave().await {
                    tracing::warn!(error = %e, "autosave failed");
                }
            },
        )));
        if !self.pull_interval.is_zero() {
            self.tasks.push(tokio::spawn(every(
                self.pull_interval,
                self.shutdown.subscribe(),
                self.inner.clone(),
                |inner| async move {
                    if let Err(e) = inner.pull_all().await {
                        tracing::warn!(error = %e, "periodic pull failed");
                    }
                },
            )));
        }

        tracing::info!(tasks = self.tasks.len(), "sync service started");
    }

    /// Stop the background loops, push pending changes and autosave.
    pub async fn shutdown(mut self) -> Result<Option<FlushReport>> {
        let _ = self.shutdown.send(true);
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "background task ended abnormally");
            }
        }

        let report = match self.inner.flush(true).await {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(error = %e, "final flush failed");
                None
            }
        };
        self.inner.autosave().await?;
        tracing::info!("sync service stopped");
        Ok(report)
    }
}

impl Inner {
    async fn pull(&self, project_id: &str) -> Result<Option<MergeReport>> {
        let Some(remote) = self.remote.fetch_project(project_id).await? else {
            return Ok(None);
        };
        Ok(Some(self.merge(remote).await))
    }

    async fn pull_all(&self) -> Result<Vec<MergeReport>> {
        let mut ids: BTreeSet<ProjectId> = self.remote.list_projects().await?.into_iter().collect();
        ids.extend(
            self.store
                .lock()
                .await
                .workspace()
                .projects
                .keys()
                .cloned(),
        );

        let fetched = join_all(ids.iter().map(|id| self.remote.fetch_project(id))).await;

        let mut reports = Vec::new();
        for (id, result) in ids.iter().zip(fetched) {
            match result {
                Ok(Some(remote)) => reports.push(self.merge(remote).await),
                Ok(None) => {}
                Err(e) => tracing::warn!(project_id = %id, error = %e, "fetch failed"),
            }
        }
        Ok(reports)
    }

    async fn merge(&self, remote: Project) -> MergeReport {
        let report = self.store.lock().await.merge_remote(remote);
        tracing::debug!(
            project_id = %report.project_id,
            version = report.version,
            conflicted = report.conflicted.len(),
            copies = report.conflict_copies.len(),
            needs_push = report.needs_push,
            "remote project merged"
        );
        if report.needs_push {
            self.wake.notify_one();
        }
        report
    }

    async fn flush(&self, force: bool) -> Result<Option<FlushReport>> {
        let Some(batch) = self.store.lock().await.begin_flush(force) else {
            return Ok(None);
        };

        let results = join_all(
            batch
                .projects
                .iter()
                .map(|project| self.remote.push_project(project)),
        )
        .await;

        let mut report = FlushReport::default();
        for (project, result) in batch.projects.iter().zip(results) {
            match result {
                Ok(version) => report.pushed.push((project.id.clone(), version)),
                Err(e) => {
                    tracing::warn!(project_id = %project.id, error = %e, "push failed");
                    report.failed.push(project.id.clone());
                }
            }
        }

        let still_pending = {
            let mut store = self.store.lock().await;
            store.finish_flush(batch.ticket, &report.pushed, &report.failed);
            store.persist().is_pending()
        };
        if still_pending {
            self.wake.notify_one();
        }

        tracing::info!(
            pushed = report.pushed.len(),
            failed = report.failed.len(),
            "flush complete"
        );
        Ok(Some(report))
    }

    async fn autosave(&self) -> Result<()> {
        let workspace = self.store.lock().await.autosave_snapshot();
        self.autosave.save(workspace).await?;
        Ok(())
    }
}

/// Sleep until the next flush deadline and flush when it passes.
async fn flush_loop(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    let mut retry = false;
    loop {
        let deadline = inner.store.lock().await.next_flush_deadline();
        let wait = deadline.map(|at| {
            let remaining = Duration::from_millis(at.saturating_sub(inner.clock.now_ms()));
            if retry {
                remaining.max(FLUSH_RETRY)
            } else {
                remaining
            }
        });

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = inner.wake.notified() => retry = false,
            _ = sleep_or_pending(wait) => {
                match inner.flush(false).await {
                    Ok(report) => retry = report.is_none(),
                    Err(e) => {
                        tracing::warn!(error = %e, "scheduled flush failed");
                        retry = true;
                    }
                }
            }
        }
    }
    tracing::debug!("flush loop stopped");
}

async fn sleep_or_pending(wait: Option<Duration>) {
    match wait {
        Some(wait) => tokio::time::sleep(wait).await,
        None => std::future::pending().await,
    }
}

/// Run `tick` every `period` until shutdown.
async fn every<F, Fut>(
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    inner: Arc<Inner>,
    tick: F,
) where
    F: Fn(Arc<Inner>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = interval.tick() => tick(inner.clone()).await,
        }
    }
}

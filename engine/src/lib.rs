//! # Weft Engine
//!
//! Optimistic concurrency and conflict resolution for an offline-capable
//! task-graph editor.
//!
//! Local edits apply immediately. They are synchronized with a remote store
//! in the background, and divergent histories are reconciled without losing
//! data. The remote store delivers whole rows, so reconciliation works on
//! two full versions of each entity rather than on operation logs.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine never touches files, network, or timers
//! - **Injectable time**: every timestamp comes from a [`Clock`]
//! - **Single owner**: one [`Store`] owns all state and is passed by `&mut`
//! - **Recoverable failures are values**: rollbacks, refused undos and
//!   conflict copies surface as outcome enums plus [`Notice`]s
//!
//! ## Components
//!
//! ### Snapshot Manager
//!
//! [`SnapshotManager`] captures a deep copy of the [`Workspace`] before an
//! optimistic mutation, then discards it (commit) or restores it
//! (rollback). Snapshots are bounded by count and age.
//!
//! ### Merge Engine
//!
//! [`MergeEngine`] merges a local task with its remote variant field by
//! field:
//! - last-writer-wins on `updatedAt`, ties to local
//! - fields locked by the editing layer ([`FieldLocks`]) stay local
//! - diverging long-form content becomes a sibling "conflict copy"
//! - tombstones are sticky, tags and connections use set merges
//!
//! ### Record/Undo Tracker
//!
//! [`Store::record_and_apply`] wraps a mutation with before/after capture.
//! [`UndoTracker`] replays history only while the project version still
//! matches the one the action was recorded at.
//!
//! ### Persist Scheduler
//!
//! [`PersistScheduler`] debounces flushes per [`ChangeKind`], keeps flushes
//! single-flight and tracks the local autosave interval.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use weft_engine::{
//!     ChangeKind, EngineConfig, ManualClock, Project, Store, Task, UndoOutcome, Workspace,
//! };
//!
//! // 1. Build a workspace
//! let workspace = Workspace::new()
//!     .with_active_project(Project::new("p1", "Roadmap").with_task(Task::new("t1", "Draft")));
//!
//! // 2. Create a store
//! let clock = ManualClock::new(1_706_745_600_000);
//! let mut store = Store::new(workspace, EngineConfig::default(), Arc::new(clock));
//!
//! // 3. Record a mutation
//! store
//!     .record_and_apply(ChangeKind::Content, |project| {
//!         if let Some(task) = project.task_mut("t1") {
//!             task.title = "Final".to_string();
//!         }
//!         Ok(())
//!     })
//!     .unwrap();
//! assert!(store.persist().is_pending());
//!
//! // 4. Undo it
//! assert_eq!(store.undo().unwrap(), UndoOutcome::Applied);
//! assert_eq!(store.active_project().unwrap().task("t1").unwrap().title, "Draft");
//! ```
//!
//! ## Persistence
//!
//! [`Workspace::to_json`] and [`Workspace::from_json`] define the local
//! autosave format. Output is deterministic and carries a format version.

pub mod changes;
pub mod clock;
pub mod config;
pub mod error;
pub mod locks;
pub mod merge;
pub mod model;
pub mod notify;
pub mod persist;
pub mod rebalance;
pub mod snapshot;
pub mod store;
pub mod undo;
pub mod workspace;

// Re-export main types at crate root
pub use changes::{diff_states, ChangeOp, EntityChange, EntityKind, ProjectState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, MergeConfig, PersistConfig, SnapshotConfig, UndoConfig};
pub use error::Error;
pub use locks::{FieldLocks, LockTable, NoLocks};
pub use merge::{
    merge_attachment_set, merge_connection_set, merge_tag_set, merge_text, similarity,
    EntityMerge, MergeEngine, ProjectMerge,
};
pub use model::{Attachment, Connection, Priority, Project, Task, TaskField, TaskStatus};
pub use notify::{Notice, Notifier, RecordingNotifier, TracingNotifier};
pub use persist::{ChangeKind, FlushTicket, PersistScheduler};
pub use rebalance::{CompactSiblingOrder, NoRebalance, Rebalancer};
pub use snapshot::{
    OptimisticOutcome, Snapshot, SnapshotId, SnapshotKind, SnapshotManager, SnapshotStats,
};
pub use store::{FlushBatch, MergeReport, Store};
pub use undo::{Direction, UndoAction, UndoOutcome, UndoTracker};
pub use workspace::{
    JsonClone, StructuralClone, Workspace, WorkspaceCloner, WorkspaceMetadata,
    WORKSPACE_FORMAT_VERSION,
};

/// Type aliases for clarity
pub type TaskId = String;
pub type ProjectId = String;
pub type ConnectionId = String;
pub type Version = u64;
pub type Timestamp = u64;

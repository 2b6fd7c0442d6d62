//! # Weft Sync
//!
//! Tokio host for the [`weft_engine`] store.
//!
//! The engine is synchronous and IO-free. This crate supplies what it
//! leaves to the host:
//!
//! - a [`SyncService`] that owns the store behind an async lock
//! - the debounced flush loop that pushes dirty projects to a [`RemoteStore`]
//! - pulling remote projects and merging them into local state
//! - the local [`AutosaveFile`] written on an interval
//! - a [`NoticeHub`] fanning rollback and conflict notices out to the UI
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use weft_engine::{ChangeKind, EngineConfig, Project, Task, Workspace};
//! use weft_sync::{AutosaveFile, DirectoryRemote, SyncService, TokioClock};
//!
//! # async fn run() -> weft_sync::Result<()> {
//! let workspace = Workspace::new()
//!     .with_active_project(Project::new("inbox", "Inbox").with_task(Task::new("t1", "Plan")));
//!
//! let mut service = SyncService::new(
//!     workspace,
//!     EngineConfig::default(),
//!     Arc::new(DirectoryRemote::new("/tmp/weft-remote")),
//!     AutosaveFile::new("/tmp/weft-autosave.json"),
//!     Arc::new(TokioClock::new()),
//! );
//! service.start().await;
//!
//! service.record(ChangeKind::Content, |project| {
//!     if let Some(task) = project.task_mut("t1") {
//!         task.content = "Draft the roadmap".into();
//!     }
//!     Ok(())
//! })?;
//!
//! service.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod autosave;
pub mod clock;
pub mod config;
pub mod error;
pub mod notify;
pub mod service;
pub mod telemetry;
pub mod transport;

pub use autosave::{AutosaveEnvelope, AutosaveFile};
pub use clock::TokioClock;
pub use config::{ConfigError, SyncConfig};
pub use error::{Result, SyncError};
pub use notify::{NoticeHub, NoticeReceiver, NoticeSender};
pub use service::{FlushReport, SyncService};
pub use telemetry::init_tracing;
pub use transport::{DirectoryRemote, RemoteError, RemoteStore};

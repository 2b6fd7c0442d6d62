//! Error types for the Weft engine.

use crate::ProjectId;
use thiserror::Error;

/// All possible errors from the Weft engine.
///
/// Most failure paths in the engine are recovered internally and surface as
/// outcome enums plus a [`Notice`](crate::Notice). Only the variants below are
/// propagated to callers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Lookup errors
    #[error("project not found: {0}")]
    ProjectNotFound(ProjectId),

    #[error("no active project")]
    NoActiveProject,

    // Capture errors
    #[error("snapshot capture failed: {primary}; fallback: {fallback}")]
    SnapshotCapture { primary: String, fallback: String },

    #[error("clone failed: {0}")]
    Clone(String),

    #[error("mutation failed: {0}")]
    Mutation(String),

    // State errors
    #[error("invalid workspace: {0}")]
    InvalidWorkspace(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

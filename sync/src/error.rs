//! Unified error handling for the sync host.

use crate::config::ConfigError;
use crate::transport::RemoteError;

/// Host error type.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Engine error: {0}")]
    Engine(#[from] weft_engine::Error),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Another recorded mutation holds the store
    #[error("Store is busy")]
    Busy,
}

/// Result type alias for the sync host.
pub type Result<T> = std::result::Result<T, SyncError>;

//! Configuration management for the sync host.

use std::env;
use std::path::PathBuf;
use std::time::Duration;
use weft_engine::EngineConfig;

/// Host configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Where the local autosave is written
    pub autosave_path: PathBuf,
    /// Directory acting as the remote store for the bundled binary
    pub remote_dir: PathBuf,
    /// Project created when the autosave is empty
    pub default_project: String,
    /// How often every known project is pulled; zero disables polling
    pub pull_interval: Duration,
    /// Engine tunables, optionally read from a JSON file
    pub engine: EngineConfig,
}

impl SyncConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let autosave_path = lookup("WEFT_AUTOSAVE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("weft-autosave.json"));

        let remote_dir = lookup("WEFT_REMOTE_DIR")
            .map(PathBuf::from)
            .ok_or(ConfigError::MissingRemoteDir)?;

        let default_project =
            lookup("WEFT_DEFAULT_PROJECT").unwrap_or_else(|| "inbox".to_string());

        let pull_interval_ms: u64 = match lookup("WEFT_PULL_INTERVAL_MS") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidNumber {
                var: "WEFT_PULL_INTERVAL_MS",
                value: raw,
            })?,
            None => 10_000,
        };

        let engine = match lookup("WEFT_ENGINE_CONFIG") {
            Some(path) => {
                let raw = std::fs::read_to_string(&path).map_err(|e| {
                    ConfigError::EngineConfig(format!("cannot read {path}: {e}"))
                })?;
                serde_json::from_str(&raw)
                    .map_err(|e| ConfigError::EngineConfig(format!("invalid {path}: {e}")))?
            }
            None => EngineConfig::default(),
        };

        Ok(Self {
            autosave_path,
            remote_dir,
            default_project,
            pull_interval: Duration::from_millis(pull_interval_ms),
            engine,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("WEFT_REMOTE_DIR environment variable is required")]
    MissingRemoteDir,

    #[error("Invalid {var} value: {value}")]
    InvalidNumber { var: &'static str, value: String },

    #[error("Engine config: {0}")]
    EngineConfig(String),
}

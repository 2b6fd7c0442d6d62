//! Tunables for every engine component.
//!
//! All structs deserialize with defaults for missing keys, so a host can
//! override a single value without restating the rest.

use serde::{Deserialize, Serialize};

/// Merge heuristics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MergeConfig {
    /// Content shorter than this (in chars) is never a real conflict
    pub min_conflict_length: usize,
    /// Similarity above this is a near-duplicate edit, merged automatically
    pub high_similarity: f64,
    /// Similarity below this is a wholesale replacement, resolved by LWW
    pub low_similarity: f64,
    /// Canvas offset applied to a conflict copy on both axes
    pub copy_offset: f64,
    /// Appended to the title of a conflict copy
    pub copy_title_suffix: String,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            min_conflict_length: 20,
            high_similarity: 0.9,
            low_similarity: 0.3,
            copy_offset: 40.0,
            copy_title_suffix: " (conflict copy)".to_string(),
        }
    }
}

/// Snapshot retention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SnapshotConfig {
    pub max_snapshots: usize,
    pub max_age_ms: u64,
    /// How often the host sweeps expired snapshots
    pub sweep_interval_ms: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            max_snapshots: 20,
            max_age_ms: 5 * 60 * 1000,
            sweep_interval_ms: 60 * 1000,
        }
    }
}

/// Undo history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UndoConfig {
    pub max_history: usize,
    /// Largest version gap for which a forced replay is offered
    pub force_window: u64,
}

impl Default for UndoConfig {
    fn default() -> Self {
        Self {
            max_history: 50,
            force_window: 5,
        }
    }
}

/// Flush debounce and local autosave cadence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistConfig {
    pub content_debounce_ms: u64,
    pub structural_debounce_ms: u64,
    pub position_debounce_ms: u64,
    pub autosave_interval_ms: u64,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            content_debounce_ms: 800,
            structural_debounce_ms: 200,
            position_debounce_ms: 1500,
            autosave_interval_ms: 30 * 1000,
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub merge: MergeConfig,
    pub snapshots: SnapshotConfig,
    pub undo: UndoConfig,
    pub persist: PersistConfig,
}

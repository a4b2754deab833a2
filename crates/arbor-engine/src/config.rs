//! Engine and reconciler configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Sequence alignment algorithm used by the AST differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffAlgorithm {
    #[default]
    Myers,
    Patience,
    Histogram,
}

/// Conflict policy for structurally overlapping patches. `Merge` currently
/// rejects overlapping plans at validation; see DESIGN.md.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictResolution {
    #[default]
    Merge,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Pending changes that trigger a background apply.
    pub batch_threshold: usize,
    /// Oldest-change age that forces a batch to emit.
    #[serde(with = "duration_millis")]
    pub batch_timeout: Duration,
    /// Shadow memory ceiling in bytes.
    pub max_shadow_memory: u64,
    pub diff_algorithm: DiffAlgorithm,
    pub enable_metrics: bool,
    /// Fraction of `max_shadow_memory` at which caches are released.
    pub gc_threshold: f64,
    /// Bounded entry count for the diff memo cache.
    pub diff_cache_entries: usize,
    /// Enable subtree-hash skipping in the differ.
    pub tree_hashing: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            batch_threshold: 5,
            batch_timeout: Duration::from_millis(500),
            max_shadow_memory: 100 * 1024 * 1024,
            diff_algorithm: DiffAlgorithm::Myers,
            enable_metrics: true,
            gc_threshold: 0.8,
            diff_cache_entries: 256,
            tree_hashing: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    pub max_concurrency: usize,
    pub conflict_resolution: ConflictResolution,
    pub dependency_ordering: bool,
    pub validation_enabled: bool,
    pub rollback_enabled: bool,
    /// Hard plan-size limit; plans above it fail validation.
    pub max_patch_size: usize,
    /// Soft limit that only logs a warning.
    pub soft_patch_size: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        ReconcilerConfig {
            max_concurrency: 4,
            conflict_resolution: ConflictResolution::Merge,
            dependency_ordering: true,
            validation_enabled: true,
            rollback_enabled: true,
            max_patch_size: 1000,
            soft_patch_size: 500,
        }
    }
}

pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(de)?;
        Ok(Duration::from_millis(millis))
    }
}

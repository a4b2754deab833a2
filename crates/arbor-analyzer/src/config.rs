//! Incremental analyzer configuration

use serde::{Deserialize, Serialize};

/// How file versions are computed between cycles.
///
/// `Hash` and `Content` both use SHA-256 (hex): `Hash` keeps the first 32
/// characters as the version token, `Content` the full 64.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeDetection {
    /// Modification timestamp at nanosecond precision.
    #[default]
    Mtime,
    Hash,
    Content,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IncrementalConfig {
    pub enable_vge: bool,
    pub cache_enabled: bool,
    /// Entry bound on the AST cache.
    pub max_cache_size: usize,
    pub change_detection: ChangeDetection,
    /// Reverse-dependency traversal depth when estimating blast radius.
    pub incremental_depth: usize,
    pub parallel_processing: bool,
}

impl Default for IncrementalConfig {
    fn default() -> Self {
        IncrementalConfig {
            enable_vge: true,
            cache_enabled: true,
            max_cache_size: 1000,
            change_detection: ChangeDetection::Mtime,
            incremental_depth: 3,
            parallel_processing: true,
        }
    }
}

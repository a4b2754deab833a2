//! Results handed back to callers of the incremental analyzer

use std::time::Duration;

use arbor_core::{CodeGraph, RelationshipMetrics};
use serde::{Deserialize, Serialize};

use crate::detect::FileChange;
use crate::impact::ImpactSummary;

/// A per-file failure that did not abort the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisError {
    pub path: String,
    /// Logical kind tag, e.g. "parse" or "diff".
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total: Duration,
    pub detect: Duration,
    pub parse: Duration,
    pub diff: Duration,
    pub engine: Duration,
    pub relationships: Duration,
    pub files_processed: usize,
    pub cache_hit_rate: f64,
    pub memory_bytes: u64,
}

/// Outcome of one `analyze_changes` cycle.
#[derive(Debug, Clone)]
pub struct IncrementalResult {
    /// Deep copy of the actual graph after the cycle.
    pub updated_graph: CodeGraph,
    pub processed_changes: Vec<FileChange>,
    pub impact_analysis: ImpactSummary,
    pub relationships: RelationshipMetrics,
    pub performance_metrics: PerformanceMetrics,
    pub errors: Vec<AnalysisError>,
}

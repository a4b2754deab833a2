//! Arbor Engine — AST differ, change batcher, reconciler, and the virtual
//! graph engine coordinating them

pub mod batcher;
pub mod cancel;
pub mod change;
pub mod config;
pub mod differ;
pub mod error;
pub mod metrics;
pub mod plan;
pub mod reconciler;
pub mod vge;

#[cfg(test)]
pub mod tests;

pub use batcher::{ChangeBatch, ChangeBatcher};
pub use cancel::CancelToken;
pub use change::{ChangeSet, ChangeType, FieldChange};
pub use config::{ConflictResolution, DiffAlgorithm, EngineConfig, ReconcilerConfig};
pub use differ::{
    classify_symbols, AstDiff, DiffNodeRecord, Differ, ImpactAnalysis, SymbolChangeSet,
    SymbolRename,
};
pub use error::EngineError;
pub use metrics::{StageDurations, VgeMetrics};
pub use plan::{EntityFamily, GraphPatch, PatchType, PropertyChange, ReconciliationPlan, TokenDelta};
pub use reconciler::{ApplyReport, Reconciler};
pub use vge::{PostApplyHook, ProcessReport, VirtualGraphEngine};

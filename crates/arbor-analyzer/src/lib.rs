//! Arbor Analyzer — incremental analysis and relationship derivation

pub mod cache;
pub mod config;
pub mod detect;
pub mod impact;
pub mod incremental;
pub mod relationships;
pub mod result;
pub mod scan;


pub use cache::AstCache;
pub use config::{ChangeDetection, IncrementalConfig};
pub use detect::{FileChange, FileChangeKind};
pub use impact::ImpactSummary;
pub use incremental::IncrementalAnalyzer;
pub use result::{AnalysisError, IncrementalResult, PerformanceMetrics};
pub use scan::scan_repository;

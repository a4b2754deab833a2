//! Arbor Core — code graph data model and container

pub mod graph;
pub mod model;

#[cfg(test)]
pub mod tests;

pub use graph::{CodeGraph, ConsistencyError};
pub use model::{
    CircularDependency, EdgeId, EdgeKind, FileNode, GraphEdge, GraphMetadata, GraphNode, Hotspot,
    Import, Language, MetaMap, MetaValue, NodeId, NodeKind, RelationshipMetrics, SourceLocation,
    Symbol, SymbolId, SymbolKind, Visibility,
};

//! Core data structures for the code graph

use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable identifier for a symbol. Encodes the owning file path so ownership
/// can be derived without a back-pointer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SymbolId(pub String);

impl SymbolId {
    /// Id assignment policy: owner path, name, and start line. Identical
    /// input yields an identical id.
    pub fn new(file_path: &str, name: &str, start_line: u32) -> Self {
        SymbolId(format!("sym:{}#{}@{}", file_path, name, start_line))
    }

    /// The owning file path embedded at creation time.
    pub fn owner_path(&self) -> Option<&str> {
        self.0.strip_prefix("sym:")?.split('#').next()
    }
}

impl std::fmt::Display for SymbolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Graph-level node identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn for_file(path: &str) -> Self {
        NodeId(format!("file:{}", path))
    }

    pub fn for_symbol(id: &SymbolId) -> Self {
        NodeId(id.0.clone())
    }

    /// Synthetic endpoint for imports that resolve outside the repository.
    pub fn external(import_path: &str) -> Self {
        NodeId(format!("external-{}", import_path))
    }

    pub fn is_external(&self) -> bool {
        self.0.starts_with("external-")
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Directed edge identifier, derived from endpoints and kind.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeId(pub String);

impl EdgeId {
    pub fn derive(source: &NodeId, target: &NodeId, kind: EdgeKind) -> Self {
        EdgeId(format!("{}->{}:{}", source.0, target.0, kind.tag()))
    }
}

impl std::fmt::Display for EdgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Languages the engine accepts. Anything else fails classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Language {
    TypeScript,
    JavaScript,
    Json,
    Yaml,
}

impl Language {
    /// Detect language from file extension. `None` means unsupported.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("ts") | Some("tsx") => Some(Language::TypeScript),
            Some("js") | Some("jsx") => Some(Language::JavaScript),
            Some("json") => Some(Language::Json),
            Some("yaml") | Some("yml") => Some(Language::Yaml),
            _ => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Language::TypeScript => "typescript",
            Language::JavaScript => "javascript",
            Language::Json => "json",
            Language::Yaml => "yaml",
        }
    }
}

/// Discriminates what kind of code entity a symbol represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymbolKind {
    Function,
    Method,
    Class,
    Interface,
    Type,
    Variable,
    Namespace,
    Import,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Visibility {
    Public,
    Protected,
    Private,
    #[default]
    Unspecified,
}

/// Start/end position of a symbol in its source file. Lines and columns are
/// zero-based, matching tree-sitter points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceLocation {
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

impl SourceLocation {
    /// Line-range overlap check used by rename fusion.
    pub fn overlaps_within(&self, other: &SourceLocation, tolerance: u32) -> bool {
        let self_start = self.start_line.saturating_sub(tolerance);
        let self_end = self.end_line.saturating_add(tolerance);
        other.start_line <= self_end && other.end_line >= self_start
    }
}

/// A named entity extracted from a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    pub id: SymbolId,
    pub name: String,
    pub kind: SymbolKind,
    pub language: Language,
    pub location: SourceLocation,
    pub signature: String,
    pub documentation: Option<String>,
    pub visibility: Visibility,
    pub qualified_name: String,
}

/// An import statement attached to a FileNode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Import {
    /// Import path exactly as written in source.
    pub path: String,
    pub specifiers: Vec<String>,
    pub is_default: bool,
    pub is_relative: bool,
    pub line: u32,
}

/// One per included source file. Exclusively owns its symbols.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileNode {
    /// Repository-relative path.
    pub path: String,
    pub language: Language,
    pub size_bytes: u64,
    pub line_count: u32,
    pub symbol_count: u32,
    pub import_count: u32,
    pub is_test: bool,
    pub is_generated: bool,
    pub modified_at: SystemTime,
    /// Owned symbol ids, in extraction order.
    pub symbols: Vec<SymbolId>,
    pub imports: Vec<Import>,
}

/// Graph node family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    File,
    Symbol,
    External,
}

/// A graph-level node: one per FileNode, one per Symbol, plus synthetic
/// external import targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub label: String,
    pub file_path: String,
    pub metadata: MetaMap,
}

/// What kind of relationship an edge represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    Imports,
    Calls,
    Extends,
    Implements,
    References,
    Contains,
    Uses,
    Depends,
}

impl EdgeKind {
    pub fn tag(&self) -> &'static str {
        match self {
            EdgeKind::Imports => "imports",
            EdgeKind::Calls => "calls",
            EdgeKind::Extends => "extends",
            EdgeKind::Implements => "implements",
            EdgeKind::References => "references",
            EdgeKind::Contains => "contains",
            EdgeKind::Uses => "uses",
            EdgeKind::Depends => "depends",
        }
    }
}

/// A directed relationship between two graph nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    pub kind: EdgeKind,
    pub weight: f64,
    pub metadata: MetaMap,
}

// ── Metadata ────────────────────────────────────────────

/// Tagged metadata value. `Json` is the pass-through variant for consumers
/// that only need opaque payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetaValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Relationships(RelationshipMetrics),
    Json(serde_json::Value),
}

pub type MetaMap = BTreeMap<String, MetaValue>;

/// Graph-level metadata, refreshed at the end of each analysis cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphMetadata {
    pub generated_at: DateTime<Utc>,
    pub version: String,
    pub total_files: u32,
    pub total_symbols: u32,
    pub languages: BTreeMap<Language, u32>,
    pub analysis_duration: Duration,
    pub config: MetaMap,
}

impl Default for GraphMetadata {
    fn default() -> Self {
        GraphMetadata {
            generated_at: DateTime::<Utc>::UNIX_EPOCH,
            version: env!("CARGO_PKG_VERSION").to_string(),
            total_files: 0,
            total_symbols: 0,
            languages: BTreeMap::new(),
            analysis_duration: Duration::ZERO,
            config: MetaMap::new(),
        }
    }
}

// ── Derived relationship results ────────────────────────

/// One import cycle: the ordered file list closing back on the first entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircularDependency {
    pub files: Vec<String>,
    /// The file the back edge points at.
    pub back_edge_target: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hotspot {
    pub path: String,
    pub score: f64,
    pub import_count: u32,
    pub reference_count: u32,
}

/// Output of the relationship analyzer, attached to graph metadata and
/// returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RelationshipMetrics {
    pub import_edges: u32,
    pub reference_edges: u32,
    pub external_edges: u32,
    pub contains_edges: u32,
    pub extends_edges: u32,
    pub implements_edges: u32,
    pub cycles: Vec<CircularDependency>,
    pub hotspots: Vec<Hotspot>,
    pub isolates: Vec<String>,
}

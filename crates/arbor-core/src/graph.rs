//! The code graph container: files, symbols, nodes, edges, metadata
//!
//! A passive data structure. Writers are the reconciler applying a plan and
//! the shadow-application path inside the engine; everyone else gets deep
//! copies or read-only views.

use std::collections::BTreeMap;

use crate::model::*;

/// Raised by `check_consistency` when any data-model invariant is broken.
#[derive(Debug, thiserror::Error)]
#[error("graph consistency check failed: {}", violations.join("; "))]
pub struct ConsistencyError {
    pub violations: Vec<String>,
}

/// In-memory code graph. All entities are owned; `clone` produces a fully
/// independent copy, which is what the shadow/actual machinery relies on.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct CodeGraph {
    files: BTreeMap<String, FileNode>,
    symbols: BTreeMap<SymbolId, Symbol>,
    nodes: BTreeMap<NodeId, GraphNode>,
    edges: BTreeMap<EdgeId, GraphEdge>,
    pub metadata: GraphMetadata,
}

impl CodeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Files ───────────────────────────────────────────

    pub fn insert_file(&mut self, file: FileNode) -> Option<FileNode> {
        self.files.insert(file.path.clone(), file)
    }

    /// Remove the file entry only. Owned symbols, graph nodes, and incident
    /// edges are separate entities with their own removal ops; use
    /// `remove_file_cascade` when the whole slice should go.
    pub fn remove_file(&mut self, path: &str) -> Option<FileNode> {
        self.files.remove(path)
    }

    /// Destroy a file and everything it owns: its symbols, its file and
    /// symbol graph nodes, and all edges incident to any of them.
    pub fn remove_file_cascade(&mut self, path: &str) -> Option<FileNode> {
        let file = self.files.remove(path)?;
        for sym_id in &file.symbols {
            self.symbols.remove(sym_id);
            let node_id = NodeId::for_symbol(sym_id);
            self.nodes.remove(&node_id);
            self.remove_edges_incident(&node_id);
        }
        let file_node_id = NodeId::for_file(path);
        self.nodes.remove(&file_node_id);
        self.remove_edges_incident(&file_node_id);
        Some(file)
    }

    pub fn file(&self, path: &str) -> Option<&FileNode> {
        self.files.get(path)
    }

    pub fn file_mut(&mut self, path: &str) -> Option<&mut FileNode> {
        self.files.get_mut(path)
    }

    pub fn files(&self) -> impl Iterator<Item = &FileNode> {
        self.files.values()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    // ── Symbols ─────────────────────────────────────────

    pub fn insert_symbol(&mut self, symbol: Symbol) -> Option<Symbol> {
        self.symbols.insert(symbol.id.clone(), symbol)
    }

    pub fn remove_symbol(&mut self, id: &SymbolId) -> Option<Symbol> {
        self.symbols.remove(id)
    }

    pub fn symbol(&self, id: &SymbolId) -> Option<&Symbol> {
        self.symbols.get(id)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.values()
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    /// Owning file of a symbol, derived from the id-assignment policy rather
    /// than a stored back-pointer.
    pub fn owning_file(&self, id: &SymbolId) -> Option<&FileNode> {
        let path = id.owner_path()?;
        let file = self.files.get(path)?;
        file.symbols.contains(id).then_some(file)
    }

    // ── Graph nodes ─────────────────────────────────────

    pub fn insert_node(&mut self, node: GraphNode) -> Option<GraphNode> {
        self.nodes.insert(node.id.clone(), node)
    }

    pub fn remove_node(&mut self, id: &NodeId) -> Option<GraphNode> {
        self.nodes.remove(id)
    }

    pub fn node(&self, id: &NodeId) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    // ── Edges ───────────────────────────────────────────

    pub fn insert_edge(&mut self, edge: GraphEdge) -> Option<GraphEdge> {
        self.edges.insert(edge.id.clone(), edge)
    }

    pub fn remove_edge(&mut self, id: &EdgeId) -> Option<GraphEdge> {
        self.edges.remove(id)
    }

    pub fn edge(&self, id: &EdgeId) -> Option<&GraphEdge> {
        self.edges.get(id)
    }

    pub fn edges(&self) -> impl Iterator<Item = &GraphEdge> {
        self.edges.values()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn edges_from<'a>(&'a self, source: &'a NodeId) -> impl Iterator<Item = &'a GraphEdge> {
        self.edges.values().filter(move |e| &e.source == source)
    }

    pub fn edges_to<'a>(&'a self, target: &'a NodeId) -> impl Iterator<Item = &'a GraphEdge> {
        self.edges.values().filter(move |e| &e.target == target)
    }

    /// Drop every edge touching the given node.
    pub fn remove_edges_incident(&mut self, node: &NodeId) -> usize {
        let doomed: Vec<EdgeId> = self
            .edges
            .values()
            .filter(|e| &e.source == node || &e.target == node)
            .map(|e| e.id.clone())
            .collect();
        let count = doomed.len();
        for id in doomed {
            self.edges.remove(&id);
        }
        count
    }

    /// Drop every edge of the given kind. Used when derived relationships
    /// are recomputed from scratch.
    pub fn remove_edges_of_kind(&mut self, kind: EdgeKind) -> usize {
        let doomed: Vec<EdgeId> = self
            .edges
            .values()
            .filter(|e| e.kind == kind)
            .map(|e| e.id.clone())
            .collect();
        let count = doomed.len();
        for id in doomed {
            self.edges.remove(&id);
        }
        count
    }

    // ── Whole-graph operations ──────────────────────────

    /// Independent copy sharing no mutable state with `self`.
    pub fn deep_copy(&self) -> CodeGraph {
        self.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.symbols.is_empty() && self.nodes.is_empty() && self.edges.is_empty()
    }

    pub fn clear(&mut self) {
        self.files.clear();
        self.symbols.clear();
        self.nodes.clear();
        self.edges.clear();
        self.metadata = GraphMetadata {
            version: self.metadata.version.clone(),
            ..GraphMetadata::default()
        };
    }

    /// Recompute totals and the language histogram from current contents.
    /// Deterministic: does not touch timestamps.
    pub fn refresh_metadata_totals(&mut self) {
        self.metadata.total_files = self.files.len() as u32;
        self.metadata.total_symbols = self.symbols.len() as u32;
        let mut histogram = BTreeMap::new();
        for file in self.files.values() {
            *histogram.entry(file.language).or_insert(0u32) += 1;
        }
        self.metadata.languages = histogram;
    }

    /// Verify the data-model invariants. Used by tests and by the engine
    /// after atomic applies in debug paths.
    pub fn check_consistency(&self) -> Result<(), ConsistencyError> {
        let mut violations = Vec::new();

        // Symbol ownership: every listed id resolves, every symbol is listed
        // by exactly one file.
        let mut listed: BTreeMap<&SymbolId, Vec<&str>> = BTreeMap::new();
        for file in self.files.values() {
            for sym_id in &file.symbols {
                listed.entry(sym_id).or_default().push(&file.path);
                if !self.symbols.contains_key(sym_id) {
                    violations.push(format!(
                        "file {} lists missing symbol {}",
                        file.path, sym_id
                    ));
                }
            }
        }
        for (sym_id, owners) in &listed {
            if owners.len() > 1 {
                violations.push(format!(
                    "symbol {} listed by {} files",
                    sym_id,
                    owners.len()
                ));
            }
        }
        for sym_id in self.symbols.keys() {
            if !listed.contains_key(sym_id) {
                violations.push(format!("symbol {} not listed by any file", sym_id));
            }
        }

        // Node families mirror files and symbols.
        for file in self.files.values() {
            if !self.nodes.contains_key(&NodeId::for_file(&file.path)) {
                violations.push(format!("file {} has no graph node", file.path));
            }
        }
        for sym_id in self.symbols.keys() {
            if !self.nodes.contains_key(&NodeId::for_symbol(sym_id)) {
                violations.push(format!("symbol {} has no graph node", sym_id));
            }
        }
        for node in self.nodes.values() {
            match node.kind {
                NodeKind::File => {
                    if !self.files.contains_key(&node.file_path) {
                        violations.push(format!("file node {} has no FileNode", node.id));
                    }
                }
                NodeKind::Symbol => {
                    if !self.symbols.contains_key(&SymbolId(node.id.0.clone())) {
                        violations.push(format!("symbol node {} has no Symbol", node.id));
                    }
                }
                NodeKind::External => {
                    if !node.id.is_external() {
                        violations.push(format!("external node {} lacks external id form", node.id));
                    }
                }
            }
        }

        // Edge endpoints exist or are well-formed external ids.
        for edge in self.edges.values() {
            for endpoint in [&edge.source, &edge.target] {
                if !endpoint.is_external() && !self.nodes.contains_key(endpoint) {
                    violations.push(format!(
                        "edge {} references missing node {}",
                        edge.id, endpoint
                    ));
                }
            }
        }

        // Histogram agrees with file contents.
        let mut histogram: BTreeMap<Language, u32> = BTreeMap::new();
        for file in self.files.values() {
            *histogram.entry(file.language).or_insert(0) += 1;
        }
        if histogram != self.metadata.languages {
            violations.push("language histogram does not match file counts".to_string());
        }

        // Import edges between two in-repo files must be backed by an Import
        // record in the source file.
        for edge in self.edges.values() {
            if edge.kind != EdgeKind::Imports || edge.target.is_external() {
                continue;
            }
            let Some(source_path) = edge.source.0.strip_prefix("file:") else {
                violations.push(format!("imports edge {} from non-file node", edge.id));
                continue;
            };
            match self.files.get(source_path) {
                Some(file) if !file.imports.is_empty() => {}
                Some(_) => violations.push(format!(
                    "imports edge {} has no Import record in {}",
                    edge.id, source_path
                )),
                None => {}
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ConsistencyError { violations })
        }
    }
}

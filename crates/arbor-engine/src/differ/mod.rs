//! AST differ
//!
//! Computes structural differences between two AST versions of a file.
//! Recursion skips subtrees with equal hashes and aligns child sequences
//! with the configured algorithm; unmatched same-kind pairs are re-paired
//! and descended into so a single edited leaf deep in a tree does not read
//! as a whole-subtree replacement.

pub mod align;
pub mod symbols;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use arbor_core::SourceLocation;
use arbor_parser::{AstNode, SourceAst};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::{DiffAlgorithm, EngineConfig};
use crate::error::EngineError;

use align::{align, AlignOp};

pub use symbols::{classify_symbols, SymbolChangeSet, SymbolRename};

const EXCERPT_LEN: usize = 120;

/// A syntactic node as reported in a diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffNodeRecord {
    pub id: String,
    pub kind: String,
    pub text: String,
    pub location: SourceLocation,
    pub depth: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifiedNode {
    pub before: DiffNodeRecord,
    pub after: DiffNodeRecord,
}

/// Propagation tree rooted at the changed file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropagationNode {
    pub id: String,
    pub children: Vec<PropagationNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactAnalysis {
    pub affected_files: Vec<String>,
    pub affected_symbols: Vec<String>,
    pub propagation: PropagationNode,
    pub risk_score: f64,
    pub recommendations: Vec<String>,
}

/// Structural difference between two AST versions of one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AstDiff {
    pub path: String,
    pub old_version: String,
    pub new_version: String,
    pub added: Vec<DiffNodeRecord>,
    pub deleted: Vec<DiffNodeRecord>,
    pub modified: Vec<ModifiedNode>,
    /// True iff the tree shape changed, not only leaf text.
    pub structural_changes: bool,
    /// Matched nodes over the union of both trees, in [0,1].
    pub similarity: f64,
    pub impact: ImpactAnalysis,
    /// Stable hash of the diff, usable as a cache key downstream.
    pub content_hash: String,
}

impl AstDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.deleted.is_empty() && self.modified.is_empty()
    }

    pub fn change_count(&self) -> usize {
        self.added.len() + self.deleted.len() + self.modified.len()
    }
}

struct CacheInner {
    entries: HashMap<(String, String, String), Arc<AstDiff>>,
    order: VecDeque<(String, String, String)>,
    hits: u64,
    misses: u64,
}

/// The AST differ with its bounded memoization cache.
pub struct Differ {
    algorithm: DiffAlgorithm,
    tree_hashing: bool,
    max_entries: usize,
    cache: Mutex<CacheInner>,
}

impl Differ {
    pub fn new(config: &EngineConfig) -> Self {
        Differ {
            algorithm: config.diff_algorithm,
            tree_hashing: config.tree_hashing,
            max_entries: config.diff_cache_entries.max(1),
            cache: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                hits: 0,
                misses: 0,
            }),
        }
    }

    /// Diff two versions of the same file. Results are memoized by
    /// (path, old version, new version).
    pub fn diff(&self, old: &SourceAst, new: &SourceAst) -> Result<Arc<AstDiff>, EngineError> {
        if old.path != new.path {
            return Err(EngineError::Diff {
                path: new.path.clone(),
                message: format!("version pair spans two paths: {} vs {}", old.path, new.path),
            });
        }
        if old.root.kind == "ERROR" || new.root.kind == "ERROR" {
            return Err(EngineError::Diff {
                path: new.path.clone(),
                message: "malformed tree".to_string(),
            });
        }

        let key = (old.path.clone(), old.version.clone(), new.version.clone());
        if let Some(cached) = self.cache_get(&key) {
            return Ok(cached);
        }

        let diff = Arc::new(self.compute(old, new));
        self.cache_put(key, diff.clone());
        Ok(diff)
    }

    fn compute(&self, old: &SourceAst, new: &SourceAst) -> AstDiff {
        let mut state = DiffState {
            algorithm: self.algorithm,
            tree_hashing: self.tree_hashing,
            old,
            new,
            added: Vec::new(),
            deleted: Vec::new(),
            modified: Vec::new(),
            matched: 0,
        };
        state.diff_pair(&old.root, &new.root);

        let old_count = old.node_count();
        let new_count = new.node_count();
        let union = (old_count + new_count).saturating_sub(state.matched);
        let similarity = if union == 0 {
            1.0
        } else {
            (state.matched as f64 / union as f64).clamp(0.0, 1.0)
        };

        let structural_changes = !state.added.is_empty() || !state.deleted.is_empty();

        let impact = build_impact(
            old,
            new,
            &state.added,
            &state.deleted,
            &state.modified,
            structural_changes,
            union,
        );

        let content_hash = diff_hash(old, new, &state);

        AstDiff {
            path: new.path.clone(),
            old_version: old.version.clone(),
            new_version: new.version.clone(),
            added: state.added,
            deleted: state.deleted,
            modified: state.modified,
            structural_changes,
            similarity,
            impact,
            content_hash,
        }
    }

    // ── Memo cache ──────────────────────────────────────

    fn cache_get(&self, key: &(String, String, String)) -> Option<Arc<AstDiff>> {
        let mut cache = self.cache.lock().ok()?;
        if let Some(found) = cache.entries.get(key).cloned() {
            cache.hits += 1;
            // Refresh recency.
            if let Some(pos) = cache.order.iter().position(|k| k == key) {
                let k = cache.order.remove(pos);
                if let Some(k) = k {
                    cache.order.push_back(k);
                }
            }
            Some(found)
        } else {
            cache.misses += 1;
            None
        }
    }

    fn cache_put(&self, key: (String, String, String), diff: Arc<AstDiff>) {
        let Ok(mut cache) = self.cache.lock() else {
            return;
        };
        if cache.entries.insert(key.clone(), diff).is_none() {
            cache.order.push_back(key);
        }
        while cache.entries.len() > self.max_entries {
            if let Some(oldest) = cache.order.pop_front() {
                cache.entries.remove(&oldest);
            } else {
                break;
            }
        }
    }

    /// Release up to `count` least-recently-used entries. Returns how many
    /// were dropped.
    pub fn evict_lru(&self, count: usize) -> usize {
        let Ok(mut cache) = self.cache.lock() else {
            return 0;
        };
        let mut dropped = 0;
        for _ in 0..count {
            match cache.order.pop_front() {
                Some(oldest) => {
                    cache.entries.remove(&oldest);
                    dropped += 1;
                }
                None => break,
            }
        }
        dropped
    }

    /// Drop cached diffs for one path.
    pub fn invalidate_path(&self, path: &str) {
        let Ok(mut cache) = self.cache.lock() else {
            return;
        };
        cache.order.retain(|key| key.0 != path);
        cache.entries.retain(|key, _| key.0 != path);
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().map(|c| c.entries.len()).unwrap_or(0)
    }

    pub fn cache_hit_rate(&self) -> f64 {
        match self.cache.lock() {
            Ok(cache) => {
                let total = cache.hits + cache.misses;
                if total == 0 {
                    0.0
                } else {
                    cache.hits as f64 / total as f64
                }
            }
            Err(_) => 0.0,
        }
    }
}

struct DiffState<'a> {
    algorithm: DiffAlgorithm,
    tree_hashing: bool,
    old: &'a SourceAst,
    new: &'a SourceAst,
    added: Vec<DiffNodeRecord>,
    deleted: Vec<DiffNodeRecord>,
    modified: Vec<ModifiedNode>,
    matched: usize,
}

impl<'a> DiffState<'a> {
    /// Diff two nodes already paired by kind.
    fn diff_pair(&mut self, old_node: &AstNode, new_node: &AstNode) {
        if self.tree_hashing && old_node.subtree_hash == new_node.subtree_hash {
            self.matched += old_node.subtree_size();
            return;
        }
        // The pair itself matches; differences live below.
        self.matched += 1;

        if old_node.is_leaf() && new_node.is_leaf() {
            if self.old.node_text(old_node) != self.new.node_text(new_node) {
                self.modified.push(ModifiedNode {
                    before: record(self.old, old_node),
                    after: record(self.new, new_node),
                });
            }
            return;
        }

        let old_tokens: Vec<u64> = old_node.children.iter().map(|c| c.subtree_hash).collect();
        let new_tokens: Vec<u64> = new_node.children.iter().map(|c| c.subtree_hash).collect();
        let ops = align(&old_tokens, &new_tokens, self.algorithm);

        // Matched children are hash-equal whole subtrees. Deletes and
        // inserts re-pair by kind in order and the pairs are descended
        // into; a leftover delete facing a leftover insert is a positional
        // substitution and reads as a modification, not a shape change.
        let mut pending_deletes: VecDeque<&AstNode> = VecDeque::new();
        let mut pending_inserts: VecDeque<&AstNode> = VecDeque::new();
        for op in &ops {
            match *op {
                AlignOp::Match { old, .. } => {
                    self.matched += old_node.children[old].subtree_size();
                }
                AlignOp::Delete { old } => pending_deletes.push_back(&old_node.children[old]),
                AlignOp::Insert { new } => pending_inserts.push_back(&new_node.children[new]),
            }
        }

        while let Some(old_child) = pending_deletes.pop_front() {
            let repaired = pending_inserts
                .iter()
                .position(|candidate| candidate.kind == old_child.kind)
                .and_then(|position| pending_inserts.remove(position));
            if let Some(new_child) = repaired {
                self.diff_pair(old_child, new_child);
            } else if let Some(new_child) = pending_inserts.pop_front() {
                self.matched += 1;
                self.modified.push(ModifiedNode {
                    before: record(self.old, old_child),
                    after: record(self.new, new_child),
                });
            } else {
                self.record_deleted(old_child);
            }
        }
        for new_child in pending_inserts {
            self.record_added(new_child);
        }
    }

    fn record_deleted(&mut self, node: &AstNode) {
        node.walk(&mut |n| self.deleted.push(record(self.old, n)));
    }

    fn record_added(&mut self, node: &AstNode) {
        node.walk(&mut |n| self.added.push(record(self.new, n)));
    }
}

fn record(ast: &SourceAst, node: &AstNode) -> DiffNodeRecord {
    DiffNodeRecord {
        id: node.id.clone(),
        kind: node.kind.clone(),
        text: ast.node_excerpt(node, EXCERPT_LEN),
        location: node.location,
        depth: node.depth,
    }
}

#[allow(clippy::too_many_arguments)]
fn build_impact(
    old: &SourceAst,
    new: &SourceAst,
    added: &[DiffNodeRecord],
    deleted: &[DiffNodeRecord],
    modified: &[ModifiedNode],
    structural: bool,
    union: usize,
) -> ImpactAnalysis {
    // Symbols whose line ranges intersect any changed record.
    let mut touched_lines: Vec<(u32, u32)> = Vec::new();
    for rec in added {
        touched_lines.push((rec.location.start_line, rec.location.end_line));
    }
    for rec in deleted {
        touched_lines.push((rec.location.start_line, rec.location.end_line));
    }
    for pair in modified {
        touched_lines.push((pair.before.location.start_line, pair.before.location.end_line));
        touched_lines.push((pair.after.location.start_line, pair.after.location.end_line));
    }

    let mut affected_symbols = Vec::new();
    for symbol in arbor_parser::extract::extract_symbols(new)
        .into_iter()
        .chain(arbor_parser::extract::extract_symbols(old))
    {
        let range = (symbol.location.start_line, symbol.location.end_line);
        let touched = touched_lines
            .iter()
            .any(|(start, end)| *start <= range.1 && *end >= range.0);
        if touched && !affected_symbols.contains(&symbol.name) {
            affected_symbols.push(symbol.name);
        }
    }

    let propagation = PropagationNode {
        id: new.path.clone(),
        children: affected_symbols
            .iter()
            .map(|name| PropagationNode {
                id: format!("{}#{}", new.path, name),
                children: Vec::new(),
            })
            .collect(),
    };

    let union = union.max(1) as f64;
    let risk_score = (0.8 * deleted.len() as f64 / union
        + 0.5 * modified.len() as f64 / union
        + 0.1 * added.len() as f64 / union)
        .clamp(0.0, 1.0);

    let mut recommendations = Vec::new();
    if risk_score > 0.5 {
        recommendations.push("large structural change; review dependent files".to_string());
    }
    if structural && !deleted.is_empty() {
        recommendations.push("nodes were removed; check for dangling references".to_string());
    }
    if !structural && !modified.is_empty() {
        recommendations.push("leaf-only edit; signature changes may still affect callers".to_string());
    }

    ImpactAnalysis {
        affected_files: vec![new.path.clone()],
        affected_symbols,
        propagation,
        risk_score,
        recommendations,
    }
}

fn diff_hash(old: &SourceAst, new: &SourceAst, state: &DiffState<'_>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(new.path.as_bytes());
    hasher.update(old.version.as_bytes());
    hasher.update(new.version.as_bytes());
    hasher.update((state.added.len() as u64).to_le_bytes());
    hasher.update((state.deleted.len() as u64).to_le_bytes());
    hasher.update((state.modified.len() as u64).to_le_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(32);
    for byte in digest.iter().take(16) {
        use std::fmt::Write;
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

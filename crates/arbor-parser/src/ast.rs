//! Owned AST representation
//!
//! Trees are detached from tree-sitter at parse time so they can live in
//! caches and cross thread boundaries freely. Every node carries a
//! structural id and a subtree hash; the differ keys on both.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use arbor_core::{Language, SourceLocation};
use serde::{Deserialize, Serialize};

/// A single syntactic node. `id` encodes the path from the root (child
/// indices), so two parses of identical content assign identical ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AstNode {
    pub id: String,
    pub kind: String,
    pub start_byte: usize,
    pub end_byte: usize,
    pub location: SourceLocation,
    pub depth: u32,
    /// Hash over kind, leaf text, and child hashes. Equal hashes mean the
    /// subtrees are identical and the differ may skip them wholesale.
    pub subtree_hash: u64,
    pub children: Vec<AstNode>,
}

impl AstNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Total node count of this subtree, including self.
    pub fn subtree_size(&self) -> usize {
        1 + self.children.iter().map(AstNode::subtree_size).sum::<usize>()
    }

    /// Preorder walk.
    pub fn walk(&self, visit: &mut impl FnMut(&AstNode)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }
}

/// A parsed file: path, content, opaque version stamp, and the owned tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceAst {
    /// Repository-relative path.
    pub path: String,
    pub language: Language,
    /// Full source content the byte ranges index into.
    pub content: String,
    /// Opaque content stamp; identical content yields an identical stamp.
    pub version: String,
    pub root: AstNode,
    /// Set when the grammar recovered from errors; the tree is partial.
    pub has_errors: bool,
}

impl SourceAst {
    /// Source text of a node.
    pub fn node_text(&self, node: &AstNode) -> &str {
        let end = node.end_byte.min(self.content.len());
        let start = node.start_byte.min(end);
        &self.content[start..end]
    }

    /// Short single-line excerpt for diff records.
    pub fn node_excerpt(&self, node: &AstNode, max_len: usize) -> String {
        let text = self.node_text(node);
        let mut line = text.split('\n').next().unwrap_or("").trim().to_string();
        if line.len() > max_len {
            line.truncate(max_len);
        }
        line
    }

    pub fn node_count(&self) -> usize {
        self.root.subtree_size()
    }
}

/// Bottom-up construction helper used by the tree-sitter adapter and by
/// tests that build synthetic trees.
pub struct AstBuilder;

impl AstBuilder {
    pub fn node(
        id: String,
        kind: &str,
        start_byte: usize,
        end_byte: usize,
        location: SourceLocation,
        depth: u32,
        leaf_text: Option<&str>,
        children: Vec<AstNode>,
    ) -> AstNode {
        let subtree_hash = Self::hash_node(kind, leaf_text, &children);
        AstNode {
            id,
            kind: kind.to_string(),
            start_byte,
            end_byte,
            location,
            depth,
            subtree_hash,
            children,
        }
    }

    fn hash_node(kind: &str, leaf_text: Option<&str>, children: &[AstNode]) -> u64 {
        let mut hasher = DefaultHasher::new();
        kind.hash(&mut hasher);
        if children.is_empty() {
            if let Some(text) = leaf_text {
                text.hash(&mut hasher);
            }
        }
        for child in children {
            child.subtree_hash.hash(&mut hasher);
        }
        hasher.finish()
    }
}

/// Content stamp shared by the parser and the change detector.
pub fn content_version(content: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(content.as_bytes());
    let mut out = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        use std::fmt::Write;
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

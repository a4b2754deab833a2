//! Reconciliation plans and patches
//!
//! A patch is one reversible mutation to a graph entity, carrying its
//! property-level delta and the prior payload needed to invert it.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchType {
    Add,
    Remove,
    Modify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityFamily {
    File,
    Symbol,
    Node,
    Edge,
}

impl EntityFamily {
    pub fn tag(&self) -> &'static str {
        match self {
            EntityFamily::File => "file",
            EntityFamily::Symbol => "symbol",
            EntityFamily::Node => "node",
            EntityFamily::Edge => "edge",
        }
    }
}

/// Property-level delta entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyChange {
    pub property: String,
    pub old: Option<serde_json::Value>,
    pub new: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphPatch {
    pub id: String,
    pub family: EntityFamily,
    pub patch_type: PatchType,
    /// Entity id within the family's namespace.
    pub target: String,
    pub changes: Vec<PropertyChange>,
    /// Patch ids that must apply before this one.
    pub dependencies: Vec<String>,
    pub priority: u8,
    /// Desired entity state for Add/Modify.
    pub payload: Option<serde_json::Value>,
    /// Prior entity state for Remove/Modify; powers `inverse`.
    pub payload_before: Option<serde_json::Value>,
}

impl GraphPatch {
    pub fn patch_id(family: EntityFamily, patch_type: PatchType, target: &str) -> String {
        let type_tag = match patch_type {
            PatchType::Add => "add",
            PatchType::Remove => "remove",
            PatchType::Modify => "modify",
        };
        format!("{}/{}:{}", family.tag(), type_tag, target)
    }

    /// Apply order rank. Removals run before adds, adds before modifies;
    /// within each band, families order so dependencies can be satisfied.
    pub fn rank(family: EntityFamily, patch_type: PatchType) -> u8 {
        match (patch_type, family) {
            (PatchType::Remove, EntityFamily::File) => 1,
            (PatchType::Remove, EntityFamily::Symbol) => 2,
            (PatchType::Remove, EntityFamily::Edge) => 3,
            (PatchType::Remove, EntityFamily::Node) => 4,
            (PatchType::Add, EntityFamily::File) => 5,
            (PatchType::Add, EntityFamily::Node) => 6,
            (PatchType::Add, EntityFamily::Symbol) => 7,
            (PatchType::Add, EntityFamily::Edge) => 8,
            (PatchType::Modify, EntityFamily::File) => 9,
            (PatchType::Modify, EntityFamily::Symbol) => 10,
            (PatchType::Modify, EntityFamily::Node) => 11,
            (PatchType::Modify, EntityFamily::Edge) => 12,
        }
    }

    fn inverse(&self) -> GraphPatch {
        let (patch_type, payload, payload_before) = match self.patch_type {
            PatchType::Add => (PatchType::Remove, None, self.payload.clone()),
            PatchType::Remove => (PatchType::Add, self.payload_before.clone(), None),
            PatchType::Modify => (
                PatchType::Modify,
                self.payload_before.clone(),
                self.payload.clone(),
            ),
        };
        GraphPatch {
            id: GraphPatch::patch_id(self.family, patch_type, &self.target),
            family: self.family,
            patch_type,
            target: self.target.clone(),
            changes: self
                .changes
                .iter()
                .map(|change| PropertyChange {
                    property: change.property.clone(),
                    old: change.new.clone(),
                    new: change.old.clone(),
                })
                .collect(),
            // Ordering ranks alone sequence the inverse correctly.
            dependencies: Vec::new(),
            priority: GraphPatch::rank(self.family, patch_type),
            payload,
            payload_before,
        }
    }
}

/// Advisory token-cost estimate attached to every plan. A deterministic
/// linear model over entity counts; the coefficients are advisory only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenDelta {
    pub before: u64,
    pub after: u64,
    pub delta: i64,
}

const TOKENS_PER_FILE: u64 = 180;
const TOKENS_PER_SYMBOL: u64 = 45;

impl TokenDelta {
    pub fn estimate(actual: &arbor_core::CodeGraph, shadow: &arbor_core::CodeGraph) -> Self {
        let before = Self::tokens(actual);
        let after = Self::tokens(shadow);
        TokenDelta {
            before,
            after,
            delta: after as i64 - before as i64,
        }
    }

    fn tokens(graph: &arbor_core::CodeGraph) -> u64 {
        TOKENS_PER_FILE * graph.file_count() as u64
            + TOKENS_PER_SYMBOL * graph.symbol_count() as u64
    }
}

/// An ordered, validated sequence of patches transforming actual into
/// shadow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationPlan {
    pub id: String,
    pub patches: Vec<GraphPatch>,
    pub token_delta: TokenDelta,
    /// File paths whose memoized diffs must drop after apply.
    pub cache_invalidations: Vec<String>,
    pub created_at: SystemTime,
}

impl ReconciliationPlan {
    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    /// The undo plan: applying it after this plan restores the starting
    /// graph byte-identically.
    pub fn inverse(&self) -> ReconciliationPlan {
        let mut patches: Vec<GraphPatch> = self.patches.iter().map(GraphPatch::inverse).collect();
        patches.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.target.cmp(&b.target)));
        ReconciliationPlan {
            id: format!("{}-inverse", self.id),
            patches,
            token_delta: TokenDelta {
                before: self.token_delta.after,
                after: self.token_delta.before,
                delta: -self.token_delta.delta,
            },
            cache_invalidations: self.cache_invalidations.clone(),
            created_at: SystemTime::now(),
        }
    }
}

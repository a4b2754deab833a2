//! The reconciler: minimal ordered patch plans and atomic application
//!
//! Plan generation is a three-way scan per entity family. Application is
//! all-or-nothing: a deep-copy rollback point is captured first, patches
//! apply sequentially, and any failure or cancellation restores the
//! starting state byte-identically.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant, SystemTime};

use arbor_core::{CodeGraph, EdgeId, FileNode, GraphEdge, GraphNode, NodeId, Symbol, SymbolId};
use serde_json::Value;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::config::ReconcilerConfig;
use crate::error::EngineError;
use crate::plan::{
    EntityFamily, GraphPatch, PatchType, PropertyChange, ReconciliationPlan, TokenDelta,
};

#[derive(Debug, Clone)]
pub struct ApplyReport {
    pub patches_applied: usize,
    pub duration: Duration,
    pub cache_invalidations: Vec<String>,
}

pub struct Reconciler {
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(config: ReconcilerConfig) -> Self {
        Reconciler { config }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    // ── Plan generation ─────────────────────────────────

    /// Build the ordered patch plan that transforms `actual` into `shadow`.
    pub fn build_plan(
        &self,
        actual: &CodeGraph,
        shadow: &CodeGraph,
    ) -> Result<ReconciliationPlan, EngineError> {
        let mut patches = Vec::new();
        let mut invalidations: BTreeSet<String> = BTreeSet::new();

        self.scan_files(actual, shadow, &mut patches, &mut invalidations)?;
        self.scan_symbols(actual, shadow, &mut patches, &mut invalidations)?;
        self.scan_nodes(actual, shadow, &mut patches)?;
        self.scan_edges(actual, shadow, &mut patches)?;

        if self.config.dependency_ordering {
            declare_dependencies(&mut patches);
        }
        order_patches(&mut patches)?;

        let token_delta = TokenDelta::estimate(actual, shadow);
        let id = plan_id(&patches);
        debug!(
            plan = %id,
            patches = patches.len(),
            token_delta = token_delta.delta,
            "built reconciliation plan"
        );

        Ok(ReconciliationPlan {
            id,
            patches,
            token_delta,
            cache_invalidations: invalidations.into_iter().collect(),
            created_at: SystemTime::now(),
        })
    }

    fn scan_files(
        &self,
        actual: &CodeGraph,
        shadow: &CodeGraph,
        patches: &mut Vec<GraphPatch>,
        invalidations: &mut BTreeSet<String>,
    ) -> Result<(), EngineError> {
        for file in shadow.files() {
            match actual.file(&file.path) {
                None => {
                    invalidations.insert(file.path.clone());
                    patches.push(make_patch(
                        EntityFamily::File,
                        PatchType::Add,
                        &file.path,
                        file_property_changes(None, Some(file)),
                        Some(to_value(file)?),
                        None,
                    ));
                }
                Some(existing) => {
                    let changes = file_property_changes(Some(existing), Some(file));
                    if !changes.is_empty() {
                        invalidations.insert(file.path.clone());
                        patches.push(make_patch(
                            EntityFamily::File,
                            PatchType::Modify,
                            &file.path,
                            changes,
                            Some(to_value(file)?),
                            Some(to_value(existing)?),
                        ));
                    }
                }
            }
        }
        for file in actual.files() {
            if shadow.file(&file.path).is_none() {
                invalidations.insert(file.path.clone());
                patches.push(make_patch(
                    EntityFamily::File,
                    PatchType::Remove,
                    &file.path,
                    file_property_changes(Some(file), None),
                    None,
                    Some(to_value(file)?),
                ));
            }
        }
        Ok(())
    }

    fn scan_symbols(
        &self,
        actual: &CodeGraph,
        shadow: &CodeGraph,
        patches: &mut Vec<GraphPatch>,
        invalidations: &mut BTreeSet<String>,
    ) -> Result<(), EngineError> {
        for symbol in shadow.symbols() {
            match actual.symbol(&symbol.id) {
                None => {
                    if let Some(owner) = symbol.id.owner_path() {
                        invalidations.insert(owner.to_string());
                    }
                    patches.push(make_patch(
                        EntityFamily::Symbol,
                        PatchType::Add,
                        &symbol.id.0,
                        symbol_property_changes(None, Some(symbol)),
                        Some(to_value(symbol)?),
                        None,
                    ));
                }
                Some(existing) => {
                    let changes = symbol_property_changes(Some(existing), Some(symbol));
                    if !changes.is_empty() {
                        if let Some(owner) = symbol.id.owner_path() {
                            invalidations.insert(owner.to_string());
                        }
                        patches.push(make_patch(
                            EntityFamily::Symbol,
                            PatchType::Modify,
                            &symbol.id.0,
                            changes,
                            Some(to_value(symbol)?),
                            Some(to_value(existing)?),
                        ));
                    }
                }
            }
        }
        for symbol in actual.symbols() {
            if shadow.symbol(&symbol.id).is_none() {
                if let Some(owner) = symbol.id.owner_path() {
                    invalidations.insert(owner.to_string());
                }
                patches.push(make_patch(
                    EntityFamily::Symbol,
                    PatchType::Remove,
                    &symbol.id.0,
                    symbol_property_changes(Some(symbol), None),
                    None,
                    Some(to_value(symbol)?),
                ));
            }
        }
        Ok(())
    }

    fn scan_nodes(
        &self,
        actual: &CodeGraph,
        shadow: &CodeGraph,
        patches: &mut Vec<GraphPatch>,
    ) -> Result<(), EngineError> {
        for node in shadow.nodes() {
            match actual.node(&node.id) {
                None => patches.push(make_patch(
                    EntityFamily::Node,
                    PatchType::Add,
                    &node.id.0,
                    node_property_changes(None, Some(node)),
                    Some(to_value(node)?),
                    None,
                )),
                Some(existing) => {
                    let changes = node_property_changes(Some(existing), Some(node));
                    if !changes.is_empty() {
                        patches.push(make_patch(
                            EntityFamily::Node,
                            PatchType::Modify,
                            &node.id.0,
                            changes,
                            Some(to_value(node)?),
                            Some(to_value(existing)?),
                        ));
                    }
                }
            }
        }
        for node in actual.nodes() {
            if shadow.node(&node.id).is_none() {
                patches.push(make_patch(
                    EntityFamily::Node,
                    PatchType::Remove,
                    &node.id.0,
                    node_property_changes(Some(node), None),
                    None,
                    Some(to_value(node)?),
                ));
            }
        }
        Ok(())
    }

    fn scan_edges(
        &self,
        actual: &CodeGraph,
        shadow: &CodeGraph,
        patches: &mut Vec<GraphPatch>,
    ) -> Result<(), EngineError> {
        for edge in shadow.edges() {
            match actual.edge(&edge.id) {
                None => patches.push(make_patch(
                    EntityFamily::Edge,
                    PatchType::Add,
                    &edge.id.0,
                    edge_property_changes(None, Some(edge)),
                    Some(to_value(edge)?),
                    None,
                )),
                Some(existing) => {
                    let changes = edge_property_changes(Some(existing), Some(edge));
                    if !changes.is_empty() {
                        patches.push(make_patch(
                            EntityFamily::Edge,
                            PatchType::Modify,
                            &edge.id.0,
                            changes,
                            Some(to_value(edge)?),
                            Some(to_value(existing)?),
                        ));
                    }
                }
            }
        }
        for edge in actual.edges() {
            if shadow.edge(&edge.id).is_none() {
                patches.push(make_patch(
                    EntityFamily::Edge,
                    PatchType::Remove,
                    &edge.id.0,
                    edge_property_changes(Some(edge), None),
                    None,
                    Some(to_value(edge)?),
                ));
            }
        }
        Ok(())
    }

    // ── Validation ──────────────────────────────────────

    /// Reject a plan before any mutation happens.
    pub fn validate(
        &self,
        plan: &ReconciliationPlan,
        actual: &CodeGraph,
    ) -> Result<(), EngineError> {
        if !self.config.validation_enabled {
            return Ok(());
        }

        // Two patches on the same family+target are structurally
        // overlapping; no merge semantics are defined, so the plan is
        // rejected outright. This also covers incompatible pairs like
        // add+modify on one id.
        let mut seen: HashMap<(EntityFamily, &str), PatchType> = HashMap::new();
        for patch in &plan.patches {
            if let Some(previous) = seen.insert((patch.family, patch.target.as_str()), patch.patch_type)
            {
                return Err(EngineError::Validation(format!(
                    "overlapping patches on {} {} ({:?} and {:?})",
                    patch.family.tag(),
                    patch.target,
                    previous,
                    patch.patch_type,
                )));
            }
        }

        if plan.len() > self.config.max_patch_size {
            return Err(EngineError::Validation(format!(
                "plan size {} exceeds max_patch_size {}",
                plan.len(),
                self.config.max_patch_size
            )));
        }
        if plan.len() > self.config.soft_patch_size {
            warn!(
                plan = %plan.id,
                size = plan.len(),
                soft_limit = self.config.soft_patch_size,
                "plan exceeds the soft size limit"
            );
        }

        // Every dependency must be another patch in the plan or already
        // satisfied by the current actual graph.
        let ids: BTreeSet<&str> = plan.patches.iter().map(|p| p.id.as_str()).collect();
        for patch in &plan.patches {
            for dep in &patch.dependencies {
                if ids.contains(dep.as_str()) {
                    continue;
                }
                if !dependency_satisfied(actual, dep) {
                    return Err(EngineError::Validation(format!(
                        "patch {} depends on {}, which is neither planned nor satisfied",
                        patch.id, dep
                    )));
                }
            }
        }
        Ok(())
    }

    // ── Apply ───────────────────────────────────────────

    /// Apply a validated plan to the actual graph. All-or-nothing: on any
    /// failure the pre-apply state is restored.
    pub fn apply(
        &self,
        actual: &mut CodeGraph,
        plan: &ReconciliationPlan,
        cancel: &CancelToken,
    ) -> Result<ApplyReport, EngineError> {
        self.validate(plan, actual)?;
        cancel.check()?;

        let started = Instant::now();
        let rollback = self.config.rollback_enabled.then(|| actual.deep_copy());

        let mut applied = 0usize;
        for patch in &plan.patches {
            if let Err(error) = cancel.check().and_then(|_| apply_patch(actual, patch)) {
                if let Some(point) = rollback {
                    *actual = point;
                }
                warn!(plan = %plan.id, patch = %patch.id, %error, "apply failed; rolled back");
                return Err(error);
            }
            applied += 1;
        }

        actual.refresh_metadata_totals();

        Ok(ApplyReport {
            patches_applied: applied,
            duration: started.elapsed(),
            cache_invalidations: plan.cache_invalidations.clone(),
        })
    }
}

// ── Patch construction helpers ──────────────────────────

fn make_patch(
    family: EntityFamily,
    patch_type: PatchType,
    target: &str,
    changes: Vec<PropertyChange>,
    payload: Option<Value>,
    payload_before: Option<Value>,
) -> GraphPatch {
    GraphPatch {
        id: GraphPatch::patch_id(family, patch_type, target),
        family,
        patch_type,
        target: target.to_string(),
        changes,
        dependencies: Vec::new(),
        priority: GraphPatch::rank(family, patch_type),
        payload,
        payload_before,
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, EngineError> {
    serde_json::to_value(value).map_err(|e| EngineError::InvalidChange(e.to_string()))
}

macro_rules! push_delta {
    ($changes:expr, $name:expr, $old:expr, $new:expr) => {
        if $old != $new {
            $changes.push(PropertyChange {
                property: $name.to_string(),
                old: $old.and_then(|v| serde_json::to_value(v).ok()),
                new: $new.and_then(|v| serde_json::to_value(v).ok()),
            });
        }
    };
}

/// The compared property set for files: path, size, lines, symbol and
/// import counts, flags, and the owned symbol/import lists.
fn file_property_changes(old: Option<&FileNode>, new: Option<&FileNode>) -> Vec<PropertyChange> {
    let mut changes = Vec::new();
    push_delta!(changes, "path", old.map(|f| &f.path), new.map(|f| &f.path));
    push_delta!(changes, "size", old.map(|f| f.size_bytes), new.map(|f| f.size_bytes));
    push_delta!(changes, "lines", old.map(|f| f.line_count), new.map(|f| f.line_count));
    push_delta!(
        changes,
        "symbol_count",
        old.map(|f| f.symbol_count),
        new.map(|f| f.symbol_count)
    );
    push_delta!(
        changes,
        "import_count",
        old.map(|f| f.import_count),
        new.map(|f| f.import_count)
    );
    push_delta!(changes, "is_test", old.map(|f| f.is_test), new.map(|f| f.is_test));
    push_delta!(
        changes,
        "is_generated",
        old.map(|f| f.is_generated),
        new.map(|f| f.is_generated)
    );
    push_delta!(changes, "symbols", old.map(|f| &f.symbols), new.map(|f| &f.symbols));
    push_delta!(changes, "imports", old.map(|f| &f.imports), new.map(|f| &f.imports));
    changes
}

fn symbol_property_changes(old: Option<&Symbol>, new: Option<&Symbol>) -> Vec<PropertyChange> {
    let mut changes = Vec::new();
    push_delta!(changes, "name", old.map(|s| &s.name), new.map(|s| &s.name));
    push_delta!(changes, "kind", old.map(|s| s.kind), new.map(|s| s.kind));
    push_delta!(changes, "signature", old.map(|s| &s.signature), new.map(|s| &s.signature));
    push_delta!(
        changes,
        "documentation",
        old.map(|s| &s.documentation),
        new.map(|s| &s.documentation)
    );
    push_delta!(
        changes,
        "visibility",
        old.map(|s| s.visibility),
        new.map(|s| s.visibility)
    );
    push_delta!(changes, "location", old.map(|s| s.location), new.map(|s| s.location));
    changes
}

fn node_property_changes(old: Option<&GraphNode>, new: Option<&GraphNode>) -> Vec<PropertyChange> {
    let mut changes = Vec::new();
    push_delta!(changes, "kind", old.map(|n| n.kind), new.map(|n| n.kind));
    push_delta!(changes, "label", old.map(|n| &n.label), new.map(|n| &n.label));
    push_delta!(changes, "file_path", old.map(|n| &n.file_path), new.map(|n| &n.file_path));
    push_delta!(changes, "metadata", old.map(|n| &n.metadata), new.map(|n| &n.metadata));
    changes
}

fn edge_property_changes(old: Option<&GraphEdge>, new: Option<&GraphEdge>) -> Vec<PropertyChange> {
    let mut changes = Vec::new();
    push_delta!(changes, "source", old.map(|e| &e.source), new.map(|e| &e.source));
    push_delta!(changes, "target", old.map(|e| &e.target), new.map(|e| &e.target));
    push_delta!(changes, "kind", old.map(|e| e.kind), new.map(|e| e.kind));
    push_delta!(changes, "weight", old.map(|e| e.weight), new.map(|e| e.weight));
    push_delta!(
        changes,
        "metadata_hash",
        old.map(|e| metadata_hash(e)),
        new.map(|e| metadata_hash(e))
    );
    changes
}

fn metadata_hash(edge: &GraphEdge) -> String {
    let mut hasher = DefaultHasher::new();
    for (key, value) in &edge.metadata {
        key.hash(&mut hasher);
        if let Ok(text) = serde_json::to_string(value) {
            text.hash(&mut hasher);
        }
    }
    format!("{:016x}", hasher.finish())
}

// ── Dependencies and ordering ───────────────────────────

/// Declare ordering constraints: a file-add precedes the symbol-adds it
/// owns, node-adds precede edge-adds touching them, and symbol-deletes
/// precede the removal of incident edges.
fn declare_dependencies(patches: &mut [GraphPatch]) {
    let ids: BTreeSet<String> = patches.iter().map(|p| p.id.clone()).collect();
    let contains = |id: &String| ids.contains(id);

    for patch in patches.iter_mut() {
        match (patch.family, patch.patch_type) {
            (EntityFamily::Symbol, PatchType::Add) => {
                if let Some(owner) = SymbolId(patch.target.clone()).owner_path() {
                    let dep = GraphPatch::patch_id(EntityFamily::File, PatchType::Add, owner);
                    if contains(&dep) {
                        patch.dependencies.push(dep);
                    }
                }
            }
            (EntityFamily::Edge, PatchType::Add) => {
                if let Some(payload) = &patch.payload {
                    for key in ["source", "target"] {
                        if let Some(endpoint) = payload.get(key).and_then(|v| v.as_str()) {
                            let dep =
                                GraphPatch::patch_id(EntityFamily::Node, PatchType::Add, endpoint);
                            if contains(&dep) {
                                patch.dependencies.push(dep);
                            }
                        }
                    }
                }
            }
            (EntityFamily::Edge, PatchType::Remove) => {
                if let Some(payload) = &patch.payload_before {
                    for key in ["source", "target"] {
                        if let Some(endpoint) = payload.get(key).and_then(|v| v.as_str()) {
                            let dep = GraphPatch::patch_id(
                                EntityFamily::Symbol,
                                PatchType::Remove,
                                endpoint,
                            );
                            if contains(&dep) {
                                patch.dependencies.push(dep);
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }
}

/// Sort by priority, then a stable topological order over dependencies,
/// then target id.
fn order_patches(patches: &mut Vec<GraphPatch>) -> Result<(), EngineError> {
    patches.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.target.cmp(&b.target)));

    let index_of: HashMap<String, usize> = patches
        .iter()
        .enumerate()
        .map(|(i, p)| (p.id.clone(), i))
        .collect();

    let mut remaining: Vec<usize> = (0..patches.len()).collect();
    let mut placed: Vec<bool> = vec![false; patches.len()];
    let mut ordered = Vec::with_capacity(patches.len());

    while !remaining.is_empty() {
        let mut progressed = false;
        let mut next_remaining = Vec::with_capacity(remaining.len());
        for &candidate in &remaining {
            let ready = patches[candidate].dependencies.iter().all(|dep| {
                match index_of.get(dep) {
                    Some(&dep_index) => placed[dep_index],
                    // Dependencies outside the plan are checked at
                    // validation, not here.
                    None => true,
                }
            });
            if ready {
                placed[candidate] = true;
                ordered.push(candidate);
                progressed = true;
            } else {
                next_remaining.push(candidate);
            }
        }
        if !progressed {
            return Err(EngineError::Validation(
                "dependency cycle among patches".to_string(),
            ));
        }
        remaining = next_remaining;
    }

    let mut reordered = Vec::with_capacity(patches.len());
    for index in ordered {
        reordered.push(patches[index].clone());
    }
    *patches = reordered;
    Ok(())
}

fn plan_id(patches: &[GraphPatch]) -> String {
    let mut hasher = DefaultHasher::new();
    for patch in patches {
        patch.id.hash(&mut hasher);
    }
    format!("plan-{:016x}", hasher.finish())
}

fn dependency_satisfied(actual: &CodeGraph, dep_id: &str) -> bool {
    let Some((prefix, target)) = dep_id.split_once(':') else {
        return false;
    };
    let exists = match prefix.split_once('/').map(|(family, _)| family) {
        Some("file") => actual.file(target).is_some(),
        Some("symbol") => actual.symbol(&SymbolId(target.to_string())).is_some(),
        Some("node") => actual.node(&NodeId(target.to_string())).is_some(),
        Some("edge") => actual.edge(&EdgeId(target.to_string())).is_some(),
        _ => return false,
    };
    match prefix.split_once('/').map(|(_, kind)| kind) {
        Some("add") | Some("modify") => exists,
        Some("remove") => !exists,
        _ => false,
    }
}

// ── Patch application ───────────────────────────────────

fn apply_patch(actual: &mut CodeGraph, patch: &GraphPatch) -> Result<(), EngineError> {
    let apply_error = |message: String| EngineError::Apply {
        patch_id: patch.id.clone(),
        message,
    };

    match (patch.family, patch.patch_type) {
        (EntityFamily::File, PatchType::Add) => {
            let file: FileNode = payload_of(patch)?;
            if actual.file(&file.path).is_some() {
                return Err(apply_error(format!("file {} already present", file.path)));
            }
            actual.insert_file(file);
        }
        (EntityFamily::File, PatchType::Modify) => {
            let file: FileNode = payload_of(patch)?;
            if actual.file(&file.path).is_none() {
                return Err(apply_error(format!("file {} missing", file.path)));
            }
            actual.insert_file(file);
        }
        (EntityFamily::File, PatchType::Remove) => {
            if actual.remove_file(&patch.target).is_none() {
                return Err(apply_error(format!("file {} missing", patch.target)));
            }
        }
        (EntityFamily::Symbol, PatchType::Add) => {
            let symbol: Symbol = payload_of(patch)?;
            if actual.symbol(&symbol.id).is_some() {
                return Err(apply_error(format!("symbol {} already present", symbol.id)));
            }
            actual.insert_symbol(symbol);
        }
        (EntityFamily::Symbol, PatchType::Modify) => {
            let symbol: Symbol = payload_of(patch)?;
            if actual.symbol(&symbol.id).is_none() {
                return Err(apply_error(format!("symbol {} missing", symbol.id)));
            }
            actual.insert_symbol(symbol);
        }
        (EntityFamily::Symbol, PatchType::Remove) => {
            let id = SymbolId(patch.target.clone());
            if actual.remove_symbol(&id).is_none() {
                return Err(apply_error(format!("symbol {} missing", patch.target)));
            }
        }
        (EntityFamily::Node, PatchType::Add) => {
            let node: GraphNode = payload_of(patch)?;
            if actual.node(&node.id).is_some() {
                return Err(apply_error(format!("node {} already present", node.id)));
            }
            actual.insert_node(node);
        }
        (EntityFamily::Node, PatchType::Modify) => {
            let node: GraphNode = payload_of(patch)?;
            if actual.node(&node.id).is_none() {
                return Err(apply_error(format!("node {} missing", node.id)));
            }
            actual.insert_node(node);
        }
        (EntityFamily::Node, PatchType::Remove) => {
            let id = NodeId(patch.target.clone());
            if actual.remove_node(&id).is_none() {
                return Err(apply_error(format!("node {} missing", patch.target)));
            }
        }
        (EntityFamily::Edge, PatchType::Add) => {
            let edge: GraphEdge = payload_of(patch)?;
            if actual.edge(&edge.id).is_some() {
                return Err(apply_error(format!("edge {} already present", edge.id)));
            }
            actual.insert_edge(edge);
        }
        (EntityFamily::Edge, PatchType::Modify) => {
            let edge: GraphEdge = payload_of(patch)?;
            if actual.edge(&edge.id).is_none() {
                return Err(apply_error(format!("edge {} missing", edge.id)));
            }
            actual.insert_edge(edge);
        }
        (EntityFamily::Edge, PatchType::Remove) => {
            let id = EdgeId(patch.target.clone());
            if actual.remove_edge(&id).is_none() {
                return Err(apply_error(format!("edge {} missing", patch.target)));
            }
        }
    }
    Ok(())
}

fn payload_of<T: serde::de::DeserializeOwned>(patch: &GraphPatch) -> Result<T, EngineError> {
    let value = patch.payload.clone().ok_or_else(|| EngineError::Apply {
        patch_id: patch.id.clone(),
        message: "patch carries no payload".to_string(),
    })?;
    serde_json::from_value(value).map_err(|e| EngineError::Apply {
        patch_id: patch.id.clone(),
        message: format!("payload decode failed: {}", e),
    })
}

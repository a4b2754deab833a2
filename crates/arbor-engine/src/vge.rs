//! Virtual graph engine
//!
//! Owns the shadow/actual graph pair. Producers queue change sets; the
//! engine batches them, mutates the shadow, asks the reconciler for a plan,
//! and applies it atomically to the actual graph. Readers get deep copies
//! behind a shared lock; the apply path holds it exclusively.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use arbor_core::{
    CodeGraph, FileNode, GraphNode, MetaMap, NodeId, NodeKind, Symbol, SymbolId,
};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::batcher::{ChangeBatch, ChangeBatcher};
use crate::cancel::CancelToken;
use crate::change::{ChangeSet, ChangeType};
use crate::config::EngineConfig;
use crate::differ::Differ;
use crate::error::EngineError;
use crate::metrics::VgeMetrics;
use crate::reconciler::Reconciler;

/// Bound on the background apply triggered by the queue threshold.
const BACKGROUND_APPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Constant-per-entity shadow memory model. Approximate by design.
const BYTES_PER_FILE: u64 = 2048;
const BYTES_PER_SYMBOL: u64 = 512;
const BYTES_PER_NODE: u64 = 256;
const BYTES_PER_EDGE: u64 = 192;

struct EngineState {
    shadow: CodeGraph,
    actual: CodeGraph,
}

/// Derived-data recompute run against the actual graph after every
/// successful apply. Runs under the exclusive lock; the hook must not
/// re-enter the engine.
pub type PostApplyHook = Arc<dyn Fn(&mut CodeGraph) + Send + Sync>;

/// What one `process_pending_changes` call did.
#[derive(Debug, Default)]
pub struct ProcessReport {
    pub change_sets: usize,
    pub batches: usize,
    pub patches_applied: usize,
    pub plan_id: Option<String>,
    /// Per-file failures that did not abort the batch.
    pub errors: Vec<EngineError>,
}

#[derive(Clone)]
pub struct VirtualGraphEngine {
    state: Arc<RwLock<EngineState>>,
    pending: Arc<Mutex<VecDeque<ChangeSet>>>,
    batcher: ChangeBatcher,
    differ: Arc<Differ>,
    reconciler: Arc<Reconciler>,
    metrics: Arc<Mutex<VgeMetrics>>,
    post_apply: Arc<Mutex<Option<PostApplyHook>>>,
    config: EngineConfig,
}

impl VirtualGraphEngine {
    pub fn new(config: EngineConfig, reconciler: Reconciler) -> Self {
        let differ = Arc::new(Differ::new(&config));
        let batcher = ChangeBatcher::new(&config);
        VirtualGraphEngine {
            state: Arc::new(RwLock::new(EngineState {
                shadow: CodeGraph::new(),
                actual: CodeGraph::new(),
            })),
            pending: Arc::new(Mutex::new(VecDeque::new())),
            batcher,
            differ,
            reconciler: Arc::new(reconciler),
            metrics: Arc::new(Mutex::new(VgeMetrics::default())),
            post_apply: Arc::new(Mutex::new(None)),
            config,
        }
    }

    /// Install the hook that republishes derived data after each apply.
    /// Shared across clones, so the background apply path runs it too.
    pub fn set_post_apply_hook(&self, hook: PostApplyHook) {
        *self.lock_post_apply() = Some(hook);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn differ(&self) -> &Differ {
        &self.differ
    }

    /// Seed the engine: the supplied graph becomes the actual, the shadow
    /// its deep copy. Pending work and metrics reset.
    pub async fn initialize(&self, actual: CodeGraph) {
        let mut state = self.state.write().await;
        state.shadow = actual.deep_copy();
        state.actual = actual;
        self.lock_pending().clear();
        *self.lock_metrics() = VgeMetrics::default();
        info!(
            files = state.actual.file_count(),
            symbols = state.actual.symbol_count(),
            "engine initialized"
        );
    }

    /// Append a change to the pending queue. When the queue reaches the
    /// batch threshold a background apply starts with a bounded timeout.
    pub fn queue_change(&self, change: ChangeSet) -> Result<(), EngineError> {
        self.enforce_memory_budget()?;

        let depth = {
            let mut pending = self.lock_pending();
            pending.push_back(change);
            pending.len()
        };
        if self.config.enable_metrics {
            let mut metrics = self.lock_metrics();
            metrics.total_changes += 1;
        }

        if depth >= self.config.batch_threshold {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let engine = self.clone();
                handle.spawn(async move {
                    let token = CancelToken::with_timeout(BACKGROUND_APPLY_TIMEOUT);
                    if let Err(error) = engine.process_pending_changes(&token).await {
                        warn!(%error, "background apply failed");
                    }
                });
            }
        }
        Ok(())
    }

    pub fn pending_len(&self) -> usize {
        self.lock_pending().len()
    }

    /// Drain the queue, mutate the shadow, reconcile, and apply to the
    /// actual graph. Per-file failures collect into the report; plan-level
    /// failures are atomic and propagate.
    pub async fn process_pending_changes(
        &self,
        cancel: &CancelToken,
    ) -> Result<ProcessReport, EngineError> {
        cancel.check()?;
        let mut report = ProcessReport::default();

        let drained: Vec<ChangeSet> = {
            let mut pending = self.lock_pending();
            pending.drain(..).collect()
        };
        if drained.is_empty() {
            return Ok(report);
        }
        report.change_sets = drained.len();

        // Order through the batcher: urgent work first, insertion order as
        // the tie break.
        let mut batches: Vec<ChangeBatch> = Vec::new();
        for change in drained {
            if let Some(full) = self.batcher.add(change) {
                batches.push(full);
            }
        }
        batches.extend(self.batcher.process_all());
        report.batches = batches.len();

        let mut state = self.state.write().await;

        let shadow_started = Instant::now();
        for batch in &batches {
            if let Err(interrupted) = cancel.check() {
                // Partial shadow mutations must not survive a cancelled
                // cycle.
                state.shadow = state.actual.deep_copy();
                return Err(interrupted);
            }
            for change in &batch.changes {
                if let Err(error) = apply_to_shadow(&mut state.shadow, change) {
                    warn!(file = %change.file_path, %error, "change failed; batch continues");
                    report.errors.push(error);
                }
            }
        }
        state.shadow.refresh_metadata_totals();
        let shadow_elapsed = shadow_started.elapsed();

        if let Err(violation) = state.shadow.check_consistency() {
            // Drop the poisoned shadow before anything reaches the actual.
            state.shadow = state.actual.deep_copy();
            return Err(EngineError::Validation(violation.to_string()));
        }

        let plan_started = Instant::now();
        let plan = match self.reconciler.build_plan(&state.actual, &state.shadow) {
            Ok(plan) => plan,
            Err(error) => {
                state.shadow = state.actual.deep_copy();
                return Err(error);
            }
        };
        let plan_elapsed = plan_started.elapsed();
        report.plan_id = Some(plan.id.clone());

        let apply_started = Instant::now();
        let state_ref = &mut *state;
        match self.reconciler.apply(&mut state_ref.actual, &plan, cancel) {
            Ok(applied) => {
                report.patches_applied = applied.patches_applied;
                for path in &applied.cache_invalidations {
                    self.differ.invalidate_path(path);
                }
                // Derived data recomputes after every apply, background
                // commits included; the shadow resyncs from the post-hook
                // state.
                let hook = self.lock_post_apply().clone();
                if let Some(hook) = hook {
                    hook(&mut state_ref.actual);
                }
                state_ref.shadow = state_ref.actual.deep_copy();

                if self.config.enable_metrics {
                    let mut metrics = self.lock_metrics();
                    metrics.plans_applied += 1;
                    metrics.stages.shadow_apply += shadow_elapsed;
                    metrics.stages.plan_build += plan_elapsed;
                    metrics.stages.plan_apply += apply_started.elapsed();
                    for batch in &batches {
                        metrics.record_batch(batch.len());
                    }
                    metrics.shadow_memory_bytes = estimate_memory(&state_ref.shadow);
                    metrics.cache_hit_rate = self.differ.cache_hit_rate();
                }
                debug!(
                    plan = %plan.id,
                    patches = report.patches_applied,
                    "plan applied"
                );
                Ok(report)
            }
            Err(error) => {
                state_ref.shadow = state_ref.actual.deep_copy();
                if self.config.enable_metrics {
                    let mut metrics = self.lock_metrics();
                    if error.is_rolled_back() {
                        metrics.plans_rolled_back += 1;
                    }
                }
                Err(error)
            }
        }
    }

    /// Deep copy of the shadow graph.
    pub async fn get_shadow_graph(&self) -> CodeGraph {
        self.state.read().await.shadow.deep_copy()
    }

    /// Deep copy of the actual graph.
    pub async fn get_actual_graph(&self) -> CodeGraph {
        self.state.read().await.actual.deep_copy()
    }

    /// Single-writer hook for derived-data publication. Runs under the
    /// exclusive lock and resyncs the shadow afterwards.
    pub async fn with_actual_mut<T>(&self, mutate: impl FnOnce(&mut CodeGraph) -> T) -> T {
        let mut state = self.state.write().await;
        let result = mutate(&mut state.actual);
        state.shadow = state.actual.deep_copy();
        result
    }

    pub fn get_metrics(&self) -> VgeMetrics {
        let mut snapshot = self.lock_metrics().clone();
        snapshot.cache_hit_rate = self.differ.cache_hit_rate();
        snapshot
    }

    /// Fold externally measured diff time into the stage metrics.
    pub fn record_diff_duration(&self, duration: Duration) {
        self.lock_metrics().stages.diff += duration;
    }

    /// Empty both graphs and the queue; configuration survives.
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        state.shadow.clear();
        state.actual.clear();
        self.lock_pending().clear();
        *self.lock_metrics() = VgeMetrics::default();
    }

    // ── Memory policy ───────────────────────────────────

    fn enforce_memory_budget(&self) -> Result<(), EngineError> {
        let estimate = match self.state.try_read() {
            Ok(state) => estimate_memory(&state.shadow),
            // A writer holds the lock; the next queue call re-checks.
            Err(_) => return Ok(()),
        };
        let threshold =
            (self.config.max_shadow_memory as f64 * self.config.gc_threshold) as u64;
        if estimate <= threshold {
            return Ok(());
        }

        let dropped = self.differ.evict_lru(self.differ.cache_len());
        debug!(estimate, dropped, "shadow memory over threshold; evicted diff cache");

        if estimate > self.config.max_shadow_memory {
            return Err(EngineError::ResourceExhausted {
                used: estimate,
                limit: self.config.max_shadow_memory,
            });
        }
        Ok(())
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, VecDeque<ChangeSet>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_metrics(&self) -> std::sync::MutexGuard<'_, VgeMetrics> {
        match self.metrics.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_post_apply(&self) -> std::sync::MutexGuard<'_, Option<PostApplyHook>> {
        match self.post_apply.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn estimate_memory(graph: &CodeGraph) -> u64 {
    BYTES_PER_FILE * graph.file_count() as u64
        + BYTES_PER_SYMBOL * graph.symbol_count() as u64
        + BYTES_PER_NODE * graph.node_count() as u64
        + BYTES_PER_EDGE * graph.edge_count() as u64
}

// ── Shadow application ──────────────────────────────────

/// Apply one change set to the shadow. File-level changes replace the whole
/// slice (file, owned symbols, graph nodes); symbol-level changes edit the
/// symbol map and the owner's listing.
fn apply_to_shadow(shadow: &mut CodeGraph, change: &ChangeSet) -> Result<(), EngineError> {
    match change.change_type {
        ChangeType::FileAdd => {
            let file = change.file_payload()?.ok_or_else(|| {
                EngineError::InvalidChange(format!(
                    "file_add for {} carries no file payload",
                    change.file_path
                ))
            })?;
            let symbols: Vec<Symbol> = change
                .symbol_payloads()?
                .into_iter()
                .filter_map(|(_, new)| new)
                .collect();
            insert_file_slice(shadow, file, symbols);
        }
        ChangeType::FileModify => {
            let file = change.file_payload()?.ok_or_else(|| {
                EngineError::InvalidChange(format!(
                    "file_modify for {} carries no file payload",
                    change.file_path
                ))
            })?;
            let symbols: Vec<Symbol> = change
                .symbol_payloads()?
                .into_iter()
                .filter_map(|(_, new)| new)
                .collect();
            if symbols.is_empty() && shadow.file(&file.path).is_some() {
                replace_file_record(shadow, file);
            } else {
                // Full replacement: the payload carries the complete slice.
                insert_file_slice(shadow, file, symbols);
            }
        }
        ChangeType::FileDelete => {
            shadow.remove_file_cascade(&change.file_path);
        }
        ChangeType::SymbolAdd | ChangeType::SymbolModify => {
            for (old, new) in change.symbol_payloads()? {
                if let Some(old_symbol) = old {
                    if new.as_ref().map(|n| &n.id) != Some(&old_symbol.id) {
                        remove_symbol_slice(shadow, &old_symbol.id);
                    }
                }
                if let Some(symbol) = new {
                    insert_symbol_slice(shadow, symbol);
                }
            }
        }
        ChangeType::SymbolDelete => {
            for change_record in &change.changes {
                remove_symbol_slice(shadow, &SymbolId(change_record.target.clone()));
            }
        }
    }
    Ok(())
}

fn insert_file_slice(shadow: &mut CodeGraph, file: FileNode, symbols: Vec<Symbol>) {
    shadow.remove_file_cascade(&file.path);
    shadow.insert_node(GraphNode {
        id: NodeId::for_file(&file.path),
        kind: NodeKind::File,
        label: file.path.clone(),
        file_path: file.path.clone(),
        metadata: MetaMap::new(),
    });
    for symbol in symbols {
        shadow.insert_node(GraphNode {
            id: NodeId::for_symbol(&symbol.id),
            kind: NodeKind::Symbol,
            label: symbol.name.clone(),
            file_path: file.path.clone(),
            metadata: MetaMap::new(),
        });
        shadow.insert_symbol(symbol);
    }
    shadow.insert_file(file);
}

/// Surgical file update: swap the FileNode record and prune symbols the new
/// listing no longer names. Symbols the listing keeps were already written
/// by the granular symbol changes preceding this record in the batch.
fn replace_file_record(shadow: &mut CodeGraph, file: FileNode) {
    let stale: Vec<SymbolId> = shadow
        .file(&file.path)
        .map(|existing| {
            existing
                .symbols
                .iter()
                .filter(|id| !file.symbols.contains(id))
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    for id in stale {
        remove_symbol_slice(shadow, &id);
    }
    shadow.insert_node(GraphNode {
        id: NodeId::for_file(&file.path),
        kind: NodeKind::File,
        label: file.path.clone(),
        file_path: file.path.clone(),
        metadata: MetaMap::new(),
    });
    shadow.insert_file(file);
}

fn insert_symbol_slice(shadow: &mut CodeGraph, symbol: Symbol) {
    if let Some(owner_path) = symbol.id.owner_path().map(str::to_string) {
        if let Some(owner) = shadow.file_mut(&owner_path) {
            if !owner.symbols.contains(&symbol.id) {
                owner.symbols.push(symbol.id.clone());
                owner.symbol_count = owner.symbols.len() as u32;
            }
        }
    }
    shadow.insert_node(GraphNode {
        id: NodeId::for_symbol(&symbol.id),
        kind: NodeKind::Symbol,
        label: symbol.name.clone(),
        file_path: symbol.id.owner_path().unwrap_or_default().to_string(),
        metadata: MetaMap::new(),
    });
    shadow.insert_symbol(symbol);
}

fn remove_symbol_slice(shadow: &mut CodeGraph, id: &SymbolId) {
    shadow.remove_symbol(id);
    let node_id = NodeId::for_symbol(id);
    shadow.remove_node(&node_id);
    shadow.remove_edges_incident(&node_id);
    if let Some(owner_path) = id.owner_path().map(str::to_string) {
        if let Some(owner) = shadow.file_mut(&owner_path) {
            owner.symbols.retain(|listed| listed != id);
            owner.symbol_count = owner.symbols.len() as u32;
        }
    }
}

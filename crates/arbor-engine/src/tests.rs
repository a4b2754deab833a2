//! Engine-level tests exercising the shadow/actual pipeline end to end

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use arbor_core::{
    CodeGraph, FileNode, GraphNode, Import, Language, MetaMap, MetaValue, NodeId, NodeKind,
    SourceLocation, Symbol, SymbolId, SymbolKind, Visibility,
};

use crate::cancel::CancelToken;
use crate::change::ChangeSet;
use crate::config::{EngineConfig, ReconcilerConfig};
use crate::error::EngineError;
use crate::plan::{EntityFamily, GraphPatch, PatchType};
use crate::reconciler::Reconciler;
use crate::vge::VirtualGraphEngine;

pub fn sample_symbol(path: &str, name: &str, line: u32) -> Symbol {
    Symbol {
        id: SymbolId::new(path, name, line),
        name: name.to_string(),
        kind: SymbolKind::Function,
        language: Language::TypeScript,
        location: SourceLocation {
            start_line: line,
            start_column: 0,
            end_line: line + 2,
            end_column: 1,
        },
        signature: format!("function {}(): void", name),
        documentation: None,
        visibility: Visibility::Public,
        qualified_name: name.to_string(),
    }
}

pub fn sample_file(path: &str, symbols: &[&Symbol], imports: Vec<Import>) -> FileNode {
    FileNode {
        path: path.to_string(),
        language: Language::TypeScript,
        size_bytes: 200,
        line_count: 12,
        symbol_count: symbols.len() as u32,
        import_count: imports.len() as u32,
        is_test: false,
        is_generated: false,
        modified_at: SystemTime::UNIX_EPOCH,
        symbols: symbols.iter().map(|s| s.id.clone()).collect(),
        imports,
    }
}

fn engine() -> VirtualGraphEngine {
    VirtualGraphEngine::new(
        EngineConfig::default(),
        Reconciler::new(ReconcilerConfig::default()),
    )
}

fn seed_graph(path: &str, symbol_name: &str) -> CodeGraph {
    let mut graph = CodeGraph::new();
    let symbol = sample_symbol(path, symbol_name, 1);
    let file = sample_file(path, &[&symbol], Vec::new());
    graph.insert_node(GraphNode {
        id: NodeId::for_file(path),
        kind: NodeKind::File,
        label: path.to_string(),
        file_path: path.to_string(),
        metadata: MetaMap::new(),
    });
    graph.insert_node(GraphNode {
        id: NodeId::for_symbol(&symbol.id),
        kind: NodeKind::Symbol,
        label: symbol.name.clone(),
        file_path: path.to_string(),
        metadata: MetaMap::new(),
    });
    graph.insert_symbol(symbol);
    graph.insert_file(file);
    graph.refresh_metadata_totals();
    graph
}

#[tokio::test]
async fn queue_and_process_file_add() {
    let engine = engine();
    engine.initialize(CodeGraph::new()).await;

    let symbol = sample_symbol("src/a.ts", "f", 1);
    let file = sample_file("src/a.ts", &[&symbol], Vec::new());
    engine
        .queue_change(ChangeSet::file_add(&file, std::slice::from_ref(&symbol)).unwrap())
        .unwrap();

    let report = engine
        .process_pending_changes(&CancelToken::none())
        .await
        .unwrap();
    assert_eq!(report.change_sets, 1);
    assert!(report.patches_applied > 0);
    assert!(report.errors.is_empty());

    let actual = engine.get_actual_graph().await;
    actual.check_consistency().unwrap();
    assert_eq!(actual.file_count(), 1);
    assert_eq!(actual.symbol_count(), 1);
    assert_eq!(actual.file("src/a.ts").unwrap().symbol_count, 1);

    let metrics = engine.get_metrics();
    assert_eq!(metrics.total_changes, 1);
    assert_eq!(metrics.plans_applied, 1);
    assert_eq!(metrics.plans_rolled_back, 0);
}

#[tokio::test]
async fn file_appears_then_disappears_restores_prior_state() {
    let engine = engine();
    let initial = seed_graph("src/keep.ts", "existing");
    engine.initialize(initial.clone()).await;

    let symbol = sample_symbol("src/tmp.ts", "ghost", 1);
    let file = sample_file("src/tmp.ts", &[&symbol], Vec::new());
    engine
        .queue_change(ChangeSet::file_add(&file, std::slice::from_ref(&symbol)).unwrap())
        .unwrap();
    engine
        .process_pending_changes(&CancelToken::none())
        .await
        .unwrap();
    assert_eq!(engine.get_actual_graph().await.file_count(), 2);

    engine
        .queue_change(ChangeSet::file_delete("src/tmp.ts", Some(&file)).unwrap())
        .unwrap();
    engine
        .process_pending_changes(&CancelToken::none())
        .await
        .unwrap();

    let after = engine.get_actual_graph().await;
    after.check_consistency().unwrap();
    assert_eq!(after, initial);
}

#[tokio::test]
async fn duplicate_queueing_is_idempotent() {
    let engine = engine();
    engine.initialize(CodeGraph::new()).await;

    let symbol = sample_symbol("src/a.ts", "f", 1);
    let file = sample_file("src/a.ts", &[&symbol], Vec::new());
    let change = ChangeSet::file_add(&file, std::slice::from_ref(&symbol)).unwrap();
    engine.queue_change(change.clone()).unwrap();
    engine.queue_change(change).unwrap();
    engine
        .process_pending_changes(&CancelToken::none())
        .await
        .unwrap();
    let once_then_twice = engine.get_actual_graph().await;

    let fresh = engine;
    fresh.reset().await;
    fresh.initialize(CodeGraph::new()).await;
    let symbol = sample_symbol("src/a.ts", "f", 1);
    let file = sample_file("src/a.ts", &[&symbol], Vec::new());
    fresh
        .queue_change(ChangeSet::file_add(&file, std::slice::from_ref(&symbol)).unwrap())
        .unwrap();
    fresh
        .process_pending_changes(&CancelToken::none())
        .await
        .unwrap();
    let once = fresh.get_actual_graph().await;

    assert_eq!(once_then_twice, once);
}

#[tokio::test]
async fn inconsistent_shadow_is_rejected_before_apply() {
    let engine = engine();
    let initial = seed_graph("src/keep.ts", "existing");
    engine.initialize(initial.clone()).await;

    // A symbol add whose owner file does not exist leaves the shadow
    // inconsistent; validation must reject it without touching the actual.
    let orphan = sample_symbol("src/nowhere.ts", "lost", 1);
    engine
        .queue_change(ChangeSet::symbol_add("src/nowhere.ts", &orphan).unwrap())
        .unwrap();
    let error = engine
        .process_pending_changes(&CancelToken::none())
        .await
        .unwrap_err();
    assert!(matches!(error, EngineError::Validation(_)));

    let after = engine.get_actual_graph().await;
    assert_eq!(after, initial);
    let metrics = engine.get_metrics();
    assert_eq!(metrics.plans_applied, 0);
    assert_eq!(metrics.plans_rolled_back, 0);
}

#[tokio::test]
async fn cancellation_during_apply_rolls_back() {
    let engine = engine();
    let initial = seed_graph("src/keep.ts", "existing");
    engine.initialize(initial.clone()).await;

    let symbol = sample_symbol("src/new.ts", "fresh", 1);
    let file = sample_file("src/new.ts", &[&symbol], Vec::new());
    engine
        .queue_change(ChangeSet::file_add(&file, std::slice::from_ref(&symbol)).unwrap())
        .unwrap();

    let token = CancelToken::none();
    token.cancel();
    let error = engine.process_pending_changes(&token).await.unwrap_err();
    assert!(matches!(error, EngineError::Cancelled));
    assert_eq!(engine.get_actual_graph().await, initial);
}

#[tokio::test]
async fn reset_clears_graphs_but_keeps_config() {
    let engine = engine();
    engine.initialize(seed_graph("src/a.ts", "f")).await;
    engine.reset().await;
    assert!(engine.get_actual_graph().await.is_empty());
    assert!(engine.get_shadow_graph().await.is_empty());
    assert_eq!(engine.config().batch_threshold, 5);
}

#[tokio::test]
async fn deep_copy_exports_are_independent() {
    let engine = engine();
    engine.initialize(seed_graph("src/a.ts", "f")).await;
    let mut exported = engine.get_actual_graph().await;
    exported.remove_file_cascade("src/a.ts");
    assert_eq!(engine.get_actual_graph().await.file_count(), 1);
}

// ── Reconciler properties ───────────────────────────────

#[test]
fn plan_apply_then_inverse_restores_byte_identical_state() {
    let reconciler = Reconciler::new(ReconcilerConfig::default());
    let mut actual = seed_graph("src/a.ts", "f");
    let original = actual.deep_copy();

    // Shadow: modify the symbol and add a second file.
    let mut shadow = actual.deep_copy();
    let extra = sample_symbol("src/b.ts", "g", 1);
    let extra_file = sample_file("src/b.ts", &[&extra], Vec::new());
    shadow.insert_node(GraphNode {
        id: NodeId::for_file("src/b.ts"),
        kind: NodeKind::File,
        label: "src/b.ts".to_string(),
        file_path: "src/b.ts".to_string(),
        metadata: MetaMap::new(),
    });
    shadow.insert_node(GraphNode {
        id: NodeId::for_symbol(&extra.id),
        kind: NodeKind::Symbol,
        label: extra.name.clone(),
        file_path: "src/b.ts".to_string(),
        metadata: MetaMap::new(),
    });
    shadow.insert_symbol(extra);
    shadow.insert_file(extra_file);
    shadow.refresh_metadata_totals();

    let plan = reconciler.build_plan(&actual, &shadow).unwrap();
    assert!(!plan.is_empty());
    reconciler
        .apply(&mut actual, &plan, &CancelToken::none())
        .unwrap();
    assert_eq!(actual.file_count(), 2);

    let inverse = plan.inverse();
    reconciler
        .apply(&mut actual, &inverse, &CancelToken::none())
        .unwrap();
    assert_eq!(actual, original);
}

#[test]
fn overlapping_patches_fail_validation() {
    let reconciler = Reconciler::new(ReconcilerConfig::default());
    let actual = CodeGraph::new();
    let shadow = seed_graph("src/a.ts", "f");

    let mut plan = reconciler.build_plan(&actual, &shadow).unwrap();
    // Duplicate an existing symbol patch under an incompatible type.
    let duplicated = plan
        .patches
        .iter()
        .find(|p| p.family == EntityFamily::Symbol)
        .cloned()
        .unwrap();
    plan.patches.push(GraphPatch {
        id: GraphPatch::patch_id(EntityFamily::Symbol, PatchType::Modify, &duplicated.target),
        patch_type: PatchType::Modify,
        ..duplicated
    });

    let mut target = CodeGraph::new();
    let error = reconciler
        .apply(&mut target, &plan, &CancelToken::none())
        .unwrap_err();
    assert!(matches!(error, EngineError::Validation(_)));
    // Nothing was mutated.
    assert!(target.is_empty());
}

#[test]
fn plan_size_limit_fails_validation() {
    let reconciler = Reconciler::new(ReconcilerConfig {
        max_patch_size: 2,
        ..ReconcilerConfig::default()
    });
    let actual = CodeGraph::new();
    let shadow = seed_graph("src/a.ts", "f");
    let plan = reconciler.build_plan(&actual, &shadow).unwrap();
    assert!(plan.len() > 2);
    let error = reconciler.validate(&plan, &actual).unwrap_err();
    assert!(matches!(error, EngineError::Validation(_)));
}

#[test]
fn failing_patch_rolls_back_mid_plan() {
    let reconciler = Reconciler::new(ReconcilerConfig::default());
    let actual_start = seed_graph("src/a.ts", "f");
    let mut actual = actual_start.deep_copy();
    let shadow = {
        let mut s = actual.deep_copy();
        let extra = sample_symbol("src/b.ts", "g", 1);
        let file = sample_file("src/b.ts", &[&extra], Vec::new());
        s.insert_node(GraphNode {
            id: NodeId::for_file("src/b.ts"),
            kind: NodeKind::File,
            label: "src/b.ts".to_string(),
            file_path: "src/b.ts".to_string(),
            metadata: MetaMap::new(),
        });
        s.insert_node(GraphNode {
            id: NodeId::for_symbol(&extra.id),
            kind: NodeKind::Symbol,
            label: extra.name.clone(),
            file_path: "src/b.ts".to_string(),
            metadata: MetaMap::new(),
        });
        s.insert_symbol(extra);
        s.insert_file(file);
        s.refresh_metadata_totals();
        s
    };

    let mut plan = reconciler.build_plan(&actual, &shadow).unwrap();
    // Corrupt the final patch so apply fails after earlier patches land.
    if let Some(last) = plan.patches.last_mut() {
        last.payload = Some(serde_json::json!({"nonsense": true}));
    }

    let error = reconciler
        .apply(&mut actual, &plan, &CancelToken::none())
        .unwrap_err();
    assert!(matches!(error, EngineError::Apply { .. }));
    assert_eq!(actual, actual_start);
}

#[test]
fn empty_plan_for_identical_graphs() {
    let reconciler = Reconciler::new(ReconcilerConfig::default());
    let graph = seed_graph("src/a.ts", "f");
    let plan = reconciler.build_plan(&graph, &graph.deep_copy()).unwrap();
    assert!(plan.is_empty());
    assert_eq!(plan.token_delta.delta, 0);
}

#[test]
fn modify_plan_inverts_to_the_old_value() {
    let reconciler = Reconciler::new(ReconcilerConfig::default());
    let mut actual = seed_graph("src/a.ts", "f");
    let original = actual.deep_copy();

    let mut shadow = actual.deep_copy();
    let id = SymbolId::new("src/a.ts", "f", 1);
    if let Some(symbol) = shadow.symbol(&id).cloned() {
        let changed = Symbol {
            signature: "function f(): string".to_string(),
            ..symbol
        };
        shadow.insert_symbol(changed);
    }

    let plan = reconciler.build_plan(&actual, &shadow).unwrap();
    assert_eq!(plan.len(), 1);
    let patch = &plan.patches[0];
    assert_eq!(patch.patch_type, PatchType::Modify);
    assert!(patch
        .changes
        .iter()
        .any(|change| change.property == "signature"));

    reconciler
        .apply(&mut actual, &plan, &CancelToken::none())
        .unwrap();
    assert_eq!(
        actual.symbol(&id).unwrap().signature,
        "function f(): string"
    );

    reconciler
        .apply(&mut actual, &plan.inverse(), &CancelToken::none())
        .unwrap();
    assert_eq!(actual, original);
}

#[test]
fn token_delta_tracks_entity_growth() {
    let reconciler = Reconciler::new(ReconcilerConfig::default());
    let actual = CodeGraph::new();
    let shadow = seed_graph("src/a.ts", "f");
    let plan = reconciler.build_plan(&actual, &shadow).unwrap();
    assert_eq!(plan.token_delta.before, 0);
    assert!(plan.token_delta.after > 0);
    assert_eq!(
        plan.token_delta.delta,
        plan.token_delta.after as i64 - plan.token_delta.before as i64
    );
}

#[tokio::test]
async fn memory_limit_rejects_new_changes() {
    let config = EngineConfig {
        max_shadow_memory: 1024,
        gc_threshold: 0.5,
        ..EngineConfig::default()
    };
    let engine = VirtualGraphEngine::new(config, Reconciler::new(ReconcilerConfig::default()));
    engine.initialize(seed_graph("src/a.ts", "f")).await;

    let symbol = sample_symbol("src/b.ts", "g", 1);
    let file = sample_file("src/b.ts", &[&symbol], Vec::new());
    let error = engine
        .queue_change(ChangeSet::file_add(&file, std::slice::from_ref(&symbol)).unwrap())
        .unwrap_err();
    assert!(matches!(error, EngineError::ResourceExhausted { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn queue_threshold_triggers_background_apply() {
    let config = EngineConfig {
        batch_threshold: 1,
        ..EngineConfig::default()
    };
    let engine = VirtualGraphEngine::new(config, Reconciler::new(ReconcilerConfig::default()));
    engine.initialize(CodeGraph::new()).await;
    engine.set_post_apply_hook(Arc::new(|graph| {
        graph
            .metadata
            .config
            .insert("derived".to_string(), MetaValue::Bool(true));
    }));

    let symbol = sample_symbol("src/a.ts", "f", 1);
    let file = sample_file("src/a.ts", &[&symbol], Vec::new());
    engine
        .queue_change(ChangeSet::file_add(&file, std::slice::from_ref(&symbol)).unwrap())
        .unwrap();

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        if engine.get_actual_graph().await.file_count() == 1 {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "background apply never landed"
        );
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert_eq!(engine.get_metrics().plans_applied, 1);

    // The background commit ran the derived-data hook too.
    let actual = engine.get_actual_graph().await;
    assert_eq!(
        actual.metadata.config.get("derived"),
        Some(&MetaValue::Bool(true))
    );
}

#[tokio::test]
async fn post_apply_hook_runs_after_every_apply() {
    let engine = engine();
    engine.initialize(CodeGraph::new()).await;

    let runs = Arc::new(AtomicUsize::new(0));
    let seen = runs.clone();
    engine.set_post_apply_hook(Arc::new(move |_graph| {
        seen.fetch_add(1, Ordering::SeqCst);
    }));

    for name in ["f", "g"] {
        let symbol = sample_symbol(&format!("src/{}.ts", name), name, 1);
        let file = sample_file(&format!("src/{}.ts", name), &[&symbol], Vec::new());
        engine
            .queue_change(ChangeSet::file_add(&file, std::slice::from_ref(&symbol)).unwrap())
            .unwrap();
        engine
            .process_pending_changes(&CancelToken::none())
            .await
            .unwrap();
    }
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    // A rejected batch never reaches the hook.
    let orphan = sample_symbol("src/nowhere.ts", "lost", 1);
    engine
        .queue_change(ChangeSet::symbol_add("src/nowhere.ts", &orphan).unwrap())
        .unwrap();
    let _ = engine
        .process_pending_changes(&CancelToken::none())
        .await
        .unwrap_err();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn cache_invalidations_drop_memoized_diffs() {
    let engine = engine();
    engine.initialize(CodeGraph::new()).await;

    // Prime the memo cache through the public differ handle.
    let pool = arbor_parser::create_parser_pool();
    let old_ast = pool
        .parse_blocking(arbor_parser::ParseRequest {
            path: std::path::PathBuf::from("src/a.ts"),
            language: Language::TypeScript,
            content: "export const x = 1;".to_string(),
        })
        .unwrap();
    let new_ast = pool
        .parse_blocking(arbor_parser::ParseRequest {
            path: std::path::PathBuf::from("src/a.ts"),
            language: Language::TypeScript,
            content: "export const x = 2;".to_string(),
        })
        .unwrap();
    engine.differ().diff(&old_ast, &new_ast).unwrap();
    assert_eq!(engine.differ().cache_len(), 1);

    // Applying a change to src/a.ts invalidates its memoized diffs.
    let symbol = sample_symbol("src/a.ts", "x", 1);
    let file = sample_file("src/a.ts", &[&symbol], Vec::new());
    engine
        .queue_change(ChangeSet::file_add(&file, std::slice::from_ref(&symbol)).unwrap())
        .unwrap();
    engine
        .process_pending_changes(&CancelToken::none())
        .await
        .unwrap();
    assert_eq!(engine.differ().cache_len(), 0);
}

//! Integration tests for Arbor
//!
//! End-to-end scenarios across the parser, engine, and analyzer: a real
//! temp repository, real tree-sitter parses, the full shadow/actual
//! reconciliation path.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arbor_analyzer::{
    scan_repository, ChangeDetection, FileChangeKind, IncrementalAnalyzer, IncrementalConfig,
};
use arbor_core::{CodeGraph, SymbolKind};
use arbor_engine::{
    CancelToken, ChangeBatcher, ChangeSet, ChangeType, EngineConfig, Reconciler, ReconcilerConfig,
    VirtualGraphEngine,
};
use arbor_parser::TreeSitterParser;
use tempfile::TempDir;

fn analyzer_for(dir: &TempDir) -> IncrementalAnalyzer {
    let parser = Arc::new(TreeSitterParser::new(dir.path()));
    let engine = VirtualGraphEngine::new(
        EngineConfig::default(),
        Reconciler::new(ReconcilerConfig::default()),
    );
    let config = IncrementalConfig {
        change_detection: ChangeDetection::Content,
        ..IncrementalConfig::default()
    };
    IncrementalAnalyzer::new(dir.path(), parser, engine, config)
}

fn write(dir: &TempDir, rel: &str, content: &str) {
    let path = dir.path().join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

/// Scenario: add a single TypeScript file.
#[tokio::test]
async fn add_single_file_end_to_end() {
    let dir = TempDir::new().unwrap();
    write(&dir, "a.ts", "export function f(): number { return 1; }");

    let mut analyzer = analyzer_for(&dir);
    analyzer.initialize(CodeGraph::new()).await.unwrap();
    let result = analyzer
        .analyze_changes(&CancelToken::none(), &[PathBuf::from("a.ts")])
        .await
        .unwrap();

    assert_eq!(result.processed_changes.len(), 1);
    assert_eq!(result.processed_changes[0].kind, FileChangeKind::Added);
    assert_eq!(result.updated_graph.file("a.ts").unwrap().symbol_count, 1);
    assert!((result.impact_analysis.risk_score - 0.1).abs() < 1e-9);
    result.updated_graph.check_consistency().unwrap();
}

/// Scenario: modify that file; the signature changes but the shape does
/// not, so the change is not high impact.
#[tokio::test]
async fn modify_single_file_end_to_end() {
    let dir = TempDir::new().unwrap();
    write(&dir, "a.ts", "export function f(): number { return 1; }");

    let mut analyzer = analyzer_for(&dir);
    analyzer.initialize(CodeGraph::new()).await.unwrap();
    analyzer
        .analyze_changes(&CancelToken::none(), &[PathBuf::from("a.ts")])
        .await
        .unwrap();

    write(&dir, "a.ts", "export function f(): string { return \"x\"; }");
    let result = analyzer
        .analyze_changes(&CancelToken::none(), &[PathBuf::from("a.ts")])
        .await
        .unwrap();

    assert_eq!(result.processed_changes.len(), 1);
    assert_eq!(result.processed_changes[0].kind, FileChangeKind::Modified);
    assert_eq!(result.impact_analysis.high_impact_changes, 0);

    let graph = &result.updated_graph;
    assert_eq!(graph.file_count(), 1);
    assert_eq!(graph.symbol_count(), 1);
    assert!(graph
        .symbols()
        .next()
        .unwrap()
        .signature
        .contains("string"));
}

/// Scenario: introduce an import cycle between two files.
#[tokio::test]
async fn import_cycle_end_to_end() {
    let dir = TempDir::new().unwrap();
    write(&dir, "x.ts", "import \"./y\";\n");
    write(&dir, "y.ts", "import \"./x\";\n");

    let mut analyzer = analyzer_for(&dir);
    analyzer.initialize(CodeGraph::new()).await.unwrap();
    let result = analyzer
        .analyze_changes(
            &CancelToken::none(),
            &[PathBuf::from("x.ts"), PathBuf::from("y.ts")],
        )
        .await
        .unwrap();

    assert_eq!(result.relationships.cycles.len(), 1);
    let cycle = &result.relationships.cycles[0];
    assert_eq!(cycle.files.len(), 3);
    assert_eq!(cycle.files.first(), cycle.files.last());
    assert!(result.relationships.isolates.is_empty());
}

/// Scenario: rename detection fuses a delete/add pair with confidence.
#[tokio::test]
async fn rename_detection_end_to_end() {
    let old = "export function alpha(n: number): number { return n; }\n";
    let new = "export function alphaBeta(n: number): number { return n; }\n";

    // Symbol-layer check: one rename entry, no raw add/delete.
    let dir = TempDir::new().unwrap();
    write(&dir, "a.ts", old);
    let pool = arbor_parser::create_parser_pool();
    let old_ast = pool
        .parse_blocking(arbor_parser::ParseRequest {
            path: PathBuf::from("a.ts"),
            language: arbor_core::Language::TypeScript,
            content: old.to_string(),
        })
        .unwrap();
    let new_ast = pool
        .parse_blocking(arbor_parser::ParseRequest {
            path: PathBuf::from("a.ts"),
            language: arbor_core::Language::TypeScript,
            content: new.to_string(),
        })
        .unwrap();
    let old_symbols = arbor_parser::extract::extract_symbols(&old_ast);
    let new_symbols = arbor_parser::extract::extract_symbols(&new_ast);
    let changes = arbor_engine::classify_symbols(&old_symbols, &new_symbols);
    assert_eq!(changes.renamed.len(), 1);
    assert!(changes.renamed[0].confidence >= 0.7);
    assert!(changes.added.is_empty());
    assert!(changes.deleted.is_empty());

    // Graph-layer check: the rename lands as a single surviving symbol.
    let mut analyzer = analyzer_for(&dir);
    analyzer.initialize(CodeGraph::new()).await.unwrap();
    analyzer
        .analyze_changes(&CancelToken::none(), &[PathBuf::from("a.ts")])
        .await
        .unwrap();
    write(&dir, "a.ts", new);
    let result = analyzer
        .analyze_changes(&CancelToken::none(), &[PathBuf::from("a.ts")])
        .await
        .unwrap();
    let graph = &result.updated_graph;
    assert_eq!(graph.symbol_count(), 1);
    let symbol = graph.symbols().next().unwrap();
    assert_eq!(symbol.name, "alphaBeta");
    assert_eq!(symbol.kind, SymbolKind::Function);
}

/// Scenario: a malformed change leaves the actual graph untouched and no
/// plan is rolled back (validation rejects before apply).
#[tokio::test]
async fn validation_rejects_without_mutation() {
    let dir = TempDir::new().unwrap();
    write(&dir, "a.ts", "export function f(): number { return 1; }");

    let mut analyzer = analyzer_for(&dir);
    analyzer.initialize(CodeGraph::new()).await.unwrap();
    analyzer
        .analyze_changes(&CancelToken::none(), &[PathBuf::from("a.ts")])
        .await
        .unwrap();
    let engine = analyzer.engine().clone();
    let before = engine.get_actual_graph().await;

    // A symbol add pointing at a file the graph does not contain makes the
    // shadow inconsistent; validation rejects the batch before apply.
    let orphan = arbor_core::Symbol {
        id: arbor_core::SymbolId::new("missing.ts", "ghost", 1),
        name: "ghost".to_string(),
        kind: SymbolKind::Function,
        language: arbor_core::Language::TypeScript,
        location: arbor_core::SourceLocation::default(),
        signature: "function ghost(): void".to_string(),
        documentation: None,
        visibility: arbor_core::Visibility::Public,
        qualified_name: "ghost".to_string(),
    };
    engine
        .queue_change(ChangeSet::symbol_add("missing.ts", &orphan).unwrap())
        .unwrap();
    let error = engine
        .process_pending_changes(&CancelToken::none())
        .await
        .unwrap_err();
    assert!(matches!(error, arbor_engine::EngineError::Validation(_)));

    assert_eq!(engine.get_actual_graph().await, before);
    let metrics = engine.get_metrics();
    assert_eq!(metrics.plans_rolled_back, 0);
}

/// Scenario: an urgent delete emits ahead of ordinary modifications and
/// within half the batch timeout.
#[tokio::test]
async fn batch_priority_end_to_end() {
    let batcher = ChangeBatcher::new(&EngineConfig {
        batch_threshold: 10,
        batch_timeout: Duration::from_millis(500),
        ..EngineConfig::default()
    });

    let _ = batcher.add(ChangeSet::new(ChangeType::SymbolModify, "a.ts", Vec::new()));
    let _ = batcher.add(ChangeSet::new(ChangeType::SymbolModify, "b.ts", Vec::new()));
    let _ = batcher.add(ChangeSet::new(ChangeType::FileDelete, "c.ts", Vec::new()));

    // At 60% of the timeout only the urgent batch is due.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let due = batcher.poll_due(std::time::Instant::now());
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].file_path, "c.ts");
    assert_eq!(due[0].top_priority, 1);

    // Draining afterwards keeps priority order for the rest.
    let rest = batcher.process_all();
    assert_eq!(rest.len(), 2);
    assert_eq!(rest[0].file_path, "a.ts");
    assert_eq!(rest[1].file_path, "b.ts");
}

/// Invariant: a sequence of change sets through the engine equals applying
/// the same sequence to a fresh engine in one go.
#[tokio::test]
async fn sequential_and_batched_processing_agree() {
    let dir = TempDir::new().unwrap();
    write(&dir, "a.ts", "export function f(): void {}\n");
    write(&dir, "b.ts", "import \"./a\";\nexport function g(): void {}\n");
    write(&dir, "c.ts", "export const answer = 42;\n");

    // One file at a time.
    let mut stepwise = analyzer_for(&dir);
    stepwise.initialize(CodeGraph::new()).await.unwrap();
    for file in ["a.ts", "b.ts", "c.ts"] {
        stepwise
            .analyze_changes(&CancelToken::none(), &[PathBuf::from(file)])
            .await
            .unwrap();
    }
    let stepwise_graph = stepwise.engine().get_actual_graph().await;

    // All at once.
    let mut batched = analyzer_for(&dir);
    batched.initialize(CodeGraph::new()).await.unwrap();
    let result = batched
        .analyze_changes(
            &CancelToken::none(),
            &[
                PathBuf::from("a.ts"),
                PathBuf::from("b.ts"),
                PathBuf::from("c.ts"),
            ],
        )
        .await
        .unwrap();

    // Metadata timestamps differ between runs; compare the entity state.
    assert_eq!(
        stepwise_graph.files().collect::<Vec<_>>(),
        result.updated_graph.files().collect::<Vec<_>>()
    );
    assert_eq!(
        stepwise_graph.symbols().collect::<Vec<_>>(),
        result.updated_graph.symbols().collect::<Vec<_>>()
    );
    assert_eq!(
        stepwise_graph.edges().collect::<Vec<_>>(),
        result.updated_graph.edges().collect::<Vec<_>>()
    );
    stepwise_graph.check_consistency().unwrap();
}

/// Full-repository scan through the public surface.
#[tokio::test]
async fn scan_and_analyze_repository() {
    let dir = TempDir::new().unwrap();
    write(&dir, "src/app.ts", "import { helper } from \"./util\";\nexport function app(): void { helper(); }\n");
    write(&dir, "src/util.ts", "export function helper(): void {}\n");
    write(&dir, "config.json", "{\"name\": \"demo\"}");
    write(&dir, "node_modules/x/index.js", "module.exports = 1;");

    let mut analyzer = analyzer_for(&dir);
    analyzer.initialize(CodeGraph::new()).await.unwrap();
    let paths = scan_repository(dir.path());
    assert_eq!(paths.len(), 3);

    let result = analyzer
        .analyze_changes(&CancelToken::none(), &paths)
        .await
        .unwrap();
    let graph = &result.updated_graph;
    assert_eq!(graph.file_count(), 3);
    assert_eq!(result.relationships.import_edges, 1);
    assert!(graph.file("config.json").is_some());
    assert_eq!(graph.file("config.json").unwrap().symbol_count, 0);
    graph.check_consistency().unwrap();

    // Idempotence: re-analyzing unchanged paths is a no-op.
    let again = analyzer
        .analyze_changes(&CancelToken::none(), &paths)
        .await
        .unwrap();
    assert!(again.processed_changes.is_empty());
}

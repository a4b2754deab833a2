//! Unit tests for arbor-core

use std::path::Path;
use std::time::SystemTime;

use crate::model::*;
use crate::CodeGraph;

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
        signature: format!("{}(): void", name),
        documentation: None,
        visibility: Visibility::Public,
        qualified_name: format!("{}::{}", path, name),
    }
}

pub fn sample_file(path: &str, symbols: &[&Symbol]) -> FileNode {
    FileNode {
        path: path.to_string(),
        language: Language::TypeScript,
        size_bytes: 120,
        line_count: 10,
        symbol_count: symbols.len() as u32,
        import_count: 0,
        is_test: false,
        is_generated: false,
        modified_at: SystemTime::UNIX_EPOCH,
        symbols: symbols.iter().map(|s| s.id.clone()).collect(),
        imports: Vec::new(),
    }
}

/// Insert a file with its symbols and the matching graph nodes.
pub fn insert_file_slice(graph: &mut CodeGraph, file: FileNode, symbols: Vec<Symbol>) {
    graph.insert_node(GraphNode {
        id: NodeId::for_file(&file.path),
        kind: NodeKind::File,
        label: file.path.clone(),
        file_path: file.path.clone(),
        metadata: MetaMap::new(),
    });
    for symbol in symbols {
        graph.insert_node(GraphNode {
            id: NodeId::for_symbol(&symbol.id),
            kind: NodeKind::Symbol,
            label: symbol.name.clone(),
            file_path: file.path.clone(),
            metadata: MetaMap::new(),
        });
        graph.insert_symbol(symbol);
    }
    graph.insert_file(file);
    graph.refresh_metadata_totals();
}

#[test]
fn symbol_id_is_stable_and_carries_owner() {
    let a = SymbolId::new("src/a.ts", "f", 3);
    let b = SymbolId::new("src/a.ts", "f", 3);
    assert_eq!(a, b);
    assert_eq!(a.owner_path(), Some("src/a.ts"));

    let c = SymbolId::new("src/a.ts", "g", 3);
    assert_ne!(a, c);
}

#[test]
fn language_detection_covers_whitelist() {
    let cases = [
        ("a.ts", Some(Language::TypeScript)),
        ("a.tsx", Some(Language::TypeScript)),
        ("a.js", Some(Language::JavaScript)),
        ("a.jsx", Some(Language::JavaScript)),
        ("a.json", Some(Language::Json)),
        ("a.yaml", Some(Language::Yaml)),
        ("a.yml", Some(Language::Yaml)),
        ("a.rs", None),
        ("a.py", None),
        ("Makefile", None),
    ];
    for (name, expected) in cases {
        assert_eq!(Language::from_path(Path::new(name)), expected, "{}", name);
    }
}

#[test]
fn external_node_id_form() {
    let id = NodeId::external("react");
    assert_eq!(id.0, "external-react");
    assert!(id.is_external());
    assert!(!NodeId::for_file("src/a.ts").is_external());
}

#[test]
fn insert_and_cascade_remove() {
    let mut graph = CodeGraph::new();
    let sym = sample_symbol("src/a.ts", "f", 1);
    let file = sample_file("src/a.ts", &[&sym]);
    insert_file_slice(&mut graph, file, vec![sym.clone()]);

    let other = sample_symbol("src/b.ts", "g", 1);
    let other_file = sample_file("src/b.ts", &[&other]);
    insert_file_slice(&mut graph, other_file, vec![other.clone()]);

    let source = NodeId::for_symbol(&other.id);
    let target = NodeId::for_symbol(&sym.id);
    graph.insert_edge(GraphEdge {
        id: EdgeId::derive(&source, &target, EdgeKind::References),
        source,
        target,
        kind: EdgeKind::References,
        weight: 1.0,
        metadata: MetaMap::new(),
    });
    assert_eq!(graph.edge_count(), 1);

    graph.remove_file_cascade("src/a.ts");
    graph.refresh_metadata_totals();

    assert!(graph.file("src/a.ts").is_none());
    assert!(graph.symbol(&sym.id).is_none());
    assert!(graph.node(&NodeId::for_file("src/a.ts")).is_none());
    // Edge touched the removed symbol node, so it must be gone too.
    assert_eq!(graph.edge_count(), 0);
    graph.check_consistency().unwrap();
}

#[test]
fn deep_copy_is_independent() {
    let mut graph = CodeGraph::new();
    let sym = sample_symbol("src/a.ts", "f", 1);
    let file = sample_file("src/a.ts", &[&sym]);
    insert_file_slice(&mut graph, file, vec![sym]);

    let mut copy = graph.deep_copy();
    assert_eq!(copy, graph);

    copy.remove_file_cascade("src/a.ts");
    assert_ne!(copy, graph);
    assert!(graph.file("src/a.ts").is_some());
}

#[test]
fn consistency_detects_orphan_symbol() {
    let mut graph = CodeGraph::new();
    let sym = sample_symbol("src/a.ts", "f", 1);
    // Symbol inserted without any file listing it.
    graph.insert_symbol(sym.clone());
    graph.insert_node(GraphNode {
        id: NodeId::for_symbol(&sym.id),
        kind: NodeKind::Symbol,
        label: sym.name.clone(),
        file_path: "src/a.ts".to_string(),
        metadata: MetaMap::new(),
    });
    graph.refresh_metadata_totals();

    let err = graph.check_consistency().unwrap_err();
    assert!(err.violations.iter().any(|v| v.contains("not listed")));
}

#[test]
fn consistency_detects_dangling_edge() {
    let mut graph = CodeGraph::new();
    let sym = sample_symbol("src/a.ts", "f", 1);
    let file = sample_file("src/a.ts", &[&sym]);
    insert_file_slice(&mut graph, file, vec![sym]);

    graph.insert_edge(GraphEdge {
        id: EdgeId::derive(
            &NodeId::for_file("src/a.ts"),
            &NodeId::for_file("src/missing.ts"),
            EdgeKind::Imports,
        ),
        source: NodeId::for_file("src/a.ts"),
        target: NodeId::for_file("src/missing.ts"),
        kind: EdgeKind::Imports,
        weight: 1.0,
        metadata: MetaMap::new(),
    });

    let err = graph.check_consistency().unwrap_err();
    assert!(err.violations.iter().any(|v| v.contains("missing node")));
}

#[test]
fn external_edge_endpoint_is_allowed() {
    let mut graph = CodeGraph::new();
    let sym = sample_symbol("src/a.ts", "f", 1);
    let mut file = sample_file("src/a.ts", &[&sym]);
    file.imports.push(Import {
        path: "react".to_string(),
        specifiers: vec!["useState".to_string()],
        is_default: false,
        is_relative: false,
        line: 0,
    });
    file.import_count = 1;
    insert_file_slice(&mut graph, file, vec![sym]);

    graph.insert_edge(GraphEdge {
        id: EdgeId::derive(
            &NodeId::for_file("src/a.ts"),
            &NodeId::external("react"),
            EdgeKind::Imports,
        ),
        source: NodeId::for_file("src/a.ts"),
        target: NodeId::external("react"),
        kind: EdgeKind::Imports,
        weight: 0.5,
        metadata: MetaMap::new(),
    });

    graph.check_consistency().unwrap();
}

#[test]
fn histogram_tracks_languages() {
    let mut graph = CodeGraph::new();
    let sym = sample_symbol("src/a.ts", "f", 1);
    let file = sample_file("src/a.ts", &[&sym]);
    insert_file_slice(&mut graph, file, vec![sym]);

    let mut js = sample_file("src/b.js", &[]);
    js.language = Language::JavaScript;
    insert_file_slice(&mut graph, js, vec![]);

    assert_eq!(graph.metadata.languages.get(&Language::TypeScript), Some(&1));
    assert_eq!(graph.metadata.languages.get(&Language::JavaScript), Some(&1));
    assert_eq!(graph.metadata.total_files, 2);
    assert_eq!(graph.metadata.total_symbols, 1);
}

#[test]
fn owning_file_derives_from_id() {
    let mut graph = CodeGraph::new();
    let sym = sample_symbol("src/a.ts", "f", 1);
    let file = sample_file("src/a.ts", &[&sym]);
    insert_file_slice(&mut graph, file, vec![sym.clone()]);

    let owner = graph.owning_file(&sym.id).unwrap();
    assert_eq!(owner.path, "src/a.ts");

    let stranger = SymbolId::new("src/other.ts", "f", 1);
    assert!(graph.owning_file(&stranger).is_none());
}

#[test]
fn directed_edge_queries() {
    let mut graph = CodeGraph::new();
    let a = sample_symbol("src/a.ts", "f", 1);
    let file_a = sample_file("src/a.ts", &[&a]);
    insert_file_slice(&mut graph, file_a, vec![a]);
    let b = sample_symbol("src/b.ts", "g", 1);
    let file_b = sample_file("src/b.ts", &[&b]);
    insert_file_slice(&mut graph, file_b, vec![b]);

    let source = NodeId::for_file("src/a.ts");
    let target = NodeId::for_file("src/b.ts");
    graph.insert_edge(GraphEdge {
        id: EdgeId::derive(&source, &target, EdgeKind::Depends),
        source: source.clone(),
        target: target.clone(),
        kind: EdgeKind::Depends,
        weight: 1.0,
        metadata: MetaMap::new(),
    });

    assert_eq!(graph.edges_from(&source).count(), 1);
    assert_eq!(graph.edges_to(&target).count(), 1);
    assert_eq!(graph.edges_from(&target).count(), 0);
}

#[test]
fn empty_graph_is_consistent() {
    let graph = CodeGraph::new();
    graph.check_consistency().unwrap();
    assert!(graph.is_empty());
    assert_eq!(graph.metadata.total_files, 0);
}

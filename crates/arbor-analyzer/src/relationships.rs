//! Relationship analysis over the actual graph
//!
//! Recomputed after every apply: import edges (with external synthetic
//! targets), signature-derived reference edges, import cycles, hotspots,
//! and isolates. Results land in the graph metadata and are returned to
//! the caller.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use arbor_core::{
    CircularDependency, CodeGraph, EdgeId, EdgeKind, GraphEdge, GraphNode, Hotspot, MetaMap,
    MetaValue, NodeId, NodeKind, RelationshipMetrics,
};
use tracing::debug;

/// Candidate extensions for relative import resolution, tried in order.
const RESOLUTION_EXTENSIONS: &[&str] = &[".ts", ".tsx", ".js", ".jsx"];

/// Hotspot score threshold.
const HOTSPOT_THRESHOLD: f64 = 2.0;

/// Type-ish names that never produce reference edges.
const BUILTIN_NAMES: &[&str] = &[
    "string", "number", "boolean", "void", "any", "unknown", "never", "null", "undefined",
    "object", "symbol", "bigint", "this", "true", "false", "Promise", "Array", "Map", "Set",
    "Date", "RegExp", "Error", "Record", "Partial", "Readonly", "Required", "Pick", "Omit",
    "Function", "Object", "String", "Number", "Boolean",
    // Declaration keywords that survive signature tokenization.
    "function", "class", "interface", "type", "enum", "namespace", "const", "let", "var",
    "export", "import", "return", "extends", "implements", "static", "public", "private",
    "protected", "abstract", "async", "await", "new", "readonly", "declare", "default",
];

/// Recompute every derived relationship. Previous derived edges and
/// synthetic external nodes are dropped first, so the operation is
/// idempotent over an unchanged graph.
pub fn recompute(graph: &mut CodeGraph) -> RelationshipMetrics {
    graph.remove_edges_of_kind(EdgeKind::Imports);
    graph.remove_edges_of_kind(EdgeKind::References);
    graph.remove_edges_of_kind(EdgeKind::Contains);
    graph.remove_edges_of_kind(EdgeKind::Extends);
    graph.remove_edges_of_kind(EdgeKind::Implements);
    let externals: Vec<NodeId> = graph
        .nodes()
        .filter(|node| node.kind == NodeKind::External)
        .map(|node| node.id.clone())
        .collect();
    for id in externals {
        graph.remove_node(&id);
    }

    let mut metrics = RelationshipMetrics::default();
    resolve_imports(graph, &mut metrics);
    resolve_containment(graph, &mut metrics);
    resolve_references(graph, &mut metrics);
    resolve_hierarchy(graph, &mut metrics);
    metrics.cycles = detect_cycles(graph);
    metrics.hotspots = score_hotspots(graph);
    metrics.isolates = find_isolates(graph);

    graph.metadata.config.insert(
        "relationships".to_string(),
        MetaValue::Relationships(metrics.clone()),
    );
    metrics
}

// ── Containment edges ───────────────────────────────────

/// Every file contains its owned symbols.
fn resolve_containment(graph: &mut CodeGraph, metrics: &mut RelationshipMetrics) {
    let mut planned: Vec<(NodeId, NodeId)> = Vec::new();
    for file in graph.files() {
        let source = NodeId::for_file(&file.path);
        for symbol_id in &file.symbols {
            planned.push((source.clone(), NodeId::for_symbol(symbol_id)));
        }
    }
    for (source, target) in planned {
        metrics.contains_edges += 1;
        graph.insert_edge(GraphEdge {
            id: EdgeId::derive(&source, &target, EdgeKind::Contains),
            source,
            target,
            kind: EdgeKind::Contains,
            weight: 1.0,
            metadata: MetaMap::new(),
        });
    }
}

// ── Hierarchy edges ─────────────────────────────────────

/// Class and interface signatures carry their heritage clauses; resolve
/// `extends` and `implements` names against known symbols.
fn resolve_hierarchy(graph: &mut CodeGraph, metrics: &mut RelationshipMetrics) {
    let mut by_name: HashMap<String, NodeId> = HashMap::new();
    for symbol in graph.symbols() {
        if matches!(
            symbol.kind,
            arbor_core::SymbolKind::Class | arbor_core::SymbolKind::Interface
        ) {
            by_name
                .entry(symbol.name.clone())
                .or_insert_with(|| NodeId::for_symbol(&symbol.id));
        }
    }

    let mut planned: Vec<(NodeId, NodeId, EdgeKind)> = Vec::new();
    for symbol in graph.symbols() {
        if !matches!(
            symbol.kind,
            arbor_core::SymbolKind::Class | arbor_core::SymbolKind::Interface
        ) {
            continue;
        }
        let source = NodeId::for_symbol(&symbol.id);
        let heritage = parse_heritage(&symbol.signature);
        for name in heritage.extends {
            if name == symbol.name {
                continue;
            }
            if let Some(target) = by_name.get(&name) {
                planned.push((source.clone(), target.clone(), EdgeKind::Extends));
            }
        }
        for name in heritage.implements {
            if name == symbol.name {
                continue;
            }
            if let Some(target) = by_name.get(&name) {
                planned.push((source.clone(), target.clone(), EdgeKind::Implements));
            }
        }
    }

    for (source, target, kind) in planned {
        match kind {
            EdgeKind::Extends => metrics.extends_edges += 1,
            EdgeKind::Implements => metrics.implements_edges += 1,
            _ => {}
        }
        graph.insert_edge(GraphEdge {
            id: EdgeId::derive(&source, &target, kind),
            source,
            target,
            kind,
            weight: 1.0,
            metadata: MetaMap::new(),
        });
    }
}

struct Heritage {
    extends: Vec<String>,
    implements: Vec<String>,
}

/// Pull base names out of a declaration signature like
/// `class Widget extends Base implements IShape, IRender`.
fn parse_heritage(signature: &str) -> Heritage {
    enum Clause {
        None,
        Extends,
        Implements,
    }

    let mut extends = Vec::new();
    let mut implements = Vec::new();
    let mut clause = Clause::None;

    for raw in signature.split(|c: char| c.is_whitespace() || c == ',') {
        let token = raw.trim();
        if token.is_empty() {
            continue;
        }
        match token {
            "extends" => {
                clause = Clause::Extends;
                continue;
            }
            "implements" => {
                clause = Clause::Implements;
                continue;
            }
            _ => {}
        }
        // Strip generic arguments: Base<T> names Base.
        let name = token.split('<').next().unwrap_or(token);
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        {
            continue;
        }
        match clause {
            Clause::Extends => extends.push(name.to_string()),
            Clause::Implements => implements.push(name.to_string()),
            Clause::None => {}
        }
    }

    Heritage {
        extends,
        implements,
    }
}

// ── Import edges ────────────────────────────────────────

fn resolve_imports(graph: &mut CodeGraph, metrics: &mut RelationshipMetrics) {
    struct PlannedEdge {
        source: NodeId,
        target: NodeId,
        weight: f64,
        external: bool,
    }

    let mut planned = Vec::new();
    let mut external_nodes: BTreeMap<NodeId, String> = BTreeMap::new();

    for file in graph.files() {
        let source = NodeId::for_file(&file.path);
        for import in &file.imports {
            if import.is_relative {
                match resolve_relative(graph, &file.path, &import.path) {
                    Some(target_path) => planned.push(PlannedEdge {
                        source: source.clone(),
                        target: NodeId::for_file(&target_path),
                        weight: 1.0,
                        external: false,
                    }),
                    None => {
                        debug!(file = %file.path, import = %import.path, "unresolved relative import dropped");
                    }
                }
            } else if !import.path.starts_with('/') {
                let target = NodeId::external(&import.path);
                external_nodes.insert(target.clone(), import.path.clone());
                planned.push(PlannedEdge {
                    source: source.clone(),
                    target,
                    weight: 0.5,
                    external: true,
                });
            } else {
                debug!(file = %file.path, import = %import.path, "absolute import dropped");
            }
        }
    }

    for (id, import_path) in external_nodes {
        graph.insert_node(GraphNode {
            id,
            kind: NodeKind::External,
            label: import_path.clone(),
            file_path: String::new(),
            metadata: MetaMap::new(),
        });
    }

    for edge in planned {
        let mut metadata = MetaMap::new();
        if edge.external {
            metadata.insert("is_external".to_string(), MetaValue::Bool(true));
            metrics.external_edges += 1;
        } else {
            metrics.import_edges += 1;
        }
        graph.insert_edge(GraphEdge {
            id: EdgeId::derive(&edge.source, &edge.target, EdgeKind::Imports),
            source: edge.source,
            target: edge.target,
            kind: EdgeKind::Imports,
            weight: edge.weight,
            metadata,
        });
    }
}

/// Join `dirname(from)` with the import path and probe candidate files:
/// the path as written, each candidate extension, then `index.<ext>` in
/// the directory.
fn resolve_relative(graph: &CodeGraph, from: &str, import_path: &str) -> Option<String> {
    let base_dir = match from.rfind('/') {
        Some(position) => &from[..position],
        None => "",
    };
    let joined = normalize_path(&format!("{}/{}", base_dir, import_path));

    if graph.file(&joined).is_some() {
        return Some(joined);
    }
    for extension in RESOLUTION_EXTENSIONS {
        let candidate = format!("{}{}", joined, extension);
        if graph.file(&candidate).is_some() {
            return Some(candidate);
        }
    }
    for extension in RESOLUTION_EXTENSIONS {
        let candidate = format!("{}/index{}", joined, extension);
        if graph.file(&candidate).is_some() {
            return Some(candidate);
        }
    }
    None
}

/// Resolve `.` and `..` segments in a repo-relative path.
fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

// ── Reference edges ─────────────────────────────────────

fn resolve_references(graph: &mut CodeGraph, metrics: &mut RelationshipMetrics) {
    // Name index over all symbols; first owner wins for duplicates.
    let mut by_name: HashMap<String, NodeId> = HashMap::new();
    for symbol in graph.symbols() {
        by_name
            .entry(symbol.name.clone())
            .or_insert_with(|| NodeId::for_symbol(&symbol.id));
    }

    let mut planned: Vec<(NodeId, NodeId)> = Vec::new();
    for symbol in graph.symbols() {
        let source = NodeId::for_symbol(&symbol.id);
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        for token in signature_tokens(&symbol.signature) {
            if token == symbol.name || BUILTIN_NAMES.contains(&token) || !seen.insert(token) {
                continue;
            }
            if let Some(target) = by_name.get(token) {
                if target != &source {
                    planned.push((source.clone(), target.clone()));
                }
            }
        }
    }

    for (source, target) in planned {
        metrics.reference_edges += 1;
        graph.insert_edge(GraphEdge {
            id: EdgeId::derive(&source, &target, EdgeKind::References),
            source,
            target,
            kind: EdgeKind::References,
            weight: 1.0,
            metadata: MetaMap::new(),
        });
    }
}

/// Split a signature into candidate type tokens. The delimiter set also
/// covers generic, union, and default-value punctuation so composite type
/// expressions decompose into their component names (see DESIGN.md).
fn signature_tokens(signature: &str) -> impl Iterator<Item = &str> {
    signature
        .split(|c: char| {
            c.is_whitespace()
                || matches!(c, ':' | ',' | '(' | ')' | ';' | '<' | '>' | '{' | '}' | '[' | ']' | '=' | '|' | '&')
        })
        .filter(|token| {
            !token.is_empty()
                && token
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
                && token.chars().next().is_some_and(|c| !c.is_ascii_digit())
        })
}

// ── Cycles ──────────────────────────────────────────────

/// DFS with a recursion stack over the internal import graph.
fn detect_cycles(graph: &CodeGraph) -> Vec<CircularDependency> {
    let mut adjacency: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for file in graph.files() {
        adjacency.entry(&file.path).or_default();
    }
    for edge in graph.edges() {
        if edge.kind != EdgeKind::Imports || edge.target.is_external() {
            continue;
        }
        let (Some(source), Some(target)) = (
            edge.source.0.strip_prefix("file:"),
            edge.target.0.strip_prefix("file:"),
        ) else {
            continue;
        };
        adjacency.entry(source).or_default().push(target);
    }
    for targets in adjacency.values_mut() {
        targets.sort();
    }

    let mut cycles = Vec::new();
    let mut seen_signatures: HashSet<BTreeSet<String>> = HashSet::new();
    let mut visited: HashSet<&str> = HashSet::new();

    for start in adjacency.keys().copied().collect::<Vec<_>>() {
        if visited.contains(start) {
            continue;
        }
        let mut stack: Vec<&str> = Vec::new();
        let mut on_stack: HashSet<&str> = HashSet::new();
        dfs_cycles(
            start,
            &adjacency,
            &mut visited,
            &mut stack,
            &mut on_stack,
            &mut seen_signatures,
            &mut cycles,
        );
    }
    cycles
}

fn dfs_cycles<'a>(
    node: &'a str,
    adjacency: &BTreeMap<&'a str, Vec<&'a str>>,
    visited: &mut HashSet<&'a str>,
    stack: &mut Vec<&'a str>,
    on_stack: &mut HashSet<&'a str>,
    seen: &mut HashSet<BTreeSet<String>>,
    cycles: &mut Vec<CircularDependency>,
) {
    visited.insert(node);
    stack.push(node);
    on_stack.insert(node);

    for &next in adjacency.get(node).map(Vec::as_slice).unwrap_or_default() {
        if on_stack.contains(next) {
            // Back edge: the cycle runs from `next` to the stack top.
            if let Some(position) = stack.iter().position(|&entry| entry == next) {
                let mut files: Vec<String> =
                    stack[position..].iter().map(|s| s.to_string()).collect();
                files.push(next.to_string());
                let signature: BTreeSet<String> =
                    files.iter().take(files.len() - 1).cloned().collect();
                if seen.insert(signature) {
                    cycles.push(CircularDependency {
                        files,
                        back_edge_target: next.to_string(),
                    });
                }
            }
        } else if !visited.contains(next) {
            dfs_cycles(next, adjacency, visited, stack, on_stack, seen, cycles);
        }
    }

    stack.pop();
    on_stack.remove(node);
}

// ── Hotspots and isolates ───────────────────────────────

/// Hotspot score: own import count plus twice the import in-degree.
fn score_hotspots(graph: &CodeGraph) -> Vec<Hotspot> {
    let mut in_degree: HashMap<&str, u32> = HashMap::new();
    for edge in graph.edges() {
        if edge.kind != EdgeKind::Imports {
            continue;
        }
        if let Some(target) = edge.target.0.strip_prefix("file:") {
            *in_degree.entry(target).or_insert(0) += 1;
        }
    }

    let mut hotspots: Vec<Hotspot> = graph
        .files()
        .filter_map(|file| {
            let reference_count = in_degree.get(file.path.as_str()).copied().unwrap_or(0);
            let score = file.import_count as f64 + 2.0 * reference_count as f64;
            (score >= HOTSPOT_THRESHOLD).then(|| Hotspot {
                path: file.path.clone(),
                score,
                import_count: file.import_count,
                reference_count,
            })
        })
        .collect();
    hotspots.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.path.cmp(&b.path)));
    hotspots
}

/// Files without any incident import edge in either direction.
fn find_isolates(graph: &CodeGraph) -> Vec<String> {
    let mut connected: HashSet<&str> = HashSet::new();
    for edge in graph.edges() {
        if edge.kind != EdgeKind::Imports {
            continue;
        }
        for endpoint in [&edge.source, &edge.target] {
            if let Some(path) = endpoint.0.strip_prefix("file:") {
                connected.insert(path);
            }
        }
    }
    graph
        .files()
        .filter(|file| !connected.contains(file.path.as_str()))
        .map(|file| file.path.clone())
        .collect()
}

/// Count distinct files reachable over reverse import edges from the given
/// set, bounded by `depth`. Used for blast-radius estimates.
pub fn dependents_within(graph: &CodeGraph, roots: &[String], depth: usize) -> usize {
    let mut reverse: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in graph.edges() {
        if edge.kind != EdgeKind::Imports {
            continue;
        }
        let (Some(source), Some(target)) = (
            edge.source.0.strip_prefix("file:"),
            edge.target.0.strip_prefix("file:"),
        ) else {
            continue;
        };
        reverse.entry(target).or_default().push(source);
    }

    let mut found: HashSet<&str> = HashSet::new();
    let mut frontier: Vec<&str> = roots
        .iter()
        .filter_map(|root| reverse.keys().find(|k| **k == root.as_str()).copied())
        .collect();
    for _ in 0..depth {
        let mut next = Vec::new();
        for node in frontier {
            for &dependent in reverse.get(node).map(Vec::as_slice).unwrap_or_default() {
                if !roots.iter().any(|r| r == dependent) && found.insert(dependent) {
                    next.push(dependent);
                }
            }
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }
    found.len()
}

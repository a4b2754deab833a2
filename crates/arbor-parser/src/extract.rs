//! Symbol and import extraction from owned ASTs
//!
//! Extraction is deterministic: a preorder walk with a scope stack, so
//! identical content always yields byte-identical symbol and import
//! sequences.

use arbor_core::{Import, Language, Symbol, SymbolId, SymbolKind, Visibility};

use crate::ast::{AstNode, SourceAst};

/// Node kinds whose bodies terminate a signature.
const BODY_KINDS: &[&str] = &["statement_block", "class_body", "object_type", "enum_body"];

/// Extract the ordered symbol sequence for a file. Data files (json, yaml)
/// carry no symbols.
pub fn extract_symbols(ast: &SourceAst) -> Vec<Symbol> {
    match ast.language {
        Language::TypeScript | Language::JavaScript => {}
        Language::Json | Language::Yaml => return Vec::new(),
    }
    let mut out = Vec::new();
    let mut scope = Vec::new();
    collect_symbols(ast, &ast.root, &mut scope, false, None, &mut out);
    out
}

fn collect_symbols(
    ast: &SourceAst,
    node: &AstNode,
    scope: &mut Vec<String>,
    exported: bool,
    doc: Option<&AstNode>,
    out: &mut Vec<Symbol>,
) {
    match node.kind.as_str() {
        "export_statement" => {
            // The declaration nested under the export inherits public
            // visibility; re-associate any doc comment with it.
            for child in &node.children {
                collect_symbols(ast, child, scope, true, doc, out);
            }
            return;
        }
        "function_declaration" | "generator_function_declaration" => {
            if let Some(symbol) = build_symbol(ast, node, SymbolKind::Function, scope, exported, doc)
            {
                out.push(symbol);
            }
            return;
        }
        "method_definition" => {
            if let Some(symbol) = build_symbol(ast, node, SymbolKind::Method, scope, exported, doc) {
                out.push(symbol);
            }
            return;
        }
        "class_declaration" | "abstract_class_declaration" => {
            if let Some(symbol) = build_symbol(ast, node, SymbolKind::Class, scope, exported, doc) {
                let name = symbol.name.clone();
                out.push(symbol);
                scope.push(name);
                walk_children(ast, node, scope, out);
                scope.pop();
            }
            return;
        }
        "interface_declaration" => {
            if let Some(symbol) =
                build_symbol(ast, node, SymbolKind::Interface, scope, exported, doc)
            {
                out.push(symbol);
            }
            return;
        }
        "type_alias_declaration" | "enum_declaration" => {
            if let Some(symbol) = build_symbol(ast, node, SymbolKind::Type, scope, exported, doc) {
                out.push(symbol);
            }
            return;
        }
        "internal_module" | "module" => {
            if let Some(symbol) =
                build_symbol(ast, node, SymbolKind::Namespace, scope, exported, doc)
            {
                let name = symbol.name.clone();
                out.push(symbol);
                scope.push(name);
                walk_children(ast, node, scope, out);
                scope.pop();
            }
            return;
        }
        "lexical_declaration" | "variable_declaration" => {
            for declarator in node
                .children
                .iter()
                .filter(|c| c.kind == "variable_declarator")
            {
                let kind = if declarator
                    .children
                    .iter()
                    .any(|c| c.kind == "arrow_function" || c.kind == "function_expression")
                {
                    SymbolKind::Function
                } else {
                    SymbolKind::Variable
                };
                if let Some(symbol) = build_symbol(ast, declarator, kind, scope, exported, doc) {
                    out.push(symbol);
                }
            }
            return;
        }
        _ => {}
    }

    walk_children(ast, node, scope, out);
}

/// Iterate children tracking doc comments: a comment node directly above a
/// declaration documents it.
fn walk_children(ast: &SourceAst, node: &AstNode, scope: &mut Vec<String>, out: &mut Vec<Symbol>) {
    let mut pending_comment: Option<&AstNode> = None;
    for child in &node.children {
        if child.kind == "comment" {
            pending_comment = Some(child);
            continue;
        }
        let doc = pending_comment
            .take()
            .filter(|comment| comment.location.end_line + 1 >= child.location.start_line);
        collect_symbols(ast, child, scope, false, doc, out);
    }
}

fn build_symbol(
    ast: &SourceAst,
    node: &AstNode,
    kind: SymbolKind,
    scope: &[String],
    exported: bool,
    doc: Option<&AstNode>,
) -> Option<Symbol> {
    let name_node = node.children.iter().find(|c| {
        matches!(
            c.kind.as_str(),
            "identifier" | "type_identifier" | "property_identifier" | "string" | "nested_identifier"
        )
    })?;
    let name = ast.node_text(name_node).trim_matches('"').to_string();
    if name.is_empty() {
        return None;
    }

    let qualified_name = if scope.is_empty() {
        name.clone()
    } else {
        format!("{}.{}", scope.join("."), name)
    };

    let visibility = visibility_of(ast, node, exported, kind);
    let documentation = doc.map(|comment| clean_comment(ast.node_text(comment)));

    Some(Symbol {
        id: SymbolId::new(&ast.path, &name, node.location.start_line),
        name,
        kind,
        language: ast.language,
        location: node.location,
        signature: signature_of(ast, node),
        documentation,
        visibility,
        qualified_name,
    })
}

fn visibility_of(ast: &SourceAst, node: &AstNode, exported: bool, kind: SymbolKind) -> Visibility {
    if kind == SymbolKind::Method {
        if let Some(modifier) = node
            .children
            .iter()
            .find(|c| c.kind == "accessibility_modifier")
        {
            return match ast.node_text(modifier) {
                "private" => Visibility::Private,
                "protected" => Visibility::Protected,
                "public" => Visibility::Public,
                _ => Visibility::Unspecified,
            };
        }
    }
    if exported {
        Visibility::Public
    } else {
        Visibility::Unspecified
    }
}

/// Declaration text up to the body, collapsed onto one line.
fn signature_of(ast: &SourceAst, node: &AstNode) -> String {
    let end = node
        .children
        .iter()
        .find(|c| BODY_KINDS.contains(&c.kind.as_str()))
        .map(|body| body.start_byte)
        .unwrap_or(node.end_byte);
    let end = end.min(ast.content.len());
    let start = node.start_byte.min(end);
    let raw = &ast.content[start..end];
    let mut signature = String::with_capacity(raw.len().min(256));
    let mut last_was_space = false;
    for ch in raw.chars() {
        if ch.is_whitespace() {
            if !last_was_space && !signature.is_empty() {
                signature.push(' ');
            }
            last_was_space = true;
        } else {
            signature.push(ch);
            last_was_space = false;
        }
    }
    signature.trim_end().to_string()
}

fn clean_comment(text: &str) -> String {
    text.lines()
        .map(|line| {
            line.trim()
                .trim_start_matches("/**")
                .trim_start_matches("/*")
                .trim_start_matches("//")
                .trim_start_matches('*')
                .trim_end_matches("*/")
                .trim()
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Extract the ordered import sequence for a file.
pub fn extract_imports(ast: &SourceAst) -> Vec<Import> {
    match ast.language {
        Language::TypeScript | Language::JavaScript => {}
        Language::Json | Language::Yaml => return Vec::new(),
    }
    let mut out = Vec::new();
    for child in &ast.root.children {
        match child.kind.as_str() {
            "import_statement" => {
                if let Some(import) = build_import(ast, child) {
                    out.push(import);
                }
            }
            // `export ... from "mod"` re-exports count as imports of `mod`.
            "export_statement" => {
                if child.children.iter().any(|c| c.kind == "string") {
                    if let Some(import) = build_import(ast, child) {
                        out.push(import);
                    }
                }
            }
            _ => {}
        }
    }
    out
}

fn build_import(ast: &SourceAst, node: &AstNode) -> Option<Import> {
    let source = node.children.iter().find(|c| c.kind == "string")?;
    let path = ast
        .node_text(source)
        .trim_matches(|c| c == '"' || c == '\'')
        .to_string();

    let mut specifiers = Vec::new();
    let mut is_default = false;
    if let Some(clause) = node.children.iter().find(|c| c.kind == "import_clause") {
        for part in &clause.children {
            match part.kind.as_str() {
                "identifier" => {
                    is_default = true;
                    specifiers.push(ast.node_text(part).to_string());
                }
                "named_imports" => {
                    for spec in part.children.iter().filter(|c| c.kind == "import_specifier") {
                        if let Some(name) =
                            spec.children.iter().find(|c| c.kind == "identifier")
                        {
                            specifiers.push(ast.node_text(name).to_string());
                        }
                    }
                }
                "namespace_import" => {
                    if let Some(name) = part.children.iter().find(|c| c.kind == "identifier") {
                        specifiers.push(ast.node_text(name).to_string());
                    }
                }
                _ => {}
            }
        }
    } else if let Some(clause) = node.children.iter().find(|c| c.kind == "export_clause") {
        for spec in clause.children.iter().filter(|c| c.kind == "export_specifier") {
            if let Some(name) = spec.children.iter().find(|c| c.kind == "identifier") {
                specifiers.push(ast.node_text(name).to_string());
            }
        }
    }

    Some(Import {
        is_relative: path.starts_with('.'),
        path,
        specifiers,
        is_default,
        line: node.location.start_line,
    })
}

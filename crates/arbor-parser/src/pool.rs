//! Thread-safe parser pool for tree-sitter parsers
//!
//! Tree-sitter parsers are not Sync, so parsing runs on dedicated worker
//! threads behind a channel. Workers hand back owned `SourceAst` trees, so
//! nothing tied to a tree-sitter lifetime escapes the pool.

use std::path::Path;
use std::path::PathBuf;

use arbor_core::{Language, SourceLocation};
use tree_sitter::Parser;

use crate::ast::{content_version, AstBuilder, AstNode, SourceAst};
use crate::error::ParserError;

/// A parsing request sent to the pool.
#[derive(Debug)]
pub struct ParseRequest {
    pub path: PathBuf,
    pub language: Language,
    pub content: String,
}

struct WorkerRequest {
    request: ParseRequest,
    response_sender: std::sync::mpsc::Sender<Result<SourceAst, ParserError>>,
}

/// Channel-fronted pool of parser worker threads.
pub struct ParserPool {
    sender: std::sync::mpsc::Sender<WorkerRequest>,
}

impl ParserPool {
    pub fn new(num_workers: usize) -> Self {
        let (sender, receiver) = std::sync::mpsc::channel::<WorkerRequest>();
        let receiver = std::sync::Arc::new(std::sync::Mutex::new(receiver));

        for i in 0..num_workers {
            let receiver = receiver.clone();
            std::thread::spawn(move || {
                Self::worker_thread(i, receiver);
            });
        }

        Self { sender }
    }

    fn worker_thread(
        worker_id: usize,
        receiver: std::sync::Arc<std::sync::Mutex<std::sync::mpsc::Receiver<WorkerRequest>>>,
    ) {
        tracing::debug!("parser worker {} started", worker_id);

        let mut parser = Parser::new();

        loop {
            let next = {
                let guard = match receiver.lock() {
                    Ok(guard) => guard,
                    Err(_) => break,
                };
                guard.recv()
            };
            let WorkerRequest {
                request,
                response_sender,
            } = match next {
                Ok(req) => req,
                Err(_) => {
                    tracing::debug!("parser worker {} shutting down", worker_id);
                    break;
                }
            };

            let result = Self::parse_in_worker(&mut parser, request);
            if response_sender.send(result).is_err() {
                tracing::warn!("parse result receiver dropped");
            }
        }
    }

    fn parse_in_worker(
        parser: &mut Parser,
        request: ParseRequest,
    ) -> Result<SourceAst, ParserError> {
        let grammar = grammar_for(&request.path, request.language);
        parser
            .set_language(&grammar)
            .map_err(|e| ParserError::Parse {
                path: request.path.clone(),
                message: format!("failed to set grammar: {}", e),
            })?;

        let tree = parser
            .parse(&request.content, None)
            .ok_or_else(|| ParserError::Parse {
                path: request.path.clone(),
                message: "parser returned no tree".to_string(),
            })?;

        let has_errors = tree.root_node().has_error();
        let root = convert_node(tree.root_node(), &request.content, "0", 0);
        Ok(SourceAst {
            path: request.path.to_string_lossy().to_string(),
            language: request.language,
            version: content_version(&request.content),
            has_errors,
            root,
            content: request.content,
        })
    }

    /// Parse on a worker thread, awaiting the result without blocking the
    /// async runtime.
    pub async fn parse(&self, request: ParseRequest) -> Result<SourceAst, ParserError> {
        let sender = self.sender.clone();
        let path = request.path.clone();
        tokio::task::spawn_blocking(move || {
            let (response_sender, response_receiver) = std::sync::mpsc::channel();
            sender
                .send(WorkerRequest {
                    request,
                    response_sender,
                })
                .map_err(|_| ParserError::PoolClosed("pool is shut down".to_string()))?;
            response_receiver
                .recv()
                .map_err(|_| ParserError::PoolClosed("parser worker died".to_string()))?
        })
        .await
        .map_err(|e| ParserError::Parse {
            path,
            message: format!("join error: {}", e),
        })?
    }

    /// Blocking variant for synchronous callers and tests.
    pub fn parse_blocking(&self, request: ParseRequest) -> Result<SourceAst, ParserError> {
        let (response_sender, response_receiver) = std::sync::mpsc::channel();
        self.sender
            .send(WorkerRequest {
                request,
                response_sender,
            })
            .map_err(|_| ParserError::PoolClosed("pool is shut down".to_string()))?;
        response_receiver
            .recv()
            .map_err(|_| ParserError::PoolClosed("parser worker died".to_string()))?
    }
}

impl Clone for ParserPool {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

/// Pool sized to the machine, minimum two workers.
pub fn create_parser_pool() -> ParserPool {
    let num_workers = std::thread::available_parallelism()
        .map(|n| n.get().max(2))
        .unwrap_or(2);
    ParserPool::new(num_workers)
}

fn grammar_for(path: &Path, language: Language) -> tree_sitter::Language {
    match language {
        Language::TypeScript => {
            if path.extension().and_then(|e| e.to_str()) == Some("tsx") {
                tree_sitter_typescript::LANGUAGE_TSX.into()
            } else {
                tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()
            }
        }
        // Json and Yaml never reach the pool; the façade builds flat trees
        // for them. Fall back to the javascript grammar if one slips in.
        Language::JavaScript | Language::Json | Language::Yaml => {
            tree_sitter_javascript::LANGUAGE.into()
        }
    }
}

fn convert_node(node: tree_sitter::Node, content: &str, id: &str, depth: u32) -> AstNode {
    let mut children = Vec::with_capacity(node.named_child_count());
    let mut cursor = node.walk();
    for (index, child) in node.named_children(&mut cursor).enumerate() {
        let child_id = format!("{}.{}:{}", id, index, child.kind());
        children.push(convert_node(child, content, &child_id, depth + 1));
    }

    let location = SourceLocation {
        start_line: node.start_position().row as u32,
        start_column: node.start_position().column as u32,
        end_line: node.end_position().row as u32,
        end_column: node.end_position().column as u32,
    };

    let leaf_text = if children.is_empty() {
        node.utf8_text(content.as_bytes()).ok()
    } else {
        None
    };

    AstBuilder::node(
        format!("{}:{}", id, node.kind()),
        node.kind(),
        node.start_byte(),
        node.end_byte(),
        location,
        depth,
        leaf_text,
        children,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parse_typescript() {
        let pool = create_parser_pool();
        let ast = pool
            .parse(ParseRequest {
                path: PathBuf::from("test.ts"),
                language: Language::TypeScript,
                content: "export function f(): number { return 1; }".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(ast.root.kind, "program");
        assert!(!ast.has_errors);
        assert!(ast.node_count() > 3);
    }

    #[tokio::test]
    async fn parse_javascript() {
        let pool = create_parser_pool();
        let ast = pool
            .parse(ParseRequest {
                path: PathBuf::from("test.js"),
                language: Language::JavaScript,
                content: "function f() { return 1; }".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(ast.root.kind, "program");
    }

    #[test]
    fn identical_content_yields_identical_trees() {
        let pool = create_parser_pool();
        let content = "export const x = 1;\nexport function f(): void {}\n";
        let first = pool
            .parse_blocking(ParseRequest {
                path: PathBuf::from("a.ts"),
                language: Language::TypeScript,
                content: content.to_string(),
            })
            .unwrap();
        let second = pool
            .parse_blocking(ParseRequest {
                path: PathBuf::from("a.ts"),
                language: Language::TypeScript,
                content: content.to_string(),
            })
            .unwrap();
        assert_eq!(first.root, second.root);
        assert_eq!(first.version, second.version);
    }
}

//! Arbor Parser — classification, tree-sitter parsing, symbol extraction

pub mod ast;
pub mod classify;
pub mod error;
pub mod extract;
pub mod facade;
pub mod pool;

pub use ast::{content_version, AstBuilder, AstNode, SourceAst};
pub use classify::{classify, has_generated_marker, is_skipped_path, FileClassification, SKIP_FRAGMENTS};
pub use error::ParserError;
pub use facade::{SourceParser, TreeSitterParser};
pub use pool::{create_parser_pool, ParseRequest, ParserPool};

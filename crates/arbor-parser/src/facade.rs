//! The parser façade the engine programs against

use std::path::{Path, PathBuf};

use arbor_core::{Import, Language, SourceLocation, Symbol};
use async_trait::async_trait;

use crate::ast::{content_version, AstBuilder, SourceAst};
use crate::classify::{classify, FileClassification};
use crate::error::ParserError;
use crate::extract;
use crate::pool::{create_parser_pool, ParseRequest, ParserPool};

/// Everything the incremental pipeline needs from a parser. Implementations
/// must be stable: identical content yields byte-identical symbol and import
/// sequences.
#[async_trait]
pub trait SourceParser: Send + Sync {
    fn classify(&self, path: &Path) -> Result<FileClassification, ParserError>;

    /// Read and parse a repository-relative path.
    async fn parse(&self, path: &Path, language: Language) -> Result<SourceAst, ParserError>;

    /// Parse content already in memory (the change detector has usually read
    /// the file once already).
    async fn parse_content(
        &self,
        path: &Path,
        language: Language,
        content: String,
    ) -> Result<SourceAst, ParserError>;

    fn extract_symbols(&self, ast: &SourceAst) -> Vec<Symbol>;

    fn extract_imports(&self, ast: &SourceAst) -> Vec<Import>;
}

/// Tree-sitter backed implementation over a worker pool.
pub struct TreeSitterParser {
    root: PathBuf,
    pool: ParserPool,
}

impl TreeSitterParser {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            pool: create_parser_pool(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Data files get a flat single-node tree: enough for version tracking
    /// and diffing without a grammar.
    fn flat_ast(path: &Path, language: Language, content: String) -> SourceAst {
        let line_count = content.lines().count() as u32;
        let root = AstBuilder::node(
            "0:document".to_string(),
            "document",
            0,
            content.len(),
            SourceLocation {
                start_line: 0,
                start_column: 0,
                end_line: line_count.saturating_sub(1),
                end_column: 0,
            },
            0,
            Some(content.as_str()),
            Vec::new(),
        );
        SourceAst {
            path: path.to_string_lossy().to_string(),
            language,
            version: content_version(&content),
            has_errors: false,
            root,
            content,
        }
    }
}

#[async_trait]
impl SourceParser for TreeSitterParser {
    fn classify(&self, path: &Path) -> Result<FileClassification, ParserError> {
        classify(path)
    }

    async fn parse(&self, path: &Path, language: Language) -> Result<SourceAst, ParserError> {
        let absolute = self.root.join(path);
        let content =
            tokio::fs::read_to_string(&absolute)
                .await
                .map_err(|source| ParserError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
        self.parse_content(path, language, content).await
    }

    async fn parse_content(
        &self,
        path: &Path,
        language: Language,
        content: String,
    ) -> Result<SourceAst, ParserError> {
        match language {
            Language::TypeScript | Language::JavaScript => {
                self.pool
                    .parse(ParseRequest {
                        path: path.to_path_buf(),
                        language,
                        content,
                    })
                    .await
            }
            Language::Json | Language::Yaml => Ok(Self::flat_ast(path, language, content)),
        }
    }

    fn extract_symbols(&self, ast: &SourceAst) -> Vec<Symbol> {
        extract::extract_symbols(ast)
    }

    fn extract_imports(&self, ast: &SourceAst) -> Vec<Import> {
        extract::extract_imports(ast)
    }
}

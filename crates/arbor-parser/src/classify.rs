//! File classification: language, test/generated flags, skip rules

use std::path::Path;

use arbor_core::Language;

use crate::error::ParserError;

/// Path fragments that exclude a file from analysis. Case-sensitive
/// substring match on the repository-relative path.
pub const SKIP_FRAGMENTS: &[&str] = &[
    "node_modules",
    ".git",
    ".codecontext",
    "dist",
    "build",
    "coverage",
    ".nyc_output",
    "tmp",
    "temp",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileClassification {
    pub language: Language,
    pub is_test: bool,
    pub is_generated: bool,
}

/// Whether a path falls inside a skipped directory fragment.
pub fn is_skipped_path(path: &Path) -> bool {
    let text = path.to_string_lossy();
    SKIP_FRAGMENTS.iter().any(|fragment| text.contains(fragment))
}

/// Classify a file by path. Fails with `UnsupportedLanguage` when the
/// extension is outside the whitelist.
pub fn classify(path: &Path) -> Result<FileClassification, ParserError> {
    let language = Language::from_path(path).ok_or_else(|| ParserError::UnsupportedLanguage {
        path: path.to_path_buf(),
    })?;
    let text = path.to_string_lossy();
    let is_test =
        text.contains(".test.") || text.contains(".spec.") || text.contains("__tests__");
    let is_generated = text.contains(".generated.") || text.ends_with(".d.ts");
    Ok(FileClassification {
        language,
        is_test,
        is_generated,
    })
}

/// Content marker check for generated files; applied on top of the path
/// heuristics once content is available.
pub fn has_generated_marker(content: &str) -> bool {
    content
        .lines()
        .take(3)
        .any(|line| line.trim_start().starts_with("// @generated"))
}

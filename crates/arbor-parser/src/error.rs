//! Parser failure kinds

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ParserError {
    /// Classification failed; callers skip the file silently.
    #[error("unsupported language: {path}")]
    UnsupportedLanguage { path: PathBuf },

    /// The parser failed on readable input.
    #[error("parse error in {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parser pool unavailable: {0}")]
    PoolClosed(String),
}

//! Engine error taxonomy

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Parser could not classify the file; callers skip it.
    #[error("unsupported language: {path}")]
    UnsupportedLanguage { path: String },

    /// Parser failed on readable input; the file's prior graph slice is kept.
    #[error("parse error in {path}: {message}")]
    Parse { path: String, message: String },

    /// The AST diff could not be computed; callers fall back to replacing
    /// the file's graph slice wholesale.
    #[error("diff error for {path}: {message}")]
    Diff { path: String, message: String },

    #[error("unknown change type: {0}")]
    UnknownChangeType(String),

    #[error("invalid change: {0}")]
    InvalidChange(String),

    /// Plan rejected before apply; nothing was mutated.
    #[error("plan validation failed: {0}")]
    Validation(String),

    /// A patch raised during apply; the rollback point was restored.
    #[error("apply failed on patch {patch_id}: {message}")]
    Apply { patch_id: String, message: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Shadow memory stayed above the limit after cache eviction.
    #[error("shadow memory exhausted: {used} bytes over limit {limit}")]
    ResourceExhausted { used: u64, limit: u64 },
}

impl EngineError {
    /// Whether this failure already restored the pre-apply state.
    pub fn is_rolled_back(&self) -> bool {
        matches!(
            self,
            EngineError::Apply { .. } | EngineError::Cancelled | EngineError::DeadlineExceeded
        )
    }
}

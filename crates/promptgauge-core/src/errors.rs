/// Error kinds surfaced at the operation boundary.
///
/// Provider failures are deliberately absent: a failed model call is
/// recorded on its dispatch unit's output row and never propagates as
/// an error return.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Bad input shape or reference; nothing was persisted.
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown run, test case, evaluator or version; no side effects.
    #[error("not found: {0}")]
    NotFound(String),

    /// A comparison or accuracy query had no qualifying data.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        CoreError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        CoreError::NotFound(msg.into())
    }
}

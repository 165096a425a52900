use strata_types::Cancelled;

/// Errors from key/value store operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// The operation observed a fired cancellation token.
    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    /// I/O error from a file-backed store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend-specific failure.
    #[error("db backend: {0}")]
    Backend(String),
}

/// Result alias for store operations.
pub type DbResult<T> = Result<T, DbError>;

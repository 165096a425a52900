use strata_db::DbError;
use strata_types::Cancelled;

/// Errors from heap operations.
#[derive(Debug, thiserror::Error)]
pub enum HeapError {
    /// The entry id is absent where the operation requires it.
    #[error("not found: {0}")]
    NotFound(String),

    /// `decrease_key` was called with a priority at or above the current one.
    #[error("priority {new} larger than or equal to old: {current}")]
    PriorityNotDecreased { new: f64, current: f64 },

    /// A persisted invariant was violated.
    #[error("corrupt heap: {0}")]
    Corruption(String),

    /// Record serialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Underlying database failure.
    #[error(transparent)]
    Db(#[from] DbError),

    /// The operation observed a fired cancellation token.
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// Result alias for heap operations.
pub type HeapResult<T> = Result<T, HeapError>;

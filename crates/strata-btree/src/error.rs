use strata_store::StoreError;
use strata_types::Cancelled;

/// Errors from B-tree operations.
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    /// A persisted invariant was violated.
    #[error("corrupt tree: {0}")]
    Corruption(String),

    /// Underlying object store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The operation observed a fired cancellation token.
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// Result alias for B-tree operations.
pub type TreeResult<T> = Result<T, TreeError>;

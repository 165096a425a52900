use strata_codec::CodecError;
use strata_db::DbError;
use strata_types::Cancelled;

/// Errors from object store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The object is absent locally and the remote store is exhausted.
    #[error("object not found")]
    NotFound,

    /// Encoded data does not hash to the expected digest.
    #[error("digest mismatch: expected {expected}, computed {computed}")]
    DigestMismatch { expected: String, computed: String },

    /// A persisted invariant was violated.
    #[error("corrupt record: {0}")]
    Corruption(String),

    /// Remote store failure.
    #[error("remote store: {0}")]
    Remote(String),

    /// Underlying database failure.
    #[error(transparent)]
    Db(#[from] DbError),

    /// Serialization or seal failure.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The operation observed a fired cancellation token.
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// Result alias for object store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from object serialization and sealing.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The record's type id does not match the expected type.
    #[error("type id mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// Sealing or unsealing failure (bad key, truncated frame, tampering).
    #[error("crypto error: {0}")]
    Crypto(String),
}

/// Result alias for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

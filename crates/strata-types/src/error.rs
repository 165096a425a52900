/// Errors from parsing or converting core types.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TypeError {
    /// The input was not valid hex.
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    /// The decoded byte length did not match the expected width.
    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

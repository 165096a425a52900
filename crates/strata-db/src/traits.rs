use strata_types::CancelToken;

use crate::error::DbResult;

/// A byte-keyed key/value database.
///
/// All implementations must satisfy these invariants:
/// - `get` of an absent key yields `Ok(None)`, never an error.
/// - `set` overwrites unconditionally and is atomic per key.
/// - `list` returns every stored key starting with the prefix, in an order
///   that is deterministic within a session.
/// - `delete` of a missing key is silent.
/// - Every call checks the cancellation token before touching storage.
pub trait Db: Send + Sync {
    /// Retrieve a value from the database.
    fn get(&self, cancel: &CancelToken, key: &[u8]) -> DbResult<Option<Vec<u8>>>;

    /// Set a value in the database, overwriting any previous value.
    fn set(&self, cancel: &CancelToken, key: &[u8], value: &[u8]) -> DbResult<()>;

    /// List the stored keys with the specified prefix.
    fn list(&self, cancel: &CancelToken, prefix: &[u8]) -> DbResult<Vec<Vec<u8>>>;

    /// Clear a set of keys from the database. Missing keys are skipped.
    fn delete(&self, cancel: &CancelToken, keys: &[&[u8]]) -> DbResult<()>;
}

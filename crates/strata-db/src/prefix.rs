use std::sync::Arc;

use strata_types::CancelToken;

use crate::error::DbResult;
use crate::traits::Db;

/// Wraps a [`Db`] and transparently prepends a fixed prefix to every key.
///
/// `list` strips the prefix from returned keys, so callers see the same
/// namespace they wrote into. Wrapping repeatedly composes: the prefix of
/// the first wrapper applied lands first in the final key.
///
/// ```
/// # use std::sync::Arc;
/// # use strata_db::{Db, MemoryDb, Prefixer};
/// # use strata_types::CancelToken;
/// let db: Arc<dyn Db> = Arc::new(MemoryDb::new());
/// let db: Arc<dyn Db> = Arc::new(Prefixer::new(db, b"/prefix1".to_vec()));
/// let db = Prefixer::new(db, b"/prefix2".to_vec());
/// // db.set(.., b"/key", ..) writes "/prefix1/prefix2/key"
/// # db.set(&CancelToken::never(), b"/key", b"v").unwrap();
/// ```
pub struct Prefixer {
    db: Arc<dyn Db>,
    prefix: Vec<u8>,
}

impl Prefixer {
    /// Wrap a database with a key prefix.
    pub fn new(db: Arc<dyn Db>, prefix: impl Into<Vec<u8>>) -> Self {
        Self {
            db,
            prefix: prefix.into(),
        }
    }

    fn apply(&self, key: &[u8]) -> Vec<u8> {
        let mut full = Vec::with_capacity(self.prefix.len() + key.len());
        full.extend_from_slice(&self.prefix);
        full.extend_from_slice(key);
        full
    }
}

impl Db for Prefixer {
    fn get(&self, cancel: &CancelToken, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        self.db.get(cancel, &self.apply(key))
    }

    fn set(&self, cancel: &CancelToken, key: &[u8], value: &[u8]) -> DbResult<()> {
        self.db.set(cancel, &self.apply(key), value)
    }

    fn list(&self, cancel: &CancelToken, prefix: &[u8]) -> DbResult<Vec<Vec<u8>>> {
        let full = self.db.list(cancel, &self.apply(prefix))?;
        Ok(full
            .into_iter()
            .filter_map(|k| k.strip_prefix(self.prefix.as_slice()).map(<[u8]>::to_vec))
            .collect())
    }

    fn delete(&self, cancel: &CancelToken, keys: &[&[u8]]) -> DbResult<()> {
        let full: Vec<Vec<u8>> = keys.iter().map(|k| self.apply(k)).collect();
        let refs: Vec<&[u8]> = full.iter().map(Vec::as_slice).collect();
        self.db.delete(cancel, &refs)
    }
}

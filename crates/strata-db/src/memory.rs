use std::collections::HashMap;
use std::sync::RwLock;

use strata_types::CancelToken;

use crate::error::DbResult;
use crate::traits::Db;

/// In-memory, `HashMap`-based key/value store.
///
/// Intended for tests and embedding. All entries are held in memory behind
/// a `RwLock` for safe concurrent access. `list` returns keys sorted, which
/// makes the order deterministic across calls.
pub struct MemoryDb {
    entries: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryDb {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        self.entries.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().expect("lock poisoned").is_empty()
    }
}

impl Default for MemoryDb {
    fn default() -> Self {
        Self::new()
    }
}

impl Db for MemoryDb {
    fn get(&self, cancel: &CancelToken, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        cancel.check()?;
        let map = self.entries.read().expect("lock poisoned");
        Ok(map.get(key).cloned())
    }

    fn set(&self, cancel: &CancelToken, key: &[u8], value: &[u8]) -> DbResult<()> {
        cancel.check()?;
        let mut map = self.entries.write().expect("lock poisoned");
        map.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn list(&self, cancel: &CancelToken, prefix: &[u8]) -> DbResult<Vec<Vec<u8>>> {
        cancel.check()?;
        let map = self.entries.read().expect("lock poisoned");
        let mut keys: Vec<Vec<u8>> = map
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn delete(&self, cancel: &CancelToken, keys: &[&[u8]]) -> DbResult<()> {
        cancel.check()?;
        let mut map = self.entries.write().expect("lock poisoned");
        for key in keys {
            map.remove(*key);
        }
        Ok(())
    }
}

impl std::fmt::Debug for MemoryDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDb")
            .field("entry_count", &self.len())
            .finish()
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use strata_db::{Db, Prefixer};
use strata_types::CancelToken;

use crate::entry::{HeapEntry, HeapRoot};
use crate::error::{HeapError, HeapResult};

/// Key of the root record on the unprefixed database.
const ROOT_KEY: &[u8] = b"/fibroot";

/// Prefix under which entry records live: full key `/keys/<id>`.
const KEY_PREFIX: &[u8] = b"/keys";

/// One slot of the per-operation write-back cache.
#[derive(Clone, Debug)]
pub(crate) enum CacheSlot {
    /// Entry to be written at flush.
    Entry(HeapEntry),
    /// Entry to be deleted at flush.
    Tombstone,
}

/// The heap's mutable state: database handles, the in-memory root record,
/// and the per-operation entry cache.
///
/// During an operation all entry reads and writes go through the cache;
/// the database is only read on cache misses and only written at flush.
/// Deletions are buffered as tombstones so a failed operation leaves the
/// database untouched.
pub(crate) struct HeapInner {
    db: Arc<dyn Db>,
    key_db: Prefixer,
    pub root: HeapRoot,
    pub cache: HashMap<String, CacheSlot>,
}

fn id_key(id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + id.len());
    key.push(b'/');
    key.extend_from_slice(id.as_bytes());
    key
}

impl HeapInner {
    pub fn new(db: Arc<dyn Db>) -> Self {
        Self {
            key_db: Prefixer::new(db.clone(), KEY_PREFIX),
            db,
            root: HeapRoot::default(),
            cache: HashMap::new(),
        }
    }

    /// Reload the root record, writing the empty record if none exists.
    pub fn read_state(&mut self, cancel: &CancelToken) -> HeapResult<()> {
        match self.db.get(cancel, ROOT_KEY)? {
            None => self.write_state(cancel),
            Some(bytes) => {
                self.root = bincode::deserialize(&bytes)
                    .map_err(|e| HeapError::Serialization(e.to_string()))?;
                Ok(())
            }
        }
    }

    /// Persist the in-memory root record.
    pub fn write_state(&self, cancel: &CancelToken) -> HeapResult<()> {
        let bytes = bincode::serialize(&self.root)
            .map_err(|e| HeapError::Serialization(e.to_string()))?;
        self.db.set(cancel, ROOT_KEY, &bytes)?;
        Ok(())
    }

    /// Ensure the entry is in the cache. Returns whether it exists.
    ///
    /// An empty id and a tombstoned id both read as absent.
    pub fn load_entry(&mut self, cancel: &CancelToken, id: &str) -> HeapResult<bool> {
        if id.is_empty() {
            return Ok(false);
        }
        match self.cache.get(id) {
            Some(CacheSlot::Entry(_)) => return Ok(true),
            Some(CacheSlot::Tombstone) => return Ok(false),
            None => {}
        }
        match self.key_db.get(cancel, &id_key(id))? {
            None => Ok(false),
            Some(bytes) => {
                let entry: HeapEntry = bincode::deserialize(&bytes)
                    .map_err(|e| HeapError::Serialization(e.to_string()))?;
                self.cache.insert(id.to_string(), CacheSlot::Entry(entry));
                Ok(true)
            }
        }
    }

    /// A cached entry. The entry must have been loaded first.
    pub fn entry(&self, id: &str) -> HeapResult<&HeapEntry> {
        match self.cache.get(id) {
            Some(CacheSlot::Entry(entry)) => Ok(entry),
            _ => Err(HeapError::Corruption(format!("entry not in cache: {id}"))),
        }
    }

    /// A cached entry, mutably. The entry must have been loaded first.
    pub fn entry_mut(&mut self, id: &str) -> HeapResult<&mut HeapEntry> {
        match self.cache.get_mut(id) {
            Some(CacheSlot::Entry(entry)) => Ok(entry),
            _ => Err(HeapError::Corruption(format!("entry not in cache: {id}"))),
        }
    }

    /// Insert or overwrite an entry in the cache.
    pub fn insert_entry(&mut self, id: &str, entry: HeapEntry) {
        self.cache.insert(id.to_string(), CacheSlot::Entry(entry));
    }

    /// Mark an entry for deletion at flush.
    pub fn remove_entry(&mut self, id: &str) {
        self.cache.insert(id.to_string(), CacheSlot::Tombstone);
    }

    /// All entry ids present in the database (cache not consulted).
    pub fn list_ids(&self, cancel: &CancelToken) -> HeapResult<Vec<String>> {
        let keys = self.key_db.list(cancel, b"/")?;
        keys.into_iter()
            .map(|key| {
                String::from_utf8(key[1..].to_vec())
                    .map_err(|e| HeapError::Corruption(format!("non-utf8 entry key: {e}")))
            })
            .collect()
    }

    /// Write every cached entry and tombstone, then the root record.
    ///
    /// The root record is the linearization point: it is only written
    /// after every entry write succeeded.
    pub fn flush_cache(&mut self, cancel: &CancelToken) -> HeapResult<()> {
        let slots: Vec<(String, CacheSlot)> = self.cache.drain().collect();
        for (id, slot) in slots {
            let key = id_key(&id);
            match slot {
                CacheSlot::Entry(entry) => {
                    let bytes = bincode::serialize(&entry)
                        .map_err(|e| HeapError::Serialization(e.to_string()))?;
                    self.key_db.set(cancel, &key, &bytes)?;
                }
                CacheSlot::Tombstone => {
                    self.key_db.delete(cancel, &[key.as_slice()])?;
                }
            }
        }
        self.write_state(cancel)
    }
}

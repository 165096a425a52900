use std::collections::HashMap;
use std::sync::RwLock;

use strata_types::{CancelToken, Digest};

use crate::error::StoreResult;

/// Maximum size of a blob stored as a single block.
///
/// Larger blobs are stored as merkledag objects. Implementations must not
/// switch strategies at any other size.
pub const MAX_BLOCK_SIZE: usize = 256 * 1024;

/// Remote blob storage.
///
/// References are opaque to the core; the only contract is that the
/// reference returned by `store_remote`, together with its block flag, is
/// sufficient for a later `fetch_remote` to return the same bytes.
pub trait RemoteStore: Send + Sync {
    /// Return a blob given its storage reference.
    ///
    /// `is_block` selects a single-block fetch over a merkledag fetch.
    /// Returns `Ok(None)` when the reference resolves to nothing.
    fn fetch_remote(
        &self,
        cancel: &CancelToken,
        reference: &str,
        is_block: bool,
    ) -> StoreResult<Option<Vec<u8>>>;

    /// Store a blob and return its storage reference.
    ///
    /// The boolean reports whether the blob was stored as a single block
    /// (`blob.len() <= MAX_BLOCK_SIZE`) or as a merkledag object.
    fn store_remote(&self, cancel: &CancelToken, blob: &[u8]) -> StoreResult<(String, bool)>;
}

/// In-memory remote store for tests and embedding.
///
/// Content-addressed like a real blob store: the reference is the hex
/// digest of the blob. Honors the block threshold in its reporting even
/// though both kinds land in the same map.
pub struct MemoryRemoteStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryRemoteStore {
    /// Create a new empty remote store.
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
        }
    }

    /// Number of blobs currently stored.
    pub fn len(&self) -> usize {
        self.blobs.read().expect("lock poisoned").len()
    }

    /// Returns `true` if no blobs are stored.
    pub fn is_empty(&self) -> bool {
        self.blobs.read().expect("lock poisoned").is_empty()
    }
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteStore for MemoryRemoteStore {
    fn fetch_remote(
        &self,
        cancel: &CancelToken,
        reference: &str,
        _is_block: bool,
    ) -> StoreResult<Option<Vec<u8>>> {
        cancel.check()?;
        let blobs = self.blobs.read().expect("lock poisoned");
        Ok(blobs.get(reference).cloned())
    }

    fn store_remote(&self, cancel: &CancelToken, blob: &[u8]) -> StoreResult<(String, bool)> {
        cancel.check()?;
        let reference = Digest::compute(blob).to_hex();
        let is_block = blob.len() <= MAX_BLOCK_SIZE;
        let mut blobs = self.blobs.write().expect("lock poisoned");
        blobs.insert(reference.clone(), blob.to_vec());
        Ok((reference, is_block))
    }
}

impl std::fmt::Debug for MemoryRemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRemoteStore")
            .field("blob_count", &self.len())
            .finish()
    }
}

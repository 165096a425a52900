use std::sync::Arc;

use strata_codec::{decode_payload, encode_payload, TypedObject};
use strata_db::Db;
use strata_types::{CancelToken, Digest};

use crate::error::{StoreError, StoreResult};

/// Local unencrypted blob cache keyed by content digest.
///
/// Wraps a [`Db`], storing each object's serialized payload at
/// `/<hex(digest)>`. The digest is always of the innermost unencrypted
/// payload bytes. Writes verify the digest when the caller supplies one.
pub struct LocalDb {
    db: Arc<dyn Db>,
}

impl LocalDb {
    /// Build a local store over the given database.
    pub fn new(db: Arc<dyn Db>) -> Self {
        Self { db }
    }

    /// The database key for a digest: `/<lowercase hex>`.
    pub fn digest_key(digest: &Digest) -> Vec<u8> {
        let mut key = Vec::with_capacity(1 + 64);
        key.push(b'/');
        key.extend_from_slice(digest.to_hex().as_bytes());
        key
    }

    /// Digest raw payload bytes with the store's hashing scheme.
    pub fn digest_data(&self, data: &[u8]) -> Digest {
        Digest::compute(data)
    }

    /// Return an object by digest, assuming it is already in the cache.
    ///
    /// Returns [`StoreError::NotFound`] if the digest is absent.
    pub fn get_local<T: TypedObject>(
        &self,
        cancel: &CancelToken,
        digest: &Digest,
    ) -> StoreResult<T> {
        let data = self.db.get(cancel, &Self::digest_key(digest))?;
        match data {
            None => Err(StoreError::NotFound),
            Some(bytes) => Ok(decode_payload(&bytes)?),
        }
    }

    /// Encode an object and store it under its payload digest.
    ///
    /// `hash_ptr` carries the expected digest of the encoded payload: when
    /// it holds a non-null digest the computed digest must match or the
    /// store fails; when it holds the null digest the computed digest is
    /// written back through it.
    pub fn store_local<T: TypedObject>(
        &self,
        cancel: &CancelToken,
        obj: &T,
        hash_ptr: Option<&mut Digest>,
    ) -> StoreResult<()> {
        let payload = encode_payload(obj)?;
        let computed = self.digest_data(&payload);

        if let Some(ptr) = hash_ptr {
            if !ptr.is_null() {
                if *ptr != computed {
                    return Err(StoreError::DigestMismatch {
                        expected: ptr.to_hex(),
                        computed: computed.to_hex(),
                    });
                }
            } else {
                *ptr = computed;
            }
        }

        self.db.set(cancel, &Self::digest_key(&computed), &payload)?;
        Ok(())
    }
}

impl std::fmt::Debug for LocalDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalDb").finish()
    }
}

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use strata_codec::{unwrap_object, wrap_object, ObjectCodec, ObjectWrapper, TypedObject};
use strata_types::{CancelToken, Digest, StorageRef};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::local::LocalDb;
use crate::remote::RemoteStore;

/// Result of one remote fetch, shared between the leader and any callers
/// that joined it. Errors cross the sharing boundary as their display text.
type FetchOutcome = Result<Option<Arc<Vec<u8>>>, String>;

enum FlightState {
    Pending,
    Done(FetchOutcome),
}

struct Flight {
    state: Mutex<FlightState>,
    cv: Condvar,
}

impl Flight {
    fn new() -> Self {
        Self {
            state: Mutex::new(FlightState::Pending),
            cv: Condvar::new(),
        }
    }

    fn complete(&self, outcome: FetchOutcome) {
        let mut state = self.state.lock().expect("lock poisoned");
        *state = FlightState::Done(outcome);
        self.cv.notify_all();
    }

    /// Block until the leader completes. Polls the cancellation token so a
    /// waiting caller can still unwind during a slow fetch.
    fn wait(&self, cancel: &CancelToken) -> StoreResult<FetchOutcome> {
        let mut state = self.state.lock().expect("lock poisoned");
        loop {
            if let FlightState::Done(outcome) = &*state {
                return Ok(outcome.clone());
            }
            cancel.check()?;
            let (next, _) = self
                .cv
                .wait_timeout(state, Duration::from_millis(100))
                .expect("lock poisoned");
            state = next;
        }
    }
}

/// Two-tier object store: local digest cache over remote blob storage.
///
/// Reads hit the local tier first and fall through to the remote tier,
/// back-filling the local tier on the way out. Writes land in both tiers.
/// Safe for concurrent use; concurrent fetches of the same digest are
/// coalesced into one remote call.
pub struct ObjectStore {
    local: LocalDb,
    remote: Option<Arc<dyn RemoteStore>>,
    in_flight: Mutex<HashMap<Digest, Arc<Flight>>>,
}

impl ObjectStore {
    /// Build an object store. `remote` is optional: without it the store
    /// is purely local and refs never carry remote addresses.
    pub fn new(local: LocalDb, remote: Option<Arc<dyn RemoteStore>>) -> Self {
        Self {
            local,
            remote,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// The local tier.
    pub fn local(&self) -> &LocalDb {
        &self.local
    }

    /// Digest, wrap, and store an object locally and remotely.
    ///
    /// Returns the storage reference together with the object's encoded
    /// unsealed payload.
    pub fn store_object<T: TypedObject>(
        &self,
        cancel: &CancelToken,
        obj: &T,
        codec: &dyn ObjectCodec,
    ) -> StoreResult<(StorageRef, Vec<u8>)> {
        let (wrapper, payload) = wrap_object(obj, codec)?;
        let blob = wrapper.encode()?;

        let mut digest = Digest::null();
        self.local.store_local(cancel, obj, Some(&mut digest))?;

        let Some(remote) = &self.remote else {
            return Ok((StorageRef::local(digest), payload));
        };

        let (reference, is_block) = remote.store_remote(cancel, &blob)?;
        debug!(
            digest = %digest.short_hex(),
            reference = %reference,
            is_block,
            "stored object remotely"
        );
        Ok((StorageRef::remote(digest, reference, is_block), payload))
    }

    /// Return an object by digest from the local cache, or fetch it from
    /// the remote store given its reference.
    ///
    /// A successful remote fetch is decoded, verified against the digest,
    /// and written back into the local cache. Concurrent calls for the
    /// same digest share a single remote fetch.
    pub fn get_or_fetch<T: TypedObject>(
        &self,
        cancel: &CancelToken,
        digest: &Digest,
        reference: &str,
        is_block: bool,
        codec: &dyn ObjectCodec,
    ) -> StoreResult<T> {
        match self.local.get_local(cancel, digest) {
            Ok(obj) => return Ok(obj),
            Err(StoreError::NotFound) => {}
            Err(e) => return Err(e),
        }

        let Some(remote) = self.remote.clone() else {
            return Err(StoreError::NotFound);
        };

        let blob = match self.fetch_coalesced(cancel, &remote, digest, reference, is_block)? {
            Some(blob) if !blob.is_empty() => blob,
            _ => return Err(StoreError::NotFound),
        };

        let wrapper = ObjectWrapper::decode(&blob)?;
        let obj: T = unwrap_object(&wrapper, codec)?;

        // Back-fill the cache; this also verifies the fetched data hashes
        // to the digest the caller asked for.
        let mut expected = *digest;
        self.local.store_local(cancel, &obj, Some(&mut expected))?;
        Ok(obj)
    }

    /// Resolve a storage reference to an object.
    pub fn follow_ref<T: TypedObject>(
        &self,
        cancel: &CancelToken,
        storage_ref: &StorageRef,
        codec: &dyn ObjectCodec,
    ) -> StoreResult<T> {
        match storage_ref {
            StorageRef::Digest { digest } => self.local.get_local(cancel, digest),
            StorageRef::Remote {
                digest,
                reference,
                is_block,
            } => self.get_or_fetch(cancel, digest, reference, *is_block, codec),
        }
    }

    /// Fetch a remote blob, coalescing concurrent fetches of one digest.
    ///
    /// The first caller for a digest becomes the leader and performs the
    /// fetch; later callers block on its completion and share the bytes.
    fn fetch_coalesced(
        &self,
        cancel: &CancelToken,
        remote: &Arc<dyn RemoteStore>,
        digest: &Digest,
        reference: &str,
        is_block: bool,
    ) -> StoreResult<Option<Arc<Vec<u8>>>> {
        let (flight, leader) = {
            let mut map = self.in_flight.lock().expect("lock poisoned");
            match map.get(digest) {
                Some(existing) => (existing.clone(), false),
                None => {
                    let flight = Arc::new(Flight::new());
                    map.insert(*digest, flight.clone());
                    (flight, true)
                }
            }
        };

        if !leader {
            debug!(digest = %digest.short_hex(), "joining in-flight remote fetch");
            return match flight.wait(cancel)? {
                Ok(blob) => Ok(blob),
                Err(msg) => Err(StoreError::Remote(msg)),
            };
        }

        debug!(digest = %digest.short_hex(), reference, is_block, "fetching remote blob");
        let result = remote.fetch_remote(cancel, reference, is_block);

        // Publish the outcome and retire the flight; the leader keeps its
        // own typed error while joiners see the message text.
        let result = match result {
            Ok(blob) => {
                let blob = blob.map(Arc::new);
                flight.complete(Ok(blob.clone()));
                Ok(blob)
            }
            Err(e) => {
                flight.complete(Err(e.to_string()));
                Err(e)
            }
        };
        self.in_flight
            .lock()
            .expect("lock poisoned")
            .remove(digest);
        result
    }
}

impl std::fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStore")
            .field("has_remote", &self.remote.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemoteStore;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use strata_codec::PlainCodec;
    use strata_db::MemoryDb;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Payload {
        name: String,
        numbers: Vec<u64>,
    }

    impl TypedObject for Payload {
        const TYPE_ID: &'static str = "/test/payload/0.0.1";
    }

    fn never() -> CancelToken {
        CancelToken::never()
    }

    fn sample() -> Payload {
        Payload {
            name: "sample".to_string(),
            numbers: vec![1, 2, 3],
        }
    }

    fn store_with_remote() -> (ObjectStore, Arc<MemoryRemoteStore>) {
        let remote = Arc::new(MemoryRemoteStore::new());
        let local = LocalDb::new(Arc::new(MemoryDb::new()));
        (ObjectStore::new(local, Some(remote.clone())), remote)
    }

    #[test]
    fn store_and_get_roundtrip() {
        let (store, _) = store_with_remote();
        let obj = sample();
        let (storage_ref, payload) = store.store_object(&never(), &obj, &PlainCodec).unwrap();
        assert!(!payload.is_empty());

        let (reference, is_block) = storage_ref.remote_reference().expect("remote ref");
        let back: Payload = store
            .get_or_fetch(
                &never(),
                storage_ref.digest(),
                reference,
                is_block,
                &PlainCodec,
            )
            .unwrap();
        assert_eq!(obj, back);
    }

    #[test]
    fn fetch_services_from_remote_after_cache_miss() {
        // Write through one store, read through a second that shares only
        // the remote tier.
        let remote = Arc::new(MemoryRemoteStore::new());
        let writer = ObjectStore::new(
            LocalDb::new(Arc::new(MemoryDb::new())),
            Some(remote.clone()),
        );
        let reader = ObjectStore::new(
            LocalDb::new(Arc::new(MemoryDb::new())),
            Some(remote.clone()),
        );

        let obj = sample();
        let (storage_ref, _) = writer.store_object(&never(), &obj, &PlainCodec).unwrap();

        let back: Payload = reader
            .follow_ref(&never(), &storage_ref, &PlainCodec)
            .unwrap();
        assert_eq!(obj, back);

        // The fetch back-filled the reader's local tier: a second read
        // succeeds even after the remote tier is gone.
        let local_only: Payload = reader
            .local()
            .get_local(&never(), storage_ref.digest())
            .unwrap();
        assert_eq!(obj, local_only);
    }

    #[test]
    fn payload_is_byte_equal_across_store_and_fetch() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let writer = ObjectStore::new(
            LocalDb::new(Arc::new(MemoryDb::new())),
            Some(remote.clone()),
        );
        let reader = ObjectStore::new(LocalDb::new(Arc::new(MemoryDb::new())), Some(remote));

        let obj = sample();
        let (storage_ref, payload) = writer.store_object(&never(), &obj, &PlainCodec).unwrap();
        let back: Payload = reader
            .follow_ref(&never(), &storage_ref, &PlainCodec)
            .unwrap();
        assert_eq!(strata_codec::encode_payload(&back).unwrap(), payload);
    }

    #[test]
    fn without_remote_store_refs_are_local() {
        let store = ObjectStore::new(LocalDb::new(Arc::new(MemoryDb::new())), None);
        let obj = sample();
        let (storage_ref, _) = store.store_object(&never(), &obj, &PlainCodec).unwrap();
        assert!(storage_ref.remote_reference().is_none());

        let back: Payload = store
            .follow_ref(&never(), &storage_ref, &PlainCodec)
            .unwrap();
        assert_eq!(obj, back);
    }

    #[test]
    fn missing_object_without_remote_is_not_found() {
        let store = ObjectStore::new(LocalDb::new(Arc::new(MemoryDb::new())), None);
        let err = store
            .get_or_fetch::<Payload>(
                &never(),
                &Digest::compute(b"absent"),
                "ref",
                true,
                &PlainCodec,
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[test]
    fn unknown_remote_reference_is_not_found() {
        let (store, _) = store_with_remote();
        let err = store
            .get_or_fetch::<Payload>(
                &never(),
                &Digest::compute(b"absent"),
                "no-such-ref",
                true,
                &PlainCodec,
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[test]
    fn fetched_data_is_verified_against_the_digest() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let writer = ObjectStore::new(
            LocalDb::new(Arc::new(MemoryDb::new())),
            Some(remote.clone()),
        );
        let obj = sample();
        let (storage_ref, _) = writer.store_object(&never(), &obj, &PlainCodec).unwrap();
        let (reference, is_block) = storage_ref.remote_reference().expect("remote ref");

        // Ask a fresh store (empty local tier) for the blob under a digest
        // it does not hash to.
        let reader = ObjectStore::new(LocalDb::new(Arc::new(MemoryDb::new())), Some(remote));
        let wrong = Digest::compute(b"not the payload");
        let err = reader
            .get_or_fetch::<Payload>(&never(), &wrong, reference, is_block, &PlainCodec)
            .unwrap_err();
        assert!(matches!(err, StoreError::DigestMismatch { .. }));
    }

    /// Remote store that counts fetches and holds each one long enough for
    /// concurrent callers to pile up.
    struct SlowRemote {
        inner: MemoryRemoteStore,
        fetches: AtomicUsize,
    }

    impl RemoteStore for SlowRemote {
        fn fetch_remote(
            &self,
            cancel: &CancelToken,
            reference: &str,
            is_block: bool,
        ) -> StoreResult<Option<Vec<u8>>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(150));
            self.inner.fetch_remote(cancel, reference, is_block)
        }

        fn store_remote(&self, cancel: &CancelToken, blob: &[u8]) -> StoreResult<(String, bool)> {
            self.inner.store_remote(cancel, blob)
        }
    }

    #[test]
    fn concurrent_fetches_of_one_digest_are_coalesced() {
        let slow = Arc::new(SlowRemote {
            inner: MemoryRemoteStore::new(),
            fetches: AtomicUsize::new(0),
        });

        // Seed the remote tier through a throwaway writer.
        let writer = ObjectStore::new(
            LocalDb::new(Arc::new(MemoryDb::new())),
            Some(slow.clone() as Arc<dyn RemoteStore>),
        );
        let obj = sample();
        let (storage_ref, _) = writer.store_object(&never(), &obj, &PlainCodec).unwrap();
        let (reference, is_block) = storage_ref.remote_reference().expect("remote ref");
        let digest = *storage_ref.digest();

        let reader = Arc::new(ObjectStore::new(
            LocalDb::new(Arc::new(MemoryDb::new())),
            Some(slow.clone() as Arc<dyn RemoteStore>),
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reader = reader.clone();
                let reference = reference.to_string();
                let expected = obj.clone();
                thread::spawn(move || {
                    let got: Payload = reader
                        .get_or_fetch(&never(), &digest, &reference, is_block, &PlainCodec)
                        .unwrap();
                    assert_eq!(got, expected);
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread should not panic");
        }

        assert_eq!(slow.fetches.load(Ordering::SeqCst), 1);
    }
}

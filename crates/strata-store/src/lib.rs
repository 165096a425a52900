//! Two-tier content-addressed object storage.
//!
//! [`ObjectStore`] overlays a remote encrypted-at-rest blob store over a
//! local unencrypted digest-keyed cache:
//!
//! - [`LocalDb`] wraps a [`strata_db::Db`] and maps content digests to
//!   serialized payloads, verifying digests on store.
//! - [`RemoteStore`] is the abstract remote tier: opaque references, with a
//!   single-block vs merkledag-object distinction at the 256 KiB boundary.
//! - [`ObjectStore`] services reads from the local tier first, falls
//!   through to the remote tier, then back-fills the local tier. Concurrent
//!   fetches for the same digest are coalesced into a single remote call.
//!
//! Nothing here retries: a failed operation surfaces its error and leaves
//! on-disk state as it was. Retry policy belongs to the store adapters.

pub mod error;
pub mod local;
pub mod object_store;
pub mod remote;

pub use error::{StoreError, StoreResult};
pub use local::LocalDb;
pub use object_store::ObjectStore;
pub use remote::{MemoryRemoteStore, RemoteStore, MAX_BLOCK_SIZE};

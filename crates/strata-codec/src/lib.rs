//! Typed object serialization and sealing.
//!
//! Every record persisted through the object store is a [`TypedObject`]: a
//! serde type carrying a stable type-id string. Records travel in two
//! layers:
//!
//! - the **payload**: the JSON serialization of the object itself. This is
//!   what gets digested and cached locally, always unencrypted.
//! - the **wrapper** ([`ObjectWrapper`]): a bincode envelope around the
//!   payload carrying the type id and seal marker. This is what goes to
//!   remote storage, optionally encrypted.
//!
//! An [`ObjectCodec`] turns payloads into wrappers and back. [`PlainCodec`]
//! passes payloads through; [`SealedCodec`] seals them with AES-256-GCM.

pub mod codec;
pub mod error;
pub mod sealed;
pub mod wrapper;

pub use codec::{
    decode_payload, encode_payload, unwrap_object, wrap_object, ObjectCodec, PlainCodec,
    TypedObject,
};
pub use error::{CodecError, CodecResult};
pub use sealed::SealedCodec;
pub use wrapper::{ObjectWrapper, Seal};

//! Core types shared across the strata object store.
//!
//! - [`Digest`] -- fixed-width SHA-256 content digest identifying a blob
//! - [`StorageRef`] -- tagged reference to a blob, either by digest only or
//!   by digest plus an opaque remote-store reference
//! - [`CancelToken`] -- cooperative cancellation token threaded through
//!   every blocking operation
//!
//! These types carry no I/O of their own; the storage crates build on them.

pub mod cancel;
pub mod digest;
pub mod error;
pub mod storage_ref;

pub use cancel::{CancelToken, Cancelled};
pub use digest::Digest;
pub use error::TypeError;
pub use storage_ref::StorageRef;

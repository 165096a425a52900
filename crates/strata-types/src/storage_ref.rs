use std::fmt;

use serde::{Deserialize, Serialize};

use crate::digest::Digest;

/// Tagged reference to a stored blob.
///
/// A `Digest` ref is resolvable through the local digest cache alone; a
/// `Remote` ref additionally carries an opaque remote-store address.
/// `is_block` records whether the remote blob was stored as a single block
/// or as a multi-block merkledag object, which selects the fetch strategy.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageRef {
    /// Local-only reference.
    Digest {
        /// Digest of the unencrypted inner payload.
        digest: Digest,
    },
    /// Reference backed by remote blob storage.
    Remote {
        /// Digest of the unencrypted inner payload.
        digest: Digest,
        /// Opaque remote-store address. Empty means the null ref.
        reference: String,
        /// `true` for a single-block fetch, `false` for a merkledag fetch.
        is_block: bool,
    },
}

impl StorageRef {
    /// A local-only reference.
    pub const fn local(digest: Digest) -> Self {
        Self::Digest { digest }
    }

    /// A remote-backed reference.
    pub fn remote(digest: Digest, reference: impl Into<String>, is_block: bool) -> Self {
        Self::Remote {
            digest,
            reference: reference.into(),
            is_block,
        }
    }

    /// The null reference: no digest, no remote address.
    pub const fn null() -> Self {
        Self::Digest {
            digest: Digest::null(),
        }
    }

    /// Returns `true` for the null reference.
    pub fn is_null(&self) -> bool {
        match self {
            Self::Digest { digest } => digest.is_null(),
            Self::Remote {
                digest, reference, ..
            } => digest.is_null() && reference.is_empty(),
        }
    }

    /// Digest of the referenced payload.
    pub fn digest(&self) -> &Digest {
        match self {
            Self::Digest { digest } | Self::Remote { digest, .. } => digest,
        }
    }

    /// The remote address and block flag, when remote-backed.
    pub fn remote_reference(&self) -> Option<(&str, bool)> {
        match self {
            Self::Digest { .. } => None,
            Self::Remote {
                reference,
                is_block,
                ..
            } => Some((reference.as_str(), *is_block)),
        }
    }
}

impl Default for StorageRef {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Display for StorageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Digest { digest } => write!(f, "digest:{}", digest.short_hex()),
            Self::Remote {
                digest,
                reference,
                is_block,
            } => {
                let kind = if *is_block { "block" } else { "object" };
                write!(f, "{kind}:{reference} (digest:{})", digest.short_hex())
            }
        }
    }
}

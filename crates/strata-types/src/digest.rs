use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::error::TypeError;

/// Content digest of a serialized object payload.
///
/// A `Digest` is the SHA-256 hash of the innermost unencrypted bytes of an
/// object -- the multihash digest body only, without the multihash header.
/// Identical payloads always produce the same digest, making objects
/// deduplicatable and verifiable.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Digest([u8; 32]);

impl Digest {
    /// Compute the digest of raw payload bytes.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Create a digest from a pre-computed hash.
    pub const fn from_hash(hash: [u8; 32]) -> Self {
        Self(hash)
    }

    /// The null digest (all zeros). Represents "no digest yet".
    pub const fn null() -> Self {
        Self([0u8; 32])
    }

    /// Returns `true` if this is the null digest.
    pub fn is_null(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// The raw 32-byte hash.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex representation (64 characters, no separators).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex representation (first 8 characters).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Parse from a hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(TypeError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.short_hex())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; 32]> for Digest {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_is_deterministic() {
        let d1 = Digest::compute(b"hello world");
        let d2 = Digest::compute(b"hello world");
        assert_eq!(d1, d2);
    }

    #[test]
    fn different_data_produces_different_digests() {
        assert_ne!(Digest::compute(b"hello"), Digest::compute(b"world"));
    }

    #[test]
    fn compute_is_sha256() {
        // SHA-256 of the empty string.
        let expected = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
        assert_eq!(Digest::compute(b"").to_hex(), expected);
    }

    #[test]
    fn null_is_all_zeros() {
        let null = Digest::null();
        assert!(null.is_null());
        assert_eq!(null.as_bytes(), &[0u8; 32]);
        assert!(!Digest::compute(b"x").is_null());
    }

    #[test]
    fn hex_roundtrip() {
        let d = Digest::compute(b"test");
        let parsed = Digest::from_hex(&d.to_hex()).unwrap();
        assert_eq!(d, parsed);
    }

    #[test]
    fn from_hex_rejects_bad_length() {
        let err = Digest::from_hex("abcd").unwrap_err();
        assert_eq!(
            err,
            TypeError::InvalidLength {
                expected: 32,
                actual: 2
            }
        );
    }

    #[test]
    fn from_hex_rejects_non_hex() {
        assert!(matches!(
            Digest::from_hex("zz"),
            Err(TypeError::InvalidHex(_))
        ));
    }

    #[test]
    fn display_is_full_hex() {
        let d = Digest::compute(b"test");
        assert_eq!(format!("{d}").len(), 64);
    }

    #[test]
    fn serde_roundtrip() {
        let d = Digest::compute(b"serde");
        let json = serde_json::to_string(&d).unwrap();
        let parsed: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(d, parsed);
    }
}

use serde::{Deserialize, Serialize};

use crate::error::{CodecError, CodecResult};

/// How a wrapper's payload is sealed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Seal {
    /// Payload bytes are the plain serialized object.
    Plain,
    /// Payload bytes are AES-256-GCM sealed: `nonce || ciphertext || tag`.
    Aead,
}

/// Serialized envelope around a typed object payload.
///
/// The wrapper is what leaves the machine: it is bincode-encoded and handed
/// to remote storage. The type id lets a reader refuse mismatched records
/// before touching the payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectWrapper {
    /// Type id of the inner object (e.g. `/objstore/btree/node/0.0.1`).
    pub type_id: String,
    /// How the payload is sealed.
    pub seal: Seal,
    /// Payload bytes; ciphertext when sealed.
    pub payload: Vec<u8>,
}

impl ObjectWrapper {
    /// Encode the wrapper to its binary form.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| CodecError::Serialization(e.to_string()))
    }

    /// Decode a wrapper from its binary form.
    pub fn decode(data: &[u8]) -> CodecResult<Self> {
        bincode::deserialize(data).map_err(|e| CodecError::Serialization(e.to_string()))
    }
}

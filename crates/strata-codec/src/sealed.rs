use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;

use crate::codec::ObjectCodec;
use crate::error::{CodecError, CodecResult};
use crate::wrapper::{ObjectWrapper, Seal};

/// Nonce size for AES-GCM (96 bits).
const NONCE_SIZE: usize = 12;

/// Encrypting codec: payloads are sealed with AES-256-GCM.
///
/// Wire format of the sealed payload: `[nonce: 12 bytes][ciphertext + tag]`.
/// A fresh random nonce is drawn per seal, so sealing is not deterministic;
/// the content digest is always computed over the unsealed payload, which is.
pub struct SealedCodec {
    cipher: Aes256Gcm,
}

impl SealedCodec {
    /// Create a codec from a 32-byte key.
    pub fn new(key: [u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
        }
    }

    /// Generate a random 32-byte key.
    pub fn generate_key() -> [u8; 32] {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        key
    }
}

impl ObjectCodec for SealedCodec {
    fn seal(&self, type_id: &str, payload: &[u8]) -> CodecResult<ObjectWrapper> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, payload)
            .map_err(|e| CodecError::Crypto(format!("encrypt: {e}")))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);

        Ok(ObjectWrapper {
            type_id: type_id.to_string(),
            seal: Seal::Aead,
            payload: sealed,
        })
    }

    fn open(&self, wrapper: &ObjectWrapper, expected_type_id: &str) -> CodecResult<Vec<u8>> {
        if wrapper.type_id != expected_type_id {
            return Err(CodecError::TypeMismatch {
                expected: expected_type_id.to_string(),
                actual: wrapper.type_id.clone(),
            });
        }
        if wrapper.seal != Seal::Aead {
            return Err(CodecError::Crypto(
                "plain payload cannot be opened by the sealing codec".to_string(),
            ));
        }
        if wrapper.payload.len() < NONCE_SIZE {
            return Err(CodecError::Crypto("sealed payload too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = wrapper.payload.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| CodecError::Crypto(format!("decrypt: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{unwrap_object, wrap_object, TypedObject};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Secret {
        value: String,
    }

    impl TypedObject for Secret {
        const TYPE_ID: &'static str = "/test/secret/0.0.1";
    }

    #[test]
    fn seal_open_roundtrip() {
        let codec = SealedCodec::new(SealedCodec::generate_key());
        let obj = Secret {
            value: "classified".to_string(),
        };
        let (wrapper, payload) = wrap_object(&obj, &codec).unwrap();
        assert_eq!(wrapper.seal, Seal::Aead);
        // Ciphertext differs from the plain payload.
        assert_ne!(wrapper.payload, payload);

        let back: Secret = unwrap_object(&wrapper, &codec).unwrap();
        assert_eq!(obj, back);
    }

    #[test]
    fn wrong_key_fails_to_open() {
        let codec = SealedCodec::new([1u8; 32]);
        let other = SealedCodec::new([2u8; 32]);
        let obj = Secret {
            value: "x".to_string(),
        };
        let (wrapper, _) = wrap_object(&obj, &codec).unwrap();
        assert!(matches!(
            unwrap_object::<Secret>(&wrapper, &other),
            Err(CodecError::Crypto(_))
        ));
    }

    #[test]
    fn tampered_ciphertext_fails_to_open() {
        let codec = SealedCodec::new([3u8; 32]);
        let obj = Secret {
            value: "intact".to_string(),
        };
        let (mut wrapper, _) = wrap_object(&obj, &codec).unwrap();
        let last = wrapper.payload.len() - 1;
        wrapper.payload[last] ^= 0xff;
        assert!(matches!(
            unwrap_object::<Secret>(&wrapper, &codec),
            Err(CodecError::Crypto(_))
        ));
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let codec = SealedCodec::new([4u8; 32]);
        let wrapper = ObjectWrapper {
            type_id: Secret::TYPE_ID.to_string(),
            seal: Seal::Aead,
            payload: vec![0u8; 4],
        };
        assert!(matches!(
            codec.open(&wrapper, Secret::TYPE_ID),
            Err(CodecError::Crypto(_))
        ));
    }
}

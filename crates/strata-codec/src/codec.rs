use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CodecError, CodecResult};
use crate::wrapper::{ObjectWrapper, Seal};

/// A serde type that can live in the object store.
///
/// The type id is persisted with every encoded record so that a store can
/// refuse mismatched records on read.
pub trait TypedObject: Serialize + DeserializeOwned {
    /// Stable type identifier, e.g. `/objstore/btree/node/0.0.1`.
    const TYPE_ID: &'static str;
}

/// Serialize an object to its payload bytes.
///
/// Struct fields serialize in declaration order, so the payload is
/// deterministic for a given object value.
pub fn encode_payload<T: TypedObject>(obj: &T) -> CodecResult<Vec<u8>> {
    serde_json::to_vec(obj).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Deserialize an object from its payload bytes.
pub fn decode_payload<T: TypedObject>(data: &[u8]) -> CodecResult<T> {
    serde_json::from_slice(data).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Seals typed payloads into wrappers and opens them back up.
///
/// Implementations decide what "sealed" means -- pass-through, encryption,
/// compression. They never interpret the payload.
pub trait ObjectCodec: Send + Sync {
    /// Build a wrapper around a payload.
    fn seal(&self, type_id: &str, payload: &[u8]) -> CodecResult<ObjectWrapper>;

    /// Recover the payload from a wrapper, verifying the type id.
    fn open(&self, wrapper: &ObjectWrapper, expected_type_id: &str) -> CodecResult<Vec<u8>>;
}

/// Wrap an object: serialize it and seal the payload.
///
/// Returns the wrapper together with the unsealed payload bytes, which is
/// what gets digested and cached locally.
pub fn wrap_object<T: TypedObject>(
    obj: &T,
    codec: &dyn ObjectCodec,
) -> CodecResult<(ObjectWrapper, Vec<u8>)> {
    let payload = encode_payload(obj)?;
    let wrapper = codec.seal(T::TYPE_ID, &payload)?;
    Ok((wrapper, payload))
}

/// Unwrap an object: open the wrapper and deserialize the payload.
pub fn unwrap_object<T: TypedObject>(
    wrapper: &ObjectWrapper,
    codec: &dyn ObjectCodec,
) -> CodecResult<T> {
    let payload = codec.open(wrapper, T::TYPE_ID)?;
    decode_payload(&payload)
}

/// Pass-through codec: the wrapper payload is the plain serialized object.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlainCodec;

impl ObjectCodec for PlainCodec {
    fn seal(&self, type_id: &str, payload: &[u8]) -> CodecResult<ObjectWrapper> {
        Ok(ObjectWrapper {
            type_id: type_id.to_string(),
            seal: Seal::Plain,
            payload: payload.to_vec(),
        })
    }

    fn open(&self, wrapper: &ObjectWrapper, expected_type_id: &str) -> CodecResult<Vec<u8>> {
        if wrapper.type_id != expected_type_id {
            return Err(CodecError::TypeMismatch {
                expected: expected_type_id.to_string(),
                actual: wrapper.type_id.clone(),
            });
        }
        if wrapper.seal != Seal::Plain {
            return Err(CodecError::Crypto(
                "sealed payload cannot be opened by the plain codec".to_string(),
            ));
        }
        Ok(wrapper.payload.clone())
    }
}

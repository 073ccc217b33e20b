//! CBOR encoding of wire payloads.
//!
//! Payloads are encoded with `ciborium`. Event kinds are strings on the
//! wire, so a peer speaking a newer dialect produces a decode error here
//! rather than a silently misread event.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CodecError;
use crate::messages::Snapshot;

/// Encode a payload to CBOR bytes.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(buf)
}

/// Decode a payload from CBOR bytes.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    ciborium::from_reader(bytes).map_err(|e| CodecError::Decode(e.to_string()))
}

/// Encode the `Absent` snapshot sentinel.
///
/// The encoding does not depend on the slot type, so a peer that has no
/// store bound to a channel can still answer a snapshot request.
pub fn encode_absent() -> Result<Vec<u8>, CodecError> {
    encode(&Snapshot::<()>::Absent)
}

/// Reject payloads larger than `limit` bytes.
pub fn check_size(bytes: &[u8], limit: usize) -> Result<(), CodecError> {
    if bytes.len() > limit {
        return Err(CodecError::TooLarge {
            size: bytes.len(),
            limit,
        });
    }
    Ok(())
}

//! Array payloads.
//!
//! Arrays are written with their shape through ndarray's serde support as
//! MessagePack, then zlib-compressed. Decoding checks that the element
//! count matches the shape.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use roiflow_core::Array;

use crate::error::StorageError;

fn corrupt(reason: impl Into<String>) -> StorageError {
    StorageError::Corrupt {
        reason: reason.into(),
    }
}

/// Serializes and compresses an array.
pub fn encode_array(data: &Array) -> Result<Vec<u8>, StorageError> {
    let packed = rmp_serde::to_vec(data).map_err(|e| StorageError::Unsupported {
        reason: format!("array payload: {e}"),
    })?;
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(packed.len() / 2), Compression::fast());
    encoder.write_all(&packed)?;
    Ok(encoder.finish()?)
}

/// Inverse of [`encode_array`].
pub fn decode_array(bytes: &[u8]) -> Result<Array, StorageError> {
    let mut packed = Vec::new();
    ZlibDecoder::new(bytes)
        .read_to_end(&mut packed)
        .map_err(|e| corrupt(format!("array payload does not decompress: {e}")))?;
    rmp_serde::from_slice(&packed).map_err(|e| corrupt(format!("array payload: {e}")))
}

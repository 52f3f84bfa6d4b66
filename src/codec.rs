//! Conversion between float32 vectors and their base64 wire form.
//!
//! Vectors travel and persist as the base64 of their little-endian IEEE-754
//! byte concatenation. The codec is pure; cached entries are stored encoded
//! and only decoded when a client asks for `encoding_format: "float"`.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::error::{Error, Result};

/// Encode a float32 vector as standard base64 of its little-endian bytes.
pub fn encode_vector(values: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    BASE64.encode(bytes)
}

/// Decode a base64 string back into a float32 vector.
///
/// Fails when the input is not valid base64 or the decoded byte length is
/// not a multiple of 4.
pub fn decode_vector(encoded: &str) -> Result<Vec<f32>> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| Error::MalformedVector(e.to_string()))?;

    if bytes.len() % 4 != 0 {
        return Err(Error::MalformedVector(format!(
            "decoded length {} is not a multiple of 4",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes(chunk.try_into().unwrap()))
        .collect())
}

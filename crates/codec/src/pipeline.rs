//! The two-way byte pipeline behind every save file.
//!
//! Encode: payload → envelope → JSON bytes → gzip (single block) → AES-CBC.
//! Decode runs the mirror path and gates on the envelope version.

use crate::envelope::{Envelope, SCHEMA_VERSION};
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{Read, Write};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

// Fixed key and IV. This is obfuscation, not security: anyone with the
// binary can recover both. A secure variant needs per-save random IVs and
// authenticated encryption, which changes the wire format.
const KEY: [u8; 32] = [
    0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f,
    0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19, 0x1a, 0x1b, 0x1c, 0x1d, 0x1e,
    0x1f, 0x20,
];
const IV: [u8; 16] = [
    0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f,
    0x10,
];

/// Errors from the codec pipeline.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("serialization failed: {0}")]
    Serialization(String),
    #[error("compression failed: {0}")]
    Compression(String),
    #[error("decompression failed: {0}")]
    Decompression(String),
    #[error("encryption failed: {0}")]
    Encryption(String),
    #[error("decryption failed: {0}")]
    Decryption(String),
    #[error("envelope version mismatch: file has v{found}, expected v{expected}")]
    VersionMismatch { found: u32, expected: u32 },
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
}

/// Encode a payload into the on-disk byte layout.
///
/// Any stage failure aborts the whole pipeline: the caller never receives
/// partial bytes to write.
pub fn encode_payload(data: serde_json::Value) -> Result<Vec<u8>, CodecError> {
    if payload_is_empty(&data) {
        return Err(CodecError::Serialization(
            "serialized payload is empty".into(),
        ));
    }
    let json = serde_json::to_vec(&Envelope::new(data))
        .map_err(|e| CodecError::Serialization(e.to_string()))?;
    let compressed = compress(&json)?;
    encrypt(&compressed)
}

/// Decode the on-disk byte layout back into the inner payload value.
///
/// Returns [`CodecError::VersionMismatch`] when the envelope carries any
/// schema version other than the current one; the file is then treated as
/// absent by callers.
pub fn decode_payload(bytes: &[u8]) -> Result<serde_json::Value, CodecError> {
    if bytes.is_empty() {
        return Err(CodecError::MalformedEnvelope("file is empty".into()));
    }
    let compressed = decrypt(bytes)?;
    let json = decompress(&compressed)?;
    let envelope: Envelope = serde_json::from_slice(&json)
        .map_err(|e| CodecError::MalformedEnvelope(e.to_string()))?;
    if envelope.version != SCHEMA_VERSION {
        return Err(CodecError::VersionMismatch {
            found: envelope.version,
            expected: SCHEMA_VERSION,
        });
    }
    if payload_is_empty(&envelope.data) {
        return Err(CodecError::MalformedEnvelope(
            "payload field is empty".into(),
        ));
    }
    Ok(envelope.data)
}

/// Whether a payload value carries no usable state.
fn payload_is_empty(value: &serde_json::Value) -> bool {
    value.is_null() || value.as_object().is_some_and(|obj| obj.is_empty())
}

/// Gzip-compress one whole block.
pub fn compress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| CodecError::Compression(e.to_string()))?;
    let out = encoder
        .finish()
        .map_err(|e| CodecError::Compression(e.to_string()))?;
    if out.is_empty() {
        return Err(CodecError::Compression("empty output".into()));
    }
    Ok(out)
}

/// Inflate one whole gzip block.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    GzDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| CodecError::Decompression(e.to_string()))?;
    if out.is_empty() {
        return Err(CodecError::Decompression("empty output".into()));
    }
    Ok(out)
}

/// AES-256-CBC encrypt with the fixed key/IV.
pub fn encrypt(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    if data.is_empty() {
        return Err(CodecError::Encryption("nothing to encrypt".into()));
    }
    let out = Aes256CbcEnc::new(&KEY.into(), &IV.into()).encrypt_padded_vec_mut::<Pkcs7>(data);
    if out.is_empty() {
        return Err(CodecError::Encryption("empty output".into()));
    }
    Ok(out)
}

/// AES-256-CBC decrypt with the fixed key/IV.
pub fn decrypt(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    if data.is_empty() {
        return Err(CodecError::Decryption("nothing to decrypt".into()));
    }
    let out = Aes256CbcDec::new(&KEY.into(), &IV.into())
        .decrypt_padded_vec_mut::<Pkcs7>(data)
        .map_err(|e| CodecError::Decryption(e.to_string()))?;
    if out.is_empty() {
        return Err(CodecError::Decryption("empty output".into()));
    }
    Ok(out)
}

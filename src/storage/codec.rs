//! Codec Module
//!
//! Turns structured values into checksummed, optionally compressed text
//! payloads and back. Compressed payloads are LZ4 blocks (size-prepended)
//! rendered as standard base64 so they stay valid backend text.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::Serialize;
use serde_json::Value;

use crate::config::Config;
use crate::error::{Result, StoreError};

// == Encoded Payload ==
/// Output of [`Codec::encode`], ready to be wrapped in an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload {
    /// Serialized, possibly compressed text
    pub text: String,
    /// Whether `text` went through the compression transform
    pub is_compressed: bool,
    /// CRC-32 of `text` as 8 hex digits, or empty when validation was off
    pub checksum: String,
}

// == Codec ==
/// Serializes, compresses and checksums payloads.
#[derive(Debug, Clone)]
pub struct Codec {
    /// Serialized text must be longer than this to be considered for compression
    compression_threshold: usize,
    /// Minimum fraction the compressed form must save to be adopted
    min_saving: f64,
}

impl Codec {
    /// Creates a codec with an explicit threshold and minimum saving fraction.
    pub fn new(compression_threshold: usize, min_saving: f64) -> Self {
        Self {
            compression_threshold,
            min_saving: min_saving.clamp(0.0, 1.0),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.compression_threshold, config.min_compression_saving)
    }

    // == Encode ==
    /// Serializes `value` to JSON, compresses it when that pays off and
    /// computes the checksum over the final text.
    pub fn encode<T: Serialize + ?Sized>(
        &self,
        value: &T,
        compress: bool,
        validate: bool,
    ) -> Result<EncodedPayload> {
        let serialized = serde_json::to_string(value)?;

        let (text, is_compressed) = if compress {
            match self.try_compress(&serialized) {
                Some(compressed) => (compressed, true),
                None => (serialized, false),
            }
        } else {
            (serialized, false)
        };

        let checksum = if validate {
            checksum(&text)
        } else {
            String::new()
        };

        Ok(EncodedPayload {
            text,
            is_compressed,
            checksum,
        })
    }

    // == Decode ==
    /// Verifies, inflates and parses a payload back into a value.
    pub fn decode(&self, payload: &str, is_compressed: bool, expected_checksum: &str) -> Result<Value> {
        let text = self.decode_text(payload, is_compressed, expected_checksum)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Verifies and inflates a payload, returning the serialized JSON text.
    pub fn decode_text(
        &self,
        payload: &str,
        is_compressed: bool,
        expected_checksum: &str,
    ) -> Result<String> {
        verify_checksum(payload, expected_checksum)?;

        if is_compressed {
            decompress(payload)
        } else {
            Ok(payload.to_string())
        }
    }

    // == Try Compress ==
    /// Compresses serialized text, returning the compressed payload only if the
    /// text is above the threshold and the result saves at least `min_saving`.
    pub fn try_compress(&self, text: &str) -> Option<String> {
        if text.len() <= self.compression_threshold {
            return None;
        }

        let compressed = BASE64.encode(lz4_flex::compress_prepend_size(text.as_bytes()));
        let limit = text.len() as f64 * (1.0 - self.min_saving);
        if (compressed.len() as f64) <= limit && compressed.len() < text.len() {
            Some(compressed)
        } else {
            None
        }
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

// == Checksum ==
/// CRC-32 of the payload bytes, rendered as 8 lowercase hex digits.
pub fn checksum(text: &str) -> String {
    format!("{:08x}", crc32fast::hash(text.as_bytes()))
}

fn verify_checksum(payload: &str, expected: &str) -> Result<()> {
    if expected.is_empty() {
        return Ok(());
    }
    let actual = checksum(payload);
    if actual != expected {
        return Err(StoreError::Integrity {
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

fn decompress(payload: &str) -> Result<String> {
    let bytes = BASE64
        .decode(payload)
        .map_err(|e| StoreError::Decode(format!("Invalid base64 payload: {}", e)))?;
    let inflated = lz4_flex::decompress_size_prepended(&bytes)
        .map_err(|e| StoreError::Decode(format!("LZ4 decompression failed: {}", e)))?;
    String::from_utf8(inflated)
        .map_err(|e| StoreError::Decode(format!("Decompressed payload is not UTF-8: {}", e)))
}

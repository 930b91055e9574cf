//! Item Envelope Module
//!
//! Defines the persisted unit written to the backend per key: the codec
//! payload plus write time, format version, checksum, compression flag and
//! optional expiration.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::storage::codec::EncodedPayload;
use crate::storage::FORMAT_VERSION;

// == Item Envelope ==
/// A stored value with its metadata, as persisted in the backend.
///
/// Field names on the wire follow the stable entry format:
/// `data`, `timestamp`, `version`, `checksum`, `compressed`, `expiresAt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemEnvelope {
    /// Serialized (possibly compressed) value
    #[serde(rename = "data")]
    pub payload: String,
    /// Last write timestamp (Unix milliseconds)
    #[serde(rename = "timestamp")]
    pub written_at: u64,
    /// Format version tag
    #[serde(rename = "version")]
    pub format_version: String,
    /// Payload checksum, empty when validation was disabled
    #[serde(default)]
    pub checksum: String,
    /// Whether the payload is compressed
    #[serde(rename = "compressed")]
    pub is_compressed: bool,
    /// Expiration timestamp (Unix milliseconds), None = no expiration
    #[serde(
        rename = "expiresAt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_at: Option<u64>,
}

impl ItemEnvelope {
    // == Constructor ==
    /// Wraps codec output, stamping it with the current time.
    ///
    /// # Arguments
    /// * `encoded` - Codec output
    /// * `ttl` - Optional time to live
    pub fn wrap(encoded: EncodedPayload, ttl: Option<Duration>) -> Self {
        Self::wrap_at(encoded, ttl, current_timestamp_ms())
    }

    /// Wraps codec output with an explicit write time.
    pub fn wrap_at(encoded: EncodedPayload, ttl: Option<Duration>, now: u64) -> Self {
        let expires_at = ttl
            .filter(|ttl| !ttl.is_zero())
            .map(|ttl| now.saturating_add(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)));

        Self {
            payload: encoded.text,
            written_at: now,
            format_version: FORMAT_VERSION.to_string(),
            checksum: encoded.checksum,
            is_compressed: encoded.is_compressed,
            expires_at,
        }
    }

    // == Is Expired ==
    /// Checks if the envelope has expired at `now`.
    ///
    /// An envelope is expired once `now >= expires_at`; envelopes without an
    /// expiration never expire.
    pub fn is_expired(&self, now: u64) -> bool {
        match self.expires_at {
            Some(expires) => now >= expires,
            None => false,
        }
    }

    // == Time To Live ==
    /// Returns remaining TTL in milliseconds, or None if no expiration is set.
    ///
    /// # Returns
    /// - `Some(0)` if the envelope has expired
    /// - `Some(remaining_ms)` if it has a TTL that hasn't elapsed
    /// - `None` if it never expires
    pub fn ttl_remaining_ms(&self, now: u64) -> Option<u64> {
        self.expires_at.map(|expires| expires.saturating_sub(now))
    }

    // == Serialization ==
    /// Renders the envelope in the backend's text format.
    pub fn serialize(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses backend text into an envelope.
    ///
    /// Malformed text, missing required fields and envelopes from an
    /// incompatible major format version all fail with `StoreError::Decode`.
    pub fn deserialize(raw: &str) -> Result<Self> {
        let envelope: ItemEnvelope = serde_json::from_str(raw)?;
        if !is_compatible_version(&envelope.format_version) {
            return Err(StoreError::Decode(format!(
                "Unsupported format version: {}",
                envelope.format_version
            )));
        }
        Ok(envelope)
    }

    /// Footprint of this envelope stored under `key`: serialized text plus key.
    pub fn stored_size(&self, key: &str) -> Result<u64> {
        Ok(stored_size(key, &self.serialize()?))
    }
}

/// Footprint of a raw backend entry.
pub fn stored_size(key: &str, raw: &str) -> u64 {
    (key.len() + raw.len()) as u64
}

/// True when `version` shares the major component of the current format.
pub fn is_compatible_version(version: &str) -> bool {
    major(version) == major(FORMAT_VERSION)
}

fn major(version: &str) -> &str {
    version.split('.').next().unwrap_or(version)
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    fn payload(text: &str) -> EncodedPayload {
        EncodedPayload {
            text: text.to_string(),
            is_compressed: false,
            checksum: String::new(),
        }
    }

    #[test]
    fn test_wrap_without_ttl() {
        let envelope = ItemEnvelope::wrap_at(payload("1"), None, 1_000);

        assert_eq!(envelope.written_at, 1_000);
        assert_eq!(envelope.format_version, FORMAT_VERSION);
        assert!(envelope.expires_at.is_none());
        assert!(!envelope.is_expired(u64::MAX));
    }

    #[test]
    fn test_wrap_with_ttl() {
        let envelope = ItemEnvelope::wrap_at(payload("1"), Some(Duration::from_millis(100)), 1_000);

        assert_eq!(envelope.expires_at, Some(1_100));
        assert!(!envelope.is_expired(1_099));
        assert_eq!(envelope.ttl_remaining_ms(1_040), Some(60));
    }

    #[test]
    fn test_wrap_with_zero_ttl_never_expires() {
        let envelope = ItemEnvelope::wrap_at(payload("1"), Some(Duration::ZERO), 1_000);

        assert!(envelope.expires_at.is_none());
        assert!(!envelope.is_expired(1_000));
        assert!(!envelope.serialize().unwrap().contains("expiresAt"));
    }

    #[test]
    fn test_wrap_with_huge_ttl_saturates() {
        let envelope = ItemEnvelope::wrap_at(payload("1"), Some(Duration::MAX), 1_000);
        assert_eq!(envelope.expires_at, Some(u64::MAX));
        assert!(!envelope.is_expired(u64::MAX - 1));
    }

    #[test]
    fn test_expiration_boundary_condition() {
        let envelope = ItemEnvelope::wrap_at(payload("1"), Some(Duration::from_millis(100)), 1_000);

        // Expired exactly when now == expires_at
        assert!(envelope.is_expired(1_100));
        assert_eq!(envelope.ttl_remaining_ms(2_000), Some(0));
    }

    #[test]
    fn test_wire_format_field_names() {
        let envelope = ItemEnvelope::wrap_at(payload(r#"{"a":1}"#), Some(Duration::from_millis(5)), 42);
        let raw = envelope.serialize().unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();

        assert_eq!(json["data"], r#"{"a":1}"#);
        assert_eq!(json["timestamp"], 42);
        assert_eq!(json["version"], FORMAT_VERSION);
        assert_eq!(json["checksum"], "");
        assert_eq!(json["compressed"], false);
        assert_eq!(json["expiresAt"], 47);
    }

    #[test]
    fn test_expires_at_omitted_when_absent() {
        let raw = ItemEnvelope::wrap_at(payload("1"), None, 42).serialize().unwrap();
        assert!(!raw.contains("expiresAt"));
    }

    #[test]
    fn test_deserialize_round_trip() {
        let envelope = ItemEnvelope::wrap_at(payload("[1,2]"), Some(Duration::from_secs(1)), 7);
        let parsed = ItemEnvelope::deserialize(&envelope.serialize().unwrap()).unwrap();
        assert_eq!(parsed, envelope);
    }

    #[test]
    fn test_deserialize_rejects_garbage_and_missing_fields() {
        assert!(matches!(
            ItemEnvelope::deserialize("garbage"),
            Err(StoreError::Decode(_))
        ));
        assert!(matches!(
            ItemEnvelope::deserialize("42"),
            Err(StoreError::Decode(_))
        ));
        assert!(matches!(
            ItemEnvelope::deserialize(r#"{"data":"1","version":"1.0","compressed":false}"#),
            Err(StoreError::Decode(_))
        ));
    }

    #[test]
    fn test_deserialize_accepts_missing_checksum() {
        let raw = r#"{"data":"1","timestamp":5,"version":"1.0","compressed":false}"#;
        let envelope = ItemEnvelope::deserialize(raw).unwrap();
        assert!(envelope.checksum.is_empty());
        assert!(envelope.expires_at.is_none());
    }

    #[test]
    fn test_version_compatibility() {
        assert!(is_compatible_version("1.0"));
        assert!(is_compatible_version("1.7"));
        assert!(!is_compatible_version("2.0"));

        let raw = r#"{"data":"1","timestamp":5,"version":"2.0","checksum":"","compressed":false}"#;
        assert!(matches!(
            ItemEnvelope::deserialize(raw),
            Err(StoreError::Decode(_))
        ));
    }

    #[test]
    fn test_stored_size_counts_key_and_text() {
        let envelope = ItemEnvelope::wrap_at(payload("1"), None, 1);
        let raw = envelope.serialize().unwrap();
        assert_eq!(envelope.stored_size("key").unwrap(), (raw.len() + 3) as u64);
    }
}

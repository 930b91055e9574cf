//! Per-call options for writes and imports
//!
//! Field names and units match the configuration object callers send:
//! `compress`, `validate`, `ttl` (milliseconds) and `maxSize` (bytes).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Options accepted by `set_item`.
///
/// # Fields
/// - `compress`: try to compress the payload (default true)
/// - `validate`: store a checksum of the payload (default true)
/// - `ttl`: time to live in milliseconds (default: never expires)
/// - `max_size`: ceiling override for this write in bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SetOptions {
    pub compress: bool,
    pub validate: bool,
    #[serde(rename = "ttl", skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_size: Option<u64>,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self {
            compress: true,
            validate: true,
            ttl_ms: None,
            max_size: None,
        }
    }
}

impl SetOptions {
    /// Sets the time to live. A zero duration means the entry never expires.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_ms = Some(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    /// Overrides the store ceiling for this write.
    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = Some(max_size);
        self
    }

    /// Time to live as a Duration; None when unset or zero.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_ms.filter(|ms| *ms > 0).map(Duration::from_millis)
    }
}

/// Options accepted by `import_all`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportOptions {
    /// Replace keys that already hold a valid value
    pub overwrite: bool,
    /// Store checksums for imported entries
    pub validate: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            validate: true,
        }
    }
}

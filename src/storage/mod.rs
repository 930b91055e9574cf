//! Storage Module
//!
//! Persistent key-value storage with compression, integrity validation, TTL
//! expiration and capacity-aware eviction.

mod backend;
mod capacity;
mod codec;
mod envelope;
mod stats;
mod store;


// Re-export public types
pub use backend::{FileBackend, MemoryBackend, StorageBackend};
pub use capacity::{CapacityManager, EvictionCandidate, ReclaimOutcome};
pub use codec::{checksum, Codec, EncodedPayload};
pub use envelope::{current_timestamp_ms, is_compatible_version, stored_size, ItemEnvelope};
pub use stats::{HealthReport, HealthStatus, StorageStats};
pub use store::{OptimizeOutcome, PurgeOutcome, SmartStorage, StorageHandle};

// == Public Constants ==
/// Format version written into every envelope
pub const FORMAT_VERSION: &str = "1.0";

/// Usage ratio below which the store reports healthy
pub const HEALTHY_USAGE: f64 = 0.7;

/// Usage ratio below which the store reports warning (critical above)
pub const WARNING_USAGE: f64 = 0.9;

// == Namespace ==
/// Key prefix separating this store's entries from other backend users.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Namespace {
    prefix: String,
}

impl Namespace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Backing key for a logical key.
    pub fn key(&self, logical: &str) -> String {
        format!("{}{}", self.prefix, logical)
    }

    /// Logical key for a backing key, or None if the key is not ours.
    pub fn logical<'a>(&self, backing: &'a str) -> Option<&'a str> {
        backing.strip_prefix(self.prefix.as_str())
    }

    /// Backing keys in `backend` that carry this namespace's prefix.
    pub fn owned_keys<B: StorageBackend + ?Sized>(&self, backend: &B) -> Vec<String> {
        backend
            .keys()
            .into_iter()
            .filter(|k| k.starts_with(self.prefix.as_str()))
            .collect()
    }
}

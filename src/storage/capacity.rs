//! Capacity Manager Module
//!
//! Measures the store's footprint against its ceiling and evicts entries in
//! write-time order when space is needed.

use tracing::{debug, warn};

use crate::storage::envelope::{stored_size, ItemEnvelope};
use crate::storage::{Namespace, StorageBackend};

// == Eviction Candidate ==
/// An entry considered for eviction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionCandidate {
    /// Backing key
    pub key: String,
    /// Last write time; 0 for entries that do not decode
    pub written_at: u64,
    /// Footprint (raw text + key) in bytes
    pub size: u64,
}

// == Reclaim Outcome ==
/// Result of a reclaim run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReclaimOutcome {
    /// Backing keys removed, oldest first
    pub evicted: Vec<String>,
    /// Bytes freed
    pub bytes_freed: u64,
}

// == Capacity Manager ==
/// Keeps the total footprint under a ceiling.
///
/// Sizes are always recomputed by a full scan so entries removed behind the
/// store's back are accounted for.
#[derive(Debug, Clone)]
pub struct CapacityManager {
    ceiling: u64,
    namespace: Namespace,
}

impl CapacityManager {
    // == Constructor ==
    pub fn new(ceiling: u64, namespace: Namespace) -> Self {
        Self { ceiling, namespace }
    }

    /// Configured ceiling in bytes.
    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    // == Current Size ==
    /// Sum of raw text length plus key length over every namespaced key.
    pub fn current_size<B: StorageBackend + ?Sized>(&self, backend: &B) -> u64 {
        self.namespace
            .owned_keys(backend)
            .iter()
            .filter_map(|key| backend.get_item(key).map(|raw| stored_size(key, &raw)))
            .sum()
    }

    // == Usage Ratio ==
    /// Current size divided by the ceiling.
    pub fn usage_ratio<B: StorageBackend + ?Sized>(&self, backend: &B) -> f64 {
        if self.ceiling == 0 {
            return 1.0;
        }
        self.current_size(backend) as f64 / self.ceiling as f64
    }

    // == Eviction Order ==
    /// Namespaced entries sorted oldest-written first, ties broken by key.
    ///
    /// Entries that fail to decode sort first. `exclude` is skipped.
    pub fn eviction_order<B: StorageBackend + ?Sized>(
        &self,
        backend: &B,
        exclude: Option<&str>,
    ) -> Vec<EvictionCandidate> {
        let mut candidates: Vec<EvictionCandidate> = self
            .namespace
            .owned_keys(backend)
            .into_iter()
            .filter(|key| Some(key.as_str()) != exclude)
            .filter_map(|key| {
                let raw = backend.get_item(&key)?;
                let written_at = ItemEnvelope::deserialize(&raw)
                    .map(|envelope| envelope.written_at)
                    .unwrap_or(0);
                Some(EvictionCandidate {
                    size: stored_size(&key, &raw),
                    key,
                    written_at,
                })
            })
            .collect();

        candidates.sort_by(|a, b| {
            a.written_at
                .cmp(&b.written_at)
                .then_with(|| a.key.cmp(&b.key))
        });
        candidates
    }

    // == Reclaim ==
    /// Removes entries oldest first until `required_bytes` are freed or no
    /// candidates remain.
    pub fn reclaim<B: StorageBackend + ?Sized>(
        &self,
        backend: &mut B,
        required_bytes: u64,
        exclude: Option<&str>,
    ) -> ReclaimOutcome {
        let mut outcome = ReclaimOutcome::default();
        if required_bytes == 0 {
            return outcome;
        }

        for candidate in self.eviction_order(backend, exclude) {
            if outcome.bytes_freed >= required_bytes {
                break;
            }
            match backend.remove_item(&candidate.key) {
                Ok(()) => {
                    debug!(
                        "Evicted {} ({} bytes, written at {})",
                        candidate.key, candidate.size, candidate.written_at
                    );
                    outcome.bytes_freed += candidate.size;
                    outcome.evicted.push(candidate.key);
                }
                Err(e) => warn!("Failed to evict {}: {}", candidate.key, e),
            }
        }

        outcome
    }
}

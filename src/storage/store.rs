//! Smart Storage Module
//!
//! Public store API combining the codec, item envelopes and capacity manager
//! over a pluggable backend. Read failures degrade to `None` plus removal of
//! the offending key; write failures degrade to `false`.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Result, StoreError};
use crate::models::{ExportBundle, ImportOptions, ImportReport, SetOptions};
use crate::storage::{
    checksum, current_timestamp_ms, is_compatible_version, stored_size, CapacityManager, Codec,
    HealthReport, ItemEnvelope, Namespace, ReclaimOutcome, StorageBackend, StorageStats,
};

/// Shared handle to a store, used by the maintenance scheduler and callers alike.
///
/// The lock is synchronous. From async code, keep guards out of `.await`
/// points and move long operations (large imports, file-backed writes) onto
/// `tokio::task::spawn_blocking`, the way [`TokioScheduler`] runs passes.
///
/// [`TokioScheduler`]: crate::tasks::TokioScheduler
pub type StorageHandle<B> = Arc<Mutex<SmartStorage<B>>>;

// == Outcomes ==
/// Result of purging expired entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeOutcome {
    /// Logical keys removed
    pub removed: Vec<String>,
    pub bytes_freed: u64,
}

/// Result of re-compressing large entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptimizeOutcome {
    /// Entries rewritten with a compressed payload
    pub recompressed: usize,
    pub bytes_saved: u64,
}

/// A namespaced entry whose envelope, checksum and payload all decoded.
#[derive(Debug)]
struct ScannedEntry {
    backing_key: String,
    logical_key: String,
    envelope: ItemEnvelope,
    value: Value,
    size: u64,
}

// == Smart Storage ==
/// Persistent key-value store with compression, integrity checks, TTL
/// expiration and write-time eviction.
#[derive(Debug)]
pub struct SmartStorage<B: StorageBackend> {
    backend: B,
    codec: Codec,
    capacity: CapacityManager,
    namespace: Namespace,
    /// Stored size above which an uncompressed entry is re-compressed by `optimize_storage`
    large_item_threshold: u64,
}

impl<B: StorageBackend> SmartStorage<B> {
    // == Constructor ==
    /// Creates a store over `backend` using the ceiling, namespace and codec
    /// settings from `config`.
    pub fn new(backend: B, config: &Config) -> Self {
        let namespace = Namespace::new(config.namespace.clone());
        Self {
            backend,
            codec: Codec::from_config(config),
            capacity: CapacityManager::new(config.max_size, namespace.clone()),
            namespace,
            large_item_threshold: config.large_item_threshold,
        }
    }

    /// Wraps the store in a shareable handle.
    pub fn into_handle(self) -> StorageHandle<B> {
        Arc::new(Mutex::new(self))
    }

    /// The underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Mutable access to the underlying backend, bypassing the store.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Configured ceiling in bytes.
    pub fn ceiling(&self) -> u64 {
        self.capacity.ceiling()
    }

    // == Set ==
    /// Stores `value` under `key`, replacing any previous entry.
    ///
    /// Evicts oldest-written entries first if the write would exceed the
    /// ceiling. Returns false on any failure; persistence is best effort.
    pub fn set_item<T: Serialize + ?Sized>(
        &mut self,
        key: &str,
        value: &T,
        options: &SetOptions,
    ) -> bool {
        match self.try_set(key, value, options) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to store {}: {}", key, e);
                false
            }
        }
    }

    /// Fallible form of [`set_item`](Self::set_item).
    pub fn try_set<T: Serialize + ?Sized>(
        &mut self,
        key: &str,
        value: &T,
        options: &SetOptions,
    ) -> Result<()> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey("Key cannot be empty".to_string()));
        }

        let encoded = self
            .codec
            .encode(value, options.compress, options.validate)?;
        let envelope = ItemEnvelope::wrap(encoded, options.ttl());
        let raw = envelope.serialize()?;

        let backing_key = self.namespace.key(key);
        let ceiling = options.max_size.unwrap_or(self.capacity.ceiling());
        self.ensure_capacity(&backing_key, stored_size(&backing_key, &raw), ceiling);

        self.backend.set_item(&backing_key, &raw)
    }

    /// Evicts entries until `new_size` bytes for `backing_key` fit under `ceiling`.
    ///
    /// The entry being replaced is never evicted; its current size counts as
    /// freed since the write replaces it.
    fn ensure_capacity(&mut self, backing_key: &str, new_size: u64, ceiling: u64) {
        let replaced = self
            .backend
            .get_item(backing_key)
            .map(|raw| stored_size(backing_key, &raw))
            .unwrap_or(0);
        let others = self
            .capacity
            .current_size(&self.backend)
            .saturating_sub(replaced);

        if others + new_size <= ceiling {
            return;
        }

        let required = others + new_size - ceiling;
        let outcome = self
            .capacity
            .reclaim(&mut self.backend, required, Some(backing_key));
        info!(
            "Evicted {} entries ({} bytes) to fit {} ({} bytes needed)",
            outcome.evicted.len(),
            outcome.bytes_freed,
            backing_key,
            required
        );
        if outcome.bytes_freed < required {
            warn!(
                "Entry {} exceeds the {} byte ceiling even after evicting everything else",
                backing_key, ceiling
            );
        }
    }

    // == Get ==
    /// Retrieves and decodes the value stored under `key`.
    ///
    /// Returns None when the key is absent, expired, corrupted, or holds a
    /// value that does not deserialize into `T`. Expired and corrupted entries
    /// are removed.
    pub fn get_item<T: DeserializeOwned>(&mut self, key: &str) -> Option<T> {
        match self.try_get(key) {
            Ok(value) => value,
            Err(e) => {
                debug!("Read of {} failed: {}", key, e);
                None
            }
        }
    }

    /// Retrieves the raw structured value stored under `key`.
    pub fn get_value(&mut self, key: &str) -> Option<Value> {
        self.get_item(key)
    }

    /// Fallible form of [`get_item`](Self::get_item).
    ///
    /// `Ok(None)` means absent or expired. Corruption errors have already
    /// purged the key when they are returned. A type mismatch leaves the entry
    /// in place.
    pub fn try_get<T: DeserializeOwned>(&mut self, key: &str) -> Result<Option<T>> {
        let Some(value) = self.try_get_value(key)? else {
            return Ok(None);
        };
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| StoreError::Decode(format!("Value for {} has unexpected shape: {}", key, e)))
    }

    /// Reads, validates and decodes an entry, purging it on expiry or corruption.
    pub fn try_get_value(&mut self, key: &str) -> Result<Option<Value>> {
        let backing_key = self.namespace.key(key);
        let Some(raw) = self.backend.get_item(&backing_key) else {
            return Ok(None);
        };

        match self.decode_raw(&raw, current_timestamp_ms()) {
            Ok(Some(value)) => Ok(Some(value)),
            Ok(None) => {
                debug!("Entry {} expired, removing", key);
                self.purge(&backing_key);
                Ok(None)
            }
            Err(e) if e.is_corruption() => {
                warn!("Removing corrupted entry {}: {}", key, e);
                self.purge(&backing_key);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Decodes raw backend text; `Ok(None)` when the envelope has expired.
    fn decode_raw(&self, raw: &str, now: u64) -> Result<Option<Value>> {
        let envelope = ItemEnvelope::deserialize(raw)?;
        if envelope.is_expired(now) {
            return Ok(None);
        }
        self.codec
            .decode(&envelope.payload, envelope.is_compressed, &envelope.checksum)
            .map(Some)
    }

    // == Has / Remove / Clear ==
    /// True if `key` holds a valid, unexpired value.
    pub fn has_item(&mut self, key: &str) -> bool {
        self.get_value(key).is_some()
    }

    /// Removes `key`. Removing an absent key is a no-op.
    pub fn remove_item(&mut self, key: &str) {
        let backing_key = self.namespace.key(key);
        self.purge(&backing_key);
    }

    /// Removes every namespaced key, returning how many were removed.
    pub fn clear(&mut self) -> usize {
        let keys = self.namespace.owned_keys(&self.backend);
        let count = keys.len();
        for key in keys {
            self.purge(&key);
        }
        info!("Cleared {} entries", count);
        count
    }

    fn purge(&mut self, backing_key: &str) {
        if let Err(e) = self.backend.remove_item(backing_key) {
            warn!("Failed to remove {}: {}", backing_key, e);
        }
    }

    // == Scan ==
    /// Visits every namespaced key, purging those whose envelope, checksum
    /// or payload fail to decode, and returns the rest.
    fn scan(&mut self) -> Vec<ScannedEntry> {
        let mut entries = Vec::new();

        for backing_key in self.namespace.owned_keys(&self.backend) {
            let Some(raw) = self.backend.get_item(&backing_key) else {
                continue;
            };
            let checked = ItemEnvelope::deserialize(&raw).and_then(|envelope| {
                let value = self.codec.decode(
                    &envelope.payload,
                    envelope.is_compressed,
                    &envelope.checksum,
                )?;
                Ok((envelope, value))
            });

            match checked {
                Ok((envelope, value)) => {
                    let logical_key = self
                        .namespace
                        .logical(&backing_key)
                        .unwrap_or(backing_key.as_str())
                        .to_string();
                    entries.push(ScannedEntry {
                        size: stored_size(&backing_key, &raw),
                        backing_key,
                        logical_key,
                        envelope,
                        value,
                    });
                }
                Err(e) => {
                    warn!("Removing corrupted entry {} found during scan: {}", backing_key, e);
                    self.purge(&backing_key);
                }
            }
        }

        entries
    }

    /// Logical keys holding valid, unexpired entries.
    pub fn keys(&mut self) -> Vec<String> {
        let now = current_timestamp_ms();
        self.scan()
            .into_iter()
            .filter(|entry| !entry.envelope.is_expired(now))
            .map(|entry| entry.logical_key)
            .collect()
    }

    /// Number of namespaced backend keys, without decoding them.
    pub fn len(&self) -> usize {
        self.namespace.owned_keys(&self.backend).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // == Capacity ==
    /// Current footprint in bytes (full scan).
    pub fn current_size(&self) -> u64 {
        self.capacity.current_size(&self.backend)
    }

    /// Current footprint divided by the ceiling.
    pub fn usage_ratio(&self) -> f64 {
        self.capacity.usage_ratio(&self.backend)
    }

    /// Evicts oldest-written entries until `required_bytes` are freed.
    pub fn reclaim(&mut self, required_bytes: u64) -> ReclaimOutcome {
        self.capacity.reclaim(&mut self.backend, required_bytes, None)
    }

    // == Maintenance Operations ==
    /// Removes every expired entry (and any corrupted entry met on the way).
    pub fn purge_expired(&mut self) -> PurgeOutcome {
        let now = current_timestamp_ms();
        let mut outcome = PurgeOutcome::default();

        for entry in self.scan() {
            if entry.envelope.is_expired(now) {
                self.purge(&entry.backing_key);
                outcome.bytes_freed += entry.size;
                outcome.removed.push(entry.logical_key);
            }
        }

        if !outcome.removed.is_empty() {
            debug!(
                "Purged {} expired entries ({} bytes)",
                outcome.removed.len(),
                outcome.bytes_freed
            );
        }
        outcome
    }

    /// Rewrites large entries in place when a smaller encoding exists:
    /// uncompressed payloads are compressed when that pays off, and
    /// compressed payloads no smaller than their plain text are stored plain.
    /// Write time, expiry and checksum presence are preserved.
    pub fn optimize_storage(&mut self) -> OptimizeOutcome {
        let now = current_timestamp_ms();
        let mut outcome = OptimizeOutcome::default();

        for entry in self.scan() {
            if entry.envelope.is_expired(now) || entry.size <= self.large_item_threshold {
                continue;
            }
            let Some((payload, is_compressed)) = self.reencode(&entry.envelope) else {
                continue;
            };

            let rewritten = ItemEnvelope {
                checksum: if entry.envelope.checksum.is_empty() {
                    String::new()
                } else {
                    checksum(&payload)
                },
                payload,
                is_compressed,
                ..entry.envelope
            };
            let raw = match rewritten.serialize() {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("Failed to re-encode {}: {}", entry.backing_key, e);
                    continue;
                }
            };

            let new_size = stored_size(&entry.backing_key, &raw);
            if new_size >= entry.size {
                continue;
            }
            match self.backend.set_item(&entry.backing_key, &raw) {
                Ok(()) => {
                    outcome.recompressed += 1;
                    outcome.bytes_saved += entry.size - new_size;
                }
                Err(e) => warn!("Failed to rewrite {}: {}", entry.backing_key, e),
            }
        }

        outcome
    }

    /// Smaller payload for an envelope, if one exists.
    fn reencode(&self, envelope: &ItemEnvelope) -> Option<(String, bool)> {
        if !envelope.is_compressed {
            return self
                .codec
                .try_compress(&envelope.payload)
                .map(|compressed| (compressed, true));
        }

        let plain = self
            .codec
            .decode_text(&envelope.payload, true, &envelope.checksum)
            .ok()?;
        if plain.len() < envelope.payload.len() {
            Some((plain, false))
        } else {
            None
        }
    }

    // == Stats ==
    /// Classifies every namespaced key; corrupted keys are purged and not counted.
    pub fn get_stats(&mut self) -> StorageStats {
        let now = current_timestamp_ms();
        let mut stats = StorageStats::new();
        for entry in self.scan() {
            stats.record_item(
                entry.size,
                entry.envelope.is_compressed,
                entry.envelope.is_expired(now),
            );
        }
        stats
    }

    /// Health status, usage and recommendations.
    pub fn get_health_report(&mut self) -> HealthReport {
        let stats = self.get_stats();
        HealthReport::from_scan(self.usage_ratio(), &stats)
    }

    // == Export / Import ==
    /// Decodes every valid entry for backup.
    pub fn export_all(&mut self) -> ExportBundle {
        let now = current_timestamp_ms();
        let mut data = BTreeMap::new();

        for entry in self.scan() {
            if !entry.envelope.is_expired(now) {
                data.insert(entry.logical_key, entry.value);
            }
        }

        let stats = self.get_stats();
        info!("Exported {} entries", data.len());
        ExportBundle::new(data, stats)
    }

    /// Writes every entry of `backup`, isolating per-key failures.
    ///
    /// Keys that already hold a valid value are skipped unless
    /// `options.overwrite` is set.
    pub fn import_all(&mut self, backup: &ExportBundle, options: ImportOptions) -> ImportReport {
        let mut report = ImportReport::default();

        if !is_compatible_version(&backup.version) {
            report.errors.push(format!(
                "Unsupported backup version: {}",
                backup.version
            ));
            return report;
        }

        let set_options = SetOptions::default().with_validation(options.validate);
        for (key, value) in &backup.data {
            if !options.overwrite && self.has_item(key) {
                report.skipped.push(key.clone());
                continue;
            }
            match self.try_set(key, value, &set_options) {
                Ok(()) => report.imported.push(key.clone()),
                Err(e) => report.errors.push(format!("{}: {}", key, e)),
            }
        }

        info!(
            "Imported {} entries, skipped {}, {} errors",
            report.imported.len(),
            report.skipped.len(),
            report.errors.len()
        );
        report
    }
}

//! Storage Statistics Module
//!
//! Scan results and the health report derived from them.

use serde::{Deserialize, Serialize};

use crate::storage::{HEALTHY_USAGE, WARNING_USAGE};

// == Storage Stats ==
/// Classification of every namespaced key from a full scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    /// Footprint of all decodable entries in bytes
    pub total_size: u64,
    /// Decodable entries, valid or expired
    pub item_count: usize,
    /// Entries with a compressed payload
    pub compressed_items: usize,
    /// Entries past their expiration
    pub expired_items: usize,
    /// Entries that are neither expired nor corrupt
    pub valid_items: usize,
}

impl StorageStats {
    // == Constructor ==
    /// Creates a new StorageStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one decodable entry.
    pub fn record_item(&mut self, size: u64, compressed: bool, expired: bool) {
        self.total_size += size;
        self.item_count += 1;
        if compressed {
            self.compressed_items += 1;
        }
        if expired {
            self.expired_items += 1;
        } else {
            self.valid_items += 1;
        }
    }

    // == Compression Rate ==
    /// Fraction of entries stored compressed, 0.0 for an empty store.
    pub fn compression_rate(&self) -> f64 {
        if self.item_count == 0 {
            0.0
        } else {
            self.compressed_items as f64 / self.item_count as f64
        }
    }
}

// == Health Status ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

impl HealthStatus {
    /// Status implied by a usage ratio alone.
    pub fn from_usage(ratio: f64) -> Self {
        if ratio < HEALTHY_USAGE {
            HealthStatus::Healthy
        } else if ratio < WARNING_USAGE {
            HealthStatus::Warning
        } else {
            HealthStatus::Critical
        }
    }
}

// == Health Report ==
/// Human-oriented summary of store health.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    /// Usage as a percentage of the ceiling
    pub usage_percent: f64,
    pub recommendations: Vec<String>,
    /// RFC 3339 time the report was generated
    pub generated_at: String,
}

impl HealthReport {
    /// Builds a report from a usage ratio and a fresh scan.
    pub fn from_scan(usage_ratio: f64, stats: &StorageStats) -> Self {
        let mut status = HealthStatus::from_usage(usage_ratio);
        let mut recommendations = Vec::new();

        match status {
            HealthStatus::Critical => recommendations.push(
                "Storage is almost full: export a backup and remove entries that are no longer needed"
                    .to_string(),
            ),
            HealthStatus::Warning => recommendations
                .push("Storage usage is high: consider clearing old entries".to_string()),
            HealthStatus::Healthy => {}
        }

        if stats.expired_items > stats.valid_items && status == HealthStatus::Healthy {
            status = HealthStatus::Warning;
        }
        if stats.expired_items > 0 {
            recommendations.push(format!(
                "{} expired entries can be purged by running maintenance",
                stats.expired_items
            ));
        }
        if usage_ratio >= HEALTHY_USAGE && stats.compression_rate() < 0.5 && stats.item_count > 0 {
            recommendations
                .push("Enable compression for large entries to save space".to_string());
        }

        Self {
            status,
            usage_percent: (usage_ratio * 100.0 * 100.0).round() / 100.0,
            recommendations,
            generated_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

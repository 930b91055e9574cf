//! Configuration Module
//!
//! Handles loading and managing store configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default ceiling: 5 MiB, the usual per-origin browser storage quota.
pub const DEFAULT_MAX_SIZE: u64 = 5 * 1024 * 1024;

/// Store configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Maximum aggregate footprint (envelopes + keys) in bytes
    pub max_size: u64,
    /// Prefix applied to every backing key owned by the store
    pub namespace: String,
    /// Serialized values at or below this size are never compressed
    pub compression_threshold: usize,
    /// Minimum fraction a compressed payload must save to be adopted
    pub min_compression_saving: f64,
    /// Interval between scheduled maintenance passes in seconds
    pub maintenance_interval: u64,
    /// Usage ratio above which a storage-changed signal triggers an emergency pass
    pub emergency_threshold: f64,
    /// Usage ratio above which a scheduled pass re-compresses large entries
    pub optimization_threshold: f64,
    /// Fraction of the ceiling an emergency pass tries to free
    pub emergency_free_fraction: f64,
    /// Stored size above which an entry is a re-compression candidate
    pub large_item_threshold: u64,
    /// File used by the maintenance host binary
    pub data_path: PathBuf,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SMART_STORAGE_MAX_SIZE` - Ceiling in bytes (default: 5 MiB)
    /// - `SMART_STORAGE_NAMESPACE` - Key prefix (default: empty)
    /// - `SMART_STORAGE_COMPRESSION_THRESHOLD` - Bytes (default: 1024)
    /// - `SMART_STORAGE_MIN_COMPRESSION_SAVING` - Fraction (default: 0.1)
    /// - `SMART_STORAGE_MAINTENANCE_INTERVAL` - Seconds (default: 3600)
    /// - `SMART_STORAGE_EMERGENCY_THRESHOLD` - Ratio (default: 0.8)
    /// - `SMART_STORAGE_OPTIMIZATION_THRESHOLD` - Ratio (default: 0.7)
    /// - `SMART_STORAGE_EMERGENCY_FREE_FRACTION` - Fraction (default: 0.3)
    /// - `SMART_STORAGE_LARGE_ITEM_THRESHOLD` - Bytes (default: 10240)
    /// - `SMART_STORAGE_PATH` - Data file for the host (default: smart_storage.json)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_size: env_or("SMART_STORAGE_MAX_SIZE", defaults.max_size),
            namespace: env::var("SMART_STORAGE_NAMESPACE").unwrap_or(defaults.namespace),
            compression_threshold: env_or(
                "SMART_STORAGE_COMPRESSION_THRESHOLD",
                defaults.compression_threshold,
            ),
            min_compression_saving: env_or(
                "SMART_STORAGE_MIN_COMPRESSION_SAVING",
                defaults.min_compression_saving,
            ),
            maintenance_interval: env_or(
                "SMART_STORAGE_MAINTENANCE_INTERVAL",
                defaults.maintenance_interval,
            ),
            emergency_threshold: env_or(
                "SMART_STORAGE_EMERGENCY_THRESHOLD",
                defaults.emergency_threshold,
            ),
            optimization_threshold: env_or(
                "SMART_STORAGE_OPTIMIZATION_THRESHOLD",
                defaults.optimization_threshold,
            ),
            emergency_free_fraction: env_or(
                "SMART_STORAGE_EMERGENCY_FREE_FRACTION",
                defaults.emergency_free_fraction,
            ),
            large_item_threshold: env_or(
                "SMART_STORAGE_LARGE_ITEM_THRESHOLD",
                defaults.large_item_threshold,
            ),
            data_path: env::var("SMART_STORAGE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_path),
        }
    }

    /// Returns the maintenance interval as a Duration.
    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval)
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            namespace: String::new(),
            compression_threshold: 1024,
            min_compression_saving: 0.1,
            maintenance_interval: 3600,
            emergency_threshold: 0.8,
            optimization_threshold: 0.7,
            emergency_free_fraction: 0.3,
            large_item_threshold: 10 * 1024,
            data_path: PathBuf::from("smart_storage.json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.max_size, 5 * 1024 * 1024);
        assert_eq!(config.namespace, "");
        assert_eq!(config.compression_threshold, 1024);
        assert_eq!(config.maintenance_interval(), Duration::from_secs(3600));
        assert_eq!(config.emergency_threshold, 0.8);
        assert_eq!(config.emergency_free_fraction, 0.3);
    }

    #[test]
    fn test_config_from_env_overrides_and_fallbacks() {
        env::set_var("SMART_STORAGE_MAX_SIZE", "2048");
        env::set_var("SMART_STORAGE_NAMESPACE", "tender:");
        env::set_var("SMART_STORAGE_EMERGENCY_THRESHOLD", "not-a-number");

        let config = Config::from_env();
        assert_eq!(config.max_size, 2048);
        assert_eq!(config.namespace, "tender:");
        assert_eq!(config.emergency_threshold, 0.8);

        env::remove_var("SMART_STORAGE_MAX_SIZE");
        env::remove_var("SMART_STORAGE_NAMESPACE");
        env::remove_var("SMART_STORAGE_EMERGENCY_THRESHOLD");
    }
}

//! Smart Storage - A persistent key-value store
//!
//! Provides compressed, checksummed entries with TTL expiration, write-time
//! eviction under a byte ceiling, and background maintenance.

pub mod config;
pub mod error;
pub mod models;
pub mod storage;
pub mod tasks;

pub use config::Config;
pub use error::{Result, StoreError};
pub use models::{ExportBundle, ImportOptions, ImportReport, SetOptions};
pub use storage::{
    FileBackend, HealthReport, HealthStatus, MemoryBackend, SmartStorage, StorageBackend,
    StorageHandle, StorageStats,
};
pub use tasks::{HostSignal, MaintenanceScheduler, MaintenanceSettings, Scheduler, TokioScheduler};

//! Backup documents produced by `export_all` and consumed by `import_all`

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::storage::{StorageStats, FORMAT_VERSION};

/// Snapshot of every valid entry, decoded to its logical value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportBundle {
    /// RFC 3339 export time
    pub timestamp: String,
    /// Envelope format version of the exporting store
    pub version: String,
    /// Logical key to value
    pub data: BTreeMap<String, Value>,
    /// Scan taken at export time
    pub stats: StorageStats,
}

impl ExportBundle {
    /// Creates a bundle stamped with the current time and format version.
    pub fn new(data: BTreeMap<String, Value>, stats: StorageStats) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            version: FORMAT_VERSION.to_string(),
            data,
            stats,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Per-key outcome of an import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    /// Keys written
    pub imported: Vec<String>,
    /// Keys left untouched because they already held a value
    pub skipped: Vec<String>,
    /// One message per failed key
    pub errors: Vec<String>,
}

impl ImportReport {
    pub fn imported_count(&self) -> usize {
        self.imported.len()
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    /// True when no key failed.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

//! Error types for the storage engine
//!
//! Provides unified error handling using thiserror. The public store API
//! flattens these into `None`/`false`; internal code and tests match on them.

use thiserror::Error;

// == Store Error Enum ==
/// Unified error type for the storage engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Malformed envelope or payload structure
    #[error("Decode error: {0}")]
    Decode(String),

    /// Stored checksum does not match the payload
    #[error("Integrity error: expected checksum {expected}, computed {actual}")]
    Integrity { expected: String, actual: String },

    /// Backend rejected a write even after eviction
    #[error("Capacity error: {0}")]
    Capacity(String),

    /// Backend I/O failure
    #[error("Backend error: {0}")]
    Backend(String),

    /// Key rejected before reaching the backend
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

impl StoreError {
    /// Returns true for errors that mean the stored entry is unusable and must be purged.
    pub fn is_corruption(&self) -> bool {
        matches!(self, StoreError::Decode(_) | StoreError::Integrity { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Decode(err.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

// == Result Type Alias ==
/// Convenience Result type for the storage engine.
pub type Result<T> = std::result::Result<T, StoreError>;

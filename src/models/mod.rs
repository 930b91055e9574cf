//! Option and report models for the store API
//!
//! Explicit structs for the per-call configuration callers pass in and the
//! backup documents the store produces and consumes.

pub mod backup;
pub mod options;

// Re-export commonly used types
pub use backup::{ExportBundle, ImportReport};
pub use options::{ImportOptions, SetOptions};

//! Storage Backend Module
//!
//! The string key/value substrate the store persists envelopes into. The
//! store never assumes exclusive ownership of a backend: other writers may
//! add, change or remove keys between operations.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Result, StoreError};

// == Storage Backend Trait ==
/// A synchronous string key/value store.
pub trait StorageBackend: Send {
    /// Returns the raw text stored under `key`.
    fn get_item(&self, key: &str) -> Option<String>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// Fails with `StoreError::Capacity` when the backend's own quota rejects
    /// the write, or `StoreError::Backend` on I/O failure.
    fn set_item(&mut self, key: &str, value: &str) -> Result<()>;

    /// Removes `key`. Removing an absent key is not an error.
    fn remove_item(&mut self, key: &str) -> Result<()>;

    /// Returns every key currently stored.
    fn keys(&self) -> Vec<String>;

    /// Returns the number of stored keys.
    fn len(&self) -> usize {
        self.keys().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// == Memory Backend ==
/// In-memory backend with an optional hard quota.
///
/// The quota covers keys plus values in bytes, mirroring the absolute limit a
/// browser enforces underneath the store's own ceiling.
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    entries: BTreeMap<String, String>,
    quota: Option<u64>,
}

impl MemoryBackend {
    /// Creates an unbounded backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend that rejects writes past `quota` bytes.
    pub fn with_quota(quota: u64) -> Self {
        Self {
            entries: BTreeMap::new(),
            quota: Some(quota),
        }
    }

    /// Bytes currently used by keys and values.
    pub fn used_bytes(&self) -> u64 {
        self.entries
            .iter()
            .map(|(k, v)| (k.len() + v.len()) as u64)
            .sum()
    }
}

impl StorageBackend for MemoryBackend {
    fn get_item(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set_item(&mut self, key: &str, value: &str) -> Result<()> {
        if let Some(quota) = self.quota {
            let replaced = self
                .entries
                .get(key)
                .map(|old| (key.len() + old.len()) as u64)
                .unwrap_or(0);
            let projected = self.used_bytes() - replaced + (key.len() + value.len()) as u64;
            if projected > quota {
                return Err(StoreError::Capacity(format!(
                    "Write of {} bytes exceeds backend quota of {} bytes",
                    key.len() + value.len(),
                    quota
                )));
            }
        }

        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&mut self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

// == File Backend ==
/// Backend persisted as a single JSON object file.
///
/// The whole map is loaded on open and rewritten atomically (temp file then
/// rename) after every mutation.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl FileBackend {
    /// Opens the backend at `path`.
    ///
    /// A missing file opens empty. A malformed file also opens empty and is
    /// overwritten by the next write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let entries = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            match serde_json::from_str(&raw) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(
                        "Storage file {} is malformed ({}), starting empty",
                        path.display(),
                        e
                    );
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };

        debug!("Opened {} with {} keys", path.display(), entries.len());
        Ok(Self { path, entries })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sibling file the map is written to before being renamed into place.
    fn tmp_path(&self) -> PathBuf {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }

    fn persist(&self) -> Result<()> {
        let raw = serde_json::to_string(&self.entries)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let tmp = self.tmp_path();
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl StorageBackend for FileBackend {
    fn get_item(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set_item(&mut self, key: &str, value: &str) -> Result<()> {
        let previous = self.entries.insert(key.to_string(), value.to_string());
        if let Err(e) = self.persist() {
            // Keep memory consistent with what is on disk.
            match previous {
                Some(old) => self.entries.insert(key.to_string(), old),
                None => self.entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove_item(&mut self, key: &str) -> Result<()> {
        let Some(previous) = self.entries.remove(key) else {
            return Ok(());
        };
        if let Err(e) = self.persist() {
            self.entries.insert(key.to_string(), previous);
            return Err(e);
        }
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_memory_backend_basic_ops() {
        let mut backend = MemoryBackend::new();
        backend.set_item("a", "1").unwrap();
        backend.set_item("b", "2").unwrap();

        assert_eq!(backend.get_item("a"), Some("1".to_string()));
        assert_eq!(backend.keys(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(backend.used_bytes(), 4);

        backend.remove_item("a").unwrap();
        backend.remove_item("a").unwrap();
        assert_eq!(backend.get_item("a"), None);
        assert_eq!(backend.len(), 1);
    }

    #[test]
    fn test_memory_backend_quota() {
        let mut backend = MemoryBackend::with_quota(10);
        backend.set_item("k", "12345").unwrap();

        let result = backend.set_item("x", "123456789");
        assert!(matches!(result, Err(StoreError::Capacity(_))));
        assert_eq!(backend.get_item("x"), None);

        // Replacing an existing key only counts the difference.
        backend.set_item("k", "123456789").unwrap();
        assert_eq!(backend.used_bytes(), 10);
    }

    #[test]
    fn test_file_backend_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");

        {
            let mut backend = FileBackend::open(&path).unwrap();
            assert!(backend.is_empty());
            backend.set_item("a", "1").unwrap();
            backend.set_item("b", "2").unwrap();
            backend.remove_item("b").unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.get_item("a"), Some("1".to_string()));
        assert_eq!(backend.get_item("b"), None);
        assert_eq!(backend.path(), path.as_path());
    }

    #[test]
    fn test_file_backend_malformed_file_opens_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, "not json at all").unwrap();

        let mut backend = FileBackend::open(&path).unwrap();
        assert!(backend.is_empty());

        backend.set_item("a", "1").unwrap();
        let reopened = FileBackend::open(&path).unwrap();
        assert_eq!(reopened.get_item("a"), Some("1".to_string()));
    }

    #[test]
    fn test_file_backend_write_failure_rolls_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("store.json");

        let mut backend = FileBackend::open(&path).unwrap();
        let result = backend.set_item("a", "1");
        assert!(matches!(result, Err(StoreError::Backend(_))));
        assert_eq!(backend.get_item("a"), None);
    }

    #[test]
    fn test_file_backend_remove_failure_rolls_back() {
        let dir = tempdir().unwrap();
        let data_dir = dir.path().join("data");
        fs::create_dir(&data_dir).unwrap();
        let path = data_dir.join("store.json");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.set_item("a", "1").unwrap();
        fs::remove_dir_all(&data_dir).unwrap();

        let result = backend.remove_item("a");
        assert!(matches!(result, Err(StoreError::Backend(_))));
        assert_eq!(backend.get_item("a"), Some("1".to_string()));
    }

    #[test]
    fn test_file_backend_tmp_file_is_a_sibling() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.tmp");

        let mut backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.tmp_path(), dir.path().join("store.tmp.tmp"));

        backend.set_item("a", "1").unwrap();
        assert!(!backend.tmp_path().exists());
        let reopened = FileBackend::open(&path).unwrap();
        assert_eq!(reopened.get_item("a"), Some("1".to_string()));
    }
}

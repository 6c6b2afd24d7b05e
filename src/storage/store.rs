//! Key/value storage consumed by the protocol handler and the executor

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{Id160, StorageKey, StorageStats};
use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

const ENTRY_EXTENSION: &str = "entry";

/// Local value store
pub trait Storage: Send + Sync {
    fn get(&self, key: &StorageKey) -> Option<Bytes>;

    /// Store `value` under `key`, replacing any previous value
    ///
    /// On error nothing has changed.
    fn put(&self, key: StorageKey, value: Bytes) -> StorageResult<()>;

    /// All values stored under `location`, in key order
    fn values_under(&self, location: &Id160) -> Vec<(StorageKey, Bytes)>;

    /// Distinct locations with at least one value
    fn locations(&self) -> Vec<Id160>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedEntry {
    key: StorageKey,
    value: Vec<u8>,
}

/// In-memory store with optional write-through persistence
pub struct MemoryStorage {
    entries: RwLock<BTreeMap<StorageKey, Bytes>>,

    /// Optional persistence path
    persistence_path: Option<PathBuf>,

    /// Suffix source for temporary files
    write_seq: AtomicU64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            persistence_path: None,
            write_seq: AtomicU64::new(0),
        }
    }

    /// Persist every value under `path` and load what is already there
    pub fn with_persistence(mut self, path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;
        self.persistence_path = Some(path);
        self.load_persisted()?;
        Ok(self)
    }

    pub fn stats(&self) -> StorageStats {
        let entries = self.entries.read();

        let mut stats = StorageStats {
            entries: entries.len() as u64,
            ..Default::default()
        };
        let mut last_location = None;

        for (key, value) in entries.iter() {
            stats.bytes += value.len() as u64;
            if last_location != Some(key.location) {
                stats.locations += 1;
                last_location = Some(key.location);
            }
        }

        stats
    }

    fn entry_path(dir: &Path, key: &StorageKey) -> PathBuf {
        dir.join(format!(
            "{}-{}-{}.{}",
            key.location, key.domain, key.content, ENTRY_EXTENSION
        ))
    }

    /// Write the entry to a temporary file and rename it into place
    fn persist_entry(&self, dir: &Path, key: &StorageKey, value: &[u8]) -> StorageResult<()> {
        let entry = PersistedEntry {
            key: *key,
            value: value.to_vec(),
        };
        let data = bincode::serialize(&entry)?;

        let seq = self.write_seq.fetch_add(1, Ordering::Relaxed);
        let tmp_path = dir.join(format!("{}.{}.tmp", key.content, seq));
        std::fs::write(&tmp_path, data)?;

        if let Err(e) = std::fs::rename(&tmp_path, Self::entry_path(dir, key)) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        Ok(())
    }

    /// Load persisted entries on startup
    fn load_persisted(&self) -> StorageResult<()> {
        let Some(ref path) = self.persistence_path else {
            return Ok(());
        };

        let mut entries = self.entries.write();
        for entry in std::fs::read_dir(path)? {
            let file_path = entry?.path();

            match file_path.extension().and_then(|e| e.to_str()) {
                Some(ENTRY_EXTENSION) => {
                    let data = std::fs::read(&file_path)?;
                    let persisted: PersistedEntry =
                        bincode::deserialize(&data).map_err(|e| StorageError::Corrupt {
                            path: file_path.display().to_string(),
                            reason: e.to_string(),
                        })?;
                    entries.insert(persisted.key, Bytes::from(persisted.value));
                }
                // Leftover from an interrupted write
                Some("tmp") => {
                    let _ = std::fs::remove_file(&file_path);
                }
                _ => {}
            }
        }

        tracing::debug!("Loaded {} persisted values from {}", entries.len(), path.display());
        Ok(())
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &StorageKey) -> Option<Bytes> {
        self.entries.read().get(key).cloned()
    }

    fn put(&self, key: StorageKey, value: Bytes) -> StorageResult<()> {
        if let Some(ref path) = self.persistence_path {
            self.persist_entry(path, &key, &value)?;
        }

        self.entries.write().insert(key, value);
        Ok(())
    }

    fn values_under(&self, location: &Id160) -> Vec<(StorageKey, Bytes)> {
        let range = StorageKey::first_under(*location)..=StorageKey::last_under(*location);

        self.entries
            .read()
            .range(range)
            .map(|(key, value)| (*key, value.clone()))
            .collect()
    }

    fn locations(&self) -> Vec<Id160> {
        let mut locations: Vec<Id160> = self.entries.read().keys().map(|k| k.location).collect();
        locations.dedup();
        locations
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

/// Builder for memory storage
pub struct MemoryStorageBuilder {
    persistence_path: Option<PathBuf>,
}

impl MemoryStorageBuilder {
    pub fn new() -> Self {
        Self {
            persistence_path: None,
        }
    }

    pub fn persistence_path(mut self, path: impl AsRef<Path>) -> Self {
        self.persistence_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn build(self) -> StorageResult<MemoryStorage> {
        let storage = MemoryStorage::new();

        if let Some(path) = self.persistence_path {
            storage.with_persistence(path)
        } else {
            Ok(storage)
        }
    }
}

impl Default for MemoryStorageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(location: u64, content: u64) -> StorageKey {
        StorageKey::new(
            Id160::from_u64(location),
            Id160::from_u64(7),
            Id160::from_u64(content),
        )
    }

    #[test]
    fn test_put_and_get() {
        let storage = MemoryStorage::new();
        storage.put(key(1, 1), Bytes::from_static(b"Zurich")).unwrap();

        assert_eq!(storage.get(&key(1, 1)).unwrap(), Bytes::from_static(b"Zurich"));
        assert!(storage.get(&key(1, 2)).is_none());

        storage.put(key(1, 1), Bytes::from_static(b"Geneva")).unwrap();
        assert_eq!(storage.get(&key(1, 1)).unwrap(), Bytes::from_static(b"Geneva"));
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_values_under_location() {
        let storage = MemoryStorage::new();
        storage.put(key(1, 1), Bytes::from_static(b"a")).unwrap();
        storage.put(key(1, 2), Bytes::from_static(b"b")).unwrap();
        storage.put(key(2, 1), Bytes::from_static(b"c")).unwrap();
        storage.put(key(3, 1), Bytes::from_static(b"d")).unwrap();

        let values = storage.values_under(&Id160::from_u64(1));
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].0, key(1, 1));
        assert_eq!(values[1].0, key(1, 2));

        assert!(storage.values_under(&Id160::from_u64(9)).is_empty());
        assert_eq!(
            storage.locations(),
            vec![Id160::from_u64(1), Id160::from_u64(2), Id160::from_u64(3)]
        );

        let stats = storage.stats();
        assert_eq!(stats.entries, 4);
        assert_eq!(stats.locations, 3);
        assert_eq!(stats.bytes, 4);
    }

    #[test]
    fn test_persistence_reload() {
        let dir = tempfile::tempdir().unwrap();

        {
            let storage = MemoryStorageBuilder::new()
                .persistence_path(dir.path())
                .build()
                .unwrap();
            storage.put(key(1, 1), Bytes::from_static(b"Lugano")).unwrap();
            storage.put(key(2, 5), Bytes::from_static(b"AAA")).unwrap();
            storage.put(key(1, 1), Bytes::from_static(b"Lugano2")).unwrap();
        }

        let reopened = MemoryStorageBuilder::new()
            .persistence_path(dir.path())
            .build()
            .unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.get(&key(1, 1)).unwrap(), Bytes::from_static(b"Lugano2"));
        assert_eq!(reopened.get(&key(2, 5)).unwrap(), Bytes::from_static(b"AAA"));
    }

    #[test]
    fn test_failed_write_leaves_no_state() {
        let dir = tempfile::tempdir().unwrap();
        let storage = MemoryStorage::new().with_persistence(dir.path()).unwrap();

        // Directory gone: the write fails and memory stays untouched
        std::fs::remove_dir_all(dir.path()).unwrap();

        assert!(storage.put(key(1, 1), Bytes::from_static(b"x")).is_err());
        assert!(storage.get(&key(1, 1)).is_none());
    }

    #[test]
    fn test_corrupt_entry_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.entry"), b"\x01").unwrap();

        let result = MemoryStorage::new().with_persistence(dir.path());
        assert!(matches!(result, Err(StorageError::Corrupt { .. })));
    }
}

/*!
In-process backup store.
*/

use super::{BackupStore, BlobInfo};
use crate::Result;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::io::{self, Cursor, Read};
use std::sync::{Arc, PoisonError, RwLock};

/// Memory-based backup store
///
/// Stores blobs in a shared map. Clones share the same contents, which makes
/// it convenient for tests and for embedding the engine without a filesystem.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackupStore {
    blobs: Arc<RwLock<BTreeMap<String, Bytes>>>,
}

impl MemoryBackupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw bytes of a stored blob
    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.blobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Replace a blob's bytes in place, bypassing the no-overwrite rule
    ///
    /// Only meant for simulating on-disk corruption.
    pub fn overwrite(&self, key: &str, data: impl Into<Bytes>) {
        self.blobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), data.into());
    }

    pub fn len(&self) -> usize {
        self.blobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BackupStore for MemoryBackupStore {
    fn create(&self, key: &str, body: &mut dyn Read) -> Result<u64> {
        // Read fully before touching the map so a failed stream stores nothing.
        let mut buffer = Vec::new();
        body.read_to_end(&mut buffer)?;
        let size = buffer.len() as u64;

        let mut blobs = self.blobs.write().unwrap_or_else(PoisonError::into_inner);
        if blobs.contains_key(key) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("blob {key} already exists"),
            )
            .into());
        }
        blobs.insert(key.to_string(), Bytes::from(buffer));
        Ok(size)
    }

    fn open(&self, key: &str) -> Result<Box<dyn Read + Send>> {
        let data = self.get(key).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("blob {key} not found"))
        })?;
        Ok(Box::new(Cursor::new(data)))
    }

    fn list(&self) -> Result<Vec<BlobInfo>> {
        Ok(self
            .blobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(key, data)| BlobInfo {
                key: key.clone(),
                size_bytes: data.len() as u64,
            })
            .collect())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.blobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }

    fn exists(&self, key: &str) -> bool {
        self.blobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryBackupStore::new();
        store.create("full_1", &mut &b"abc"[..]).unwrap();

        let mut loaded = Vec::new();
        store.open("full_1").unwrap().read_to_end(&mut loaded).unwrap();
        assert_eq!(loaded, b"abc");
        assert_eq!(store.list().unwrap()[0].size_bytes, 3);

        let shared = store.clone();
        shared.delete("full_1").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_memory_store_rejects_duplicate_keys() {
        let store = MemoryBackupStore::new();
        store.create("full_1", &mut &b"abc"[..]).unwrap();
        assert!(store.create("full_1", &mut &b"def"[..]).is_err());
        assert_eq!(store.get("full_1").unwrap(), Bytes::from_static(b"abc"));
    }
}

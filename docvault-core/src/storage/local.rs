/*!
Local filesystem backup store implementation.
*/

use super::{BackupStore, BlobInfo};
use crate::{Result, VaultError};
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Prefix of in-flight temporary files; never reported by `list`
const PARTIAL_PREFIX: &str = ".docvault-";

/// Local filesystem backup store
///
/// Each blob is a file directly under the base directory. Writes go to a
/// hidden temporary file in the same directory which is renamed into place
/// only once fully written and synced, so a crash mid-write leaves no visible
/// blob behind.
///
/// # Example
/// ```rust
/// use docvault_core::storage::{BackupStore, FsBackupStore};
///
/// let dir = tempfile::tempdir()?;
/// let store = FsBackupStore::new(dir.path());
/// store.create("full_1700000000000", &mut &b"{}"[..])?;
/// assert!(store.exists("full_1700000000000"));
/// # Ok::<(), docvault_core::VaultError>(())
/// ```
#[derive(Debug, Clone)]
pub struct FsBackupStore {
    base_dir: PathBuf,
}

impl FsBackupStore {
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Resolve a key to its file path, rejecting anything outside the flat namespace
    fn resolve_key(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty()
            || key.starts_with('.')
            || key.contains('/')
            || key.contains('\\')
        {
            return Err(VaultError::validation(
                "storage key",
                format!("invalid storage key '{key}'"),
            ));
        }
        Ok(self.base_dir.join(key))
    }

    /// Ensure the base directory exists, creating it if necessary
    fn ensure_base_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            fs::create_dir_all(&self.base_dir).map_err(|e| {
                VaultError::storage(format!(
                    "Failed to create directory {}: {}",
                    self.base_dir.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }
}

impl BackupStore for FsBackupStore {
    fn create(&self, key: &str, body: &mut dyn Read) -> Result<u64> {
        let full_path = self.resolve_key(key)?;
        self.ensure_base_dir()?;

        if full_path.exists() {
            return Err(VaultError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("blob {key} already exists"),
            )));
        }

        let mut partial = tempfile::Builder::new()
            .prefix(PARTIAL_PREFIX)
            .suffix(".partial")
            .tempfile_in(&self.base_dir)?;

        let written = io::copy(body, partial.as_file_mut())?;
        partial.as_file().sync_all()?;

        // Dropping `partial` on any error above removes the temporary file.
        partial.persist_noclobber(&full_path).map_err(|e| VaultError::Io(e.error))?;

        debug!(key = %key, bytes = written, path = %full_path.display(), "Stored blob");
        Ok(written)
    }

    fn open(&self, key: &str) -> Result<Box<dyn Read + Send>> {
        let full_path = self.resolve_key(key)?;
        let file = File::open(&full_path)?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn list(&self) -> Result<Vec<BlobInfo>> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut blobs = Vec::new();
        for entry in fs::read_dir(&self.base_dir)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let key = entry.file_name().to_string_lossy().to_string();
            if key.starts_with('.') {
                continue;
            }
            blobs.push(BlobInfo {
                key,
                size_bytes: metadata.len(),
            });
        }
        blobs.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(blobs)
    }

    fn delete(&self, key: &str) -> Result<()> {
        let full_path = self.resolve_key(key)?;

        if full_path.exists() {
            fs::remove_file(&full_path).map_err(|e| {
                VaultError::storage(format!(
                    "Failed to delete blob {}: {}",
                    full_path.display(),
                    e
                ))
            })?;
        }

        Ok(())
    }

    fn exists(&self, key: &str) -> bool {
        self.resolve_key(key).map(|p| p.is_file()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Reader that yields some bytes and then fails, like a dropped connection
    struct FailingReader {
        sent: bool,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.sent {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "stream cut"));
            }
            self.sent = true;
            buf[..4].copy_from_slice(b"half");
            Ok(4)
        }
    }

    #[test]
    fn test_fs_store_basic_operations() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsBackupStore::new(temp_dir.path().join("backups"));

        let written = store.create("full_1", &mut &b"snapshot data"[..]).unwrap();
        assert_eq!(written, 13);
        assert!(store.exists("full_1"));

        let mut loaded = Vec::new();
        store.open("full_1").unwrap().read_to_end(&mut loaded).unwrap();
        assert_eq!(loaded, b"snapshot data");

        assert_eq!(
            store.list().unwrap(),
            vec![BlobInfo {
                key: "full_1".to_string(),
                size_bytes: 13
            }]
        );

        store.delete("full_1").unwrap();
        assert!(!store.exists("full_1"));
        // Deleting again is not an error
        store.delete("full_1").unwrap();
    }

    #[test]
    fn test_create_refuses_to_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsBackupStore::new(temp_dir.path());

        store.create("full_1", &mut &b"first"[..]).unwrap();
        let result = store.create("full_1", &mut &b"second"[..]);
        assert!(matches!(result, Err(VaultError::Io(ref e)) if e.kind() == io::ErrorKind::AlreadyExists));

        let mut loaded = Vec::new();
        store.open("full_1").unwrap().read_to_end(&mut loaded).unwrap();
        assert_eq!(loaded, b"first");
    }

    #[test]
    fn test_failed_write_leaves_no_blob() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsBackupStore::new(temp_dir.path());

        let result = store.create("full_2", &mut FailingReader { sent: false });
        assert!(result.is_err());
        assert!(!store.exists("full_2"));
        assert!(store.list().unwrap().is_empty());
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_rejects_keys_outside_namespace() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsBackupStore::new(temp_dir.path());

        assert!(store.create("../escape", &mut &b"x"[..]).is_err());
        assert!(store.create(".hidden", &mut &b"x"[..]).is_err());
        assert!(!store.exists("nested/key"));
    }

    #[test]
    fn test_open_missing_blob() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsBackupStore::new(temp_dir.path());
        assert!(matches!(store.open("missing"), Err(VaultError::Io(_))));
        assert!(FsBackupStore::new(temp_dir.path().join("nope")).list().unwrap().is_empty());
    }
}

/*!
Filesystem-backed document store.

Layout: `<root>/<collection>/<document id>.json`, each file holding one
serialized [`DocumentRecord`].
*/

use super::DataSource;
use crate::snapshot::DocumentRecord;
use crate::{Result, VaultError};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const DOCUMENT_EXTENSION: &str = "json";

#[derive(Debug, Clone)]
pub struct FsDataSource {
    root: PathBuf,
}

impl FsDataSource {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Names of all collection directories, sorted
    pub fn collection_names(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if entry.file_type()?.is_dir() && !name.starts_with('.') {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn collection_dir(&self, collection: &str) -> Result<PathBuf> {
        check_path_segment("collection", collection)?;
        Ok(self.root.join(collection))
    }
}

fn check_path_segment(what: &str, segment: &str) -> Result<()> {
    if segment.is_empty()
        || segment.starts_with('.')
        || segment.contains('/')
        || segment.contains('\\')
    {
        return Err(VaultError::source_error(format!(
            "{what} name '{segment}' cannot be stored on disk"
        )));
    }
    Ok(())
}

impl DataSource for FsDataSource {
    fn list_documents(&self, collection: &str) -> Result<Vec<DocumentRecord>> {
        let dir = self.collection_dir(collection)?;
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| {
            VaultError::source_error(format!("Failed to read collection {collection}: {e}"))
        })? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some(DOCUMENT_EXTENSION) {
                paths.push(path);
            }
        }
        paths.sort();

        paths
            .iter()
            .map(|path| -> Result<DocumentRecord> {
                let bytes = fs::read(path)?;
                serde_json::from_slice(&bytes).map_err(|e| {
                    VaultError::source_error(format!(
                        "Malformed document {}: {}",
                        path.display(),
                        e
                    ))
                })
            })
            .collect()
    }

    fn put_document(&self, collection: &str, document: &DocumentRecord) -> Result<()> {
        check_path_segment("document", &document.id)?;
        let dir = self.collection_dir(collection)?;
        fs::create_dir_all(&dir)?;

        let mut staged = tempfile::Builder::new()
            .prefix(".incoming-")
            .tempfile_in(&dir)?;
        serde_json::to_writer(&mut staged, document)?;
        staged.flush()?;

        let target = dir.join(format!("{}.{}", document.id, DOCUMENT_EXTENSION));
        staged.persist(&target).map_err(|e| VaultError::Io(e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::DocumentTimestamps;
    use chrono::Utc;
    use tempfile::TempDir;

    #[test]
    fn test_fs_source_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let source = FsDataSource::new(temp_dir.path());

        let data = serde_json::json!({ "name": "widget" }).as_object().cloned().unwrap();
        let doc = DocumentRecord::new("p-1", data)
            .with_timestamps(DocumentTimestamps::new(Utc::now(), Utc::now()));

        source.put_document("products", &doc).unwrap();
        source.put_document("products", &doc).unwrap();

        assert_eq!(source.list_documents("products").unwrap(), vec![doc]);
        assert_eq!(source.collection_names().unwrap(), vec!["products".to_string()]);
        assert!(source.list_documents("categories").unwrap().is_empty());
    }

    #[test]
    fn test_malformed_document_fails_collection() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("products")).unwrap();
        fs::write(temp_dir.path().join("products/broken.json"), b"{not json").unwrap();

        let source = FsDataSource::new(temp_dir.path());
        let err = source.list_documents("products").unwrap_err();
        assert!(matches!(err, VaultError::Source(_)));
    }

    #[test]
    fn test_rejects_unsafe_ids() {
        let temp_dir = TempDir::new().unwrap();
        let source = FsDataSource::new(temp_dir.path());
        let doc = DocumentRecord::new("../escape", Default::default());
        assert!(source.put_document("products", &doc).is_err());
        assert!(source.list_documents("../etc").is_err());
    }
}

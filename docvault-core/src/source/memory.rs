use super::DataSource;
use crate::snapshot::DocumentRecord;
use crate::Result;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

type Collections = BTreeMap<String, BTreeMap<String, DocumentRecord>>;

/// In-process document store
///
/// Clones share state. Listing a collection that was never written returns
/// an empty list.
#[derive(Debug, Clone, Default)]
pub struct MemoryDataSource {
    collections: Arc<RwLock<Collections>>,
}

impl MemoryDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a document
    pub fn insert<S: Into<String>>(&self, collection: S, document: DocumentRecord) {
        self.collections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(collection.into())
            .or_default()
            .insert(document.id.clone(), document);
    }

    pub fn remove(&self, collection: &str, id: &str) -> Option<DocumentRecord> {
        self.collections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(collection)
            .and_then(|docs| docs.remove(id))
    }

    pub fn get(&self, collection: &str, id: &str) -> Option<DocumentRecord> {
        self.collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(collection)
            .and_then(|docs| docs.get(id).cloned())
    }

    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(collection)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    /// Copy of the entire store, for comparing states
    pub fn dump(&self) -> Collections {
        self.collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        self.collections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl DataSource for MemoryDataSource {
    fn list_documents(&self, collection: &str) -> Result<Vec<DocumentRecord>> {
        Ok(self
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default())
    }

    fn put_document(&self, collection: &str, document: &DocumentRecord) -> Result<()> {
        self.insert(collection, document.clone());
        Ok(())
    }
}

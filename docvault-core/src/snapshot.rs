/*!
In-memory snapshot model.

A [`Snapshot`] is assembled once per backup run, written to the backup store,
and never mutated afterwards. Document payloads are opaque to the engine.
*/

use crate::metadata::SnapshotMetadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque key/value document body
pub type DocumentData = serde_json::Map<String, serde_json::Value>;

/// Timestamps reported by the data source for a document
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct DocumentTimestamps {
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl DocumentTimestamps {
    pub fn new(created_at: DateTime<Utc>, updated_at: DateTime<Utc>) -> Self {
        Self {
            created_at: Some(created_at),
            updated_at: Some(updated_at),
        }
    }

    /// Most recent known modification time
    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.updated_at.or(self.created_at)
    }
}

/// One document as read from, and replayed into, the data source
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DocumentRecord {
    pub id: String,
    pub data: DocumentData,
    #[serde(default)]
    pub source_timestamps: DocumentTimestamps,
}

impl DocumentRecord {
    pub fn new<S: Into<String>>(id: S, data: DocumentData) -> Self {
        Self {
            id: id.into(),
            data,
            source_timestamps: DocumentTimestamps::default(),
        }
    }

    pub fn with_timestamps(mut self, timestamps: DocumentTimestamps) -> Self {
        self.source_timestamps = timestamps;
        self
    }
}

/// Contents of a single collection inside a snapshot
///
/// A collection whose read failed is kept as a degraded entry: `failure` holds
/// the error message, and it carries no documents.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CollectionSnapshot {
    pub name: String,
    pub document_count: usize,
    pub documents: Vec<DocumentRecord>,
    pub failure: Option<String>,
}

impl CollectionSnapshot {
    /// A successfully captured collection
    pub fn captured<S: Into<String>>(name: S, documents: Vec<DocumentRecord>) -> Self {
        Self {
            name: name.into(),
            document_count: documents.len(),
            documents,
            failure: None,
        }
    }

    /// A collection whose read failed
    pub fn degraded<S: Into<String>, E: Into<String>>(name: S, failure: E) -> Self {
        Self {
            name: name.into(),
            document_count: 0,
            documents: Vec::new(),
            failure: Some(failure.into()),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.failure.is_some()
    }
}

/// Complete representation of one backup's data and metadata
///
/// Collections keep the order in which they were configured. Names are
/// unique; the integrity validator re-checks this for deserialized snapshots.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub metadata: SnapshotMetadata,
    pub collections: Vec<CollectionSnapshot>,
}

impl Snapshot {
    pub fn new(metadata: SnapshotMetadata, collections: Vec<CollectionSnapshot>) -> Self {
        Self {
            metadata,
            collections,
        }
    }

    /// Look up a collection by name
    pub fn collection(&self, name: &str) -> Option<&CollectionSnapshot> {
        self.collections.iter().find(|c| c.name == name)
    }

    pub fn collection_names(&self) -> impl Iterator<Item = &str> {
        self.collections.iter().map(|c| c.name.as_str())
    }

    /// Collections whose read failed during the build
    pub fn degraded_collections(&self) -> impl Iterator<Item = &CollectionSnapshot> {
        self.collections.iter().filter(|c| c.is_degraded())
    }

    pub fn total_documents(&self) -> usize {
        self.collections.iter().map(|c| c.documents.len()).sum()
    }
}

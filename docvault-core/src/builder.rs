/*!
Snapshot assembly.

The builder reads every requested collection from the data source and packs
the results into a [`Snapshot`]. A collection that cannot be read becomes a
degraded entry instead of failing the build.
*/

use crate::config::CollectionSpec;
use crate::metadata::SnapshotMetadata;
use crate::snapshot::{CollectionSnapshot, DocumentRecord, Snapshot};
use crate::source::DataSource;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct SnapshotBuilder {
    source: Arc<dyn DataSource>,
    parallel: bool,
}

impl SnapshotBuilder {
    pub fn new(source: Arc<dyn DataSource>) -> Self {
        Self {
            source,
            parallel: true,
        }
    }

    /// Read collections one after another instead of on the rayon pool
    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }

    pub fn with_parallelism(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Capture `collections` in the given order
    ///
    /// Each collection with a cutoff in `metadata` is filtered through its
    /// change detector; the rest are captured in full.
    pub fn build(&self, metadata: SnapshotMetadata, collections: &[CollectionSpec]) -> Snapshot {
        let captured: Vec<CollectionSnapshot> = if self.parallel {
            collections
                .par_iter()
                .map(|spec| self.capture(spec, metadata.since_for(&spec.name)))
                .collect()
        } else {
            collections
                .iter()
                .map(|spec| self.capture(spec, metadata.since_for(&spec.name)))
                .collect()
        };

        Snapshot::new(metadata, captured)
    }

    fn capture(&self, spec: &CollectionSpec, since: Option<DateTime<Utc>>) -> CollectionSnapshot {
        let documents = match self.source.list_documents(&spec.name) {
            Ok(documents) => documents,
            Err(e) => {
                warn!(collection = %spec.name, error = %e, "Failed to read collection; recording it as degraded");
                return CollectionSnapshot::degraded(&spec.name, e.to_string());
            }
        };

        let listed = documents.len();
        let documents: Vec<DocumentRecord> = match since {
            Some(since) => {
                let detector = spec.detector();
                documents
                    .into_iter()
                    .filter(|doc| detector.changed_since(doc, since))
                    .collect()
            }
            None => documents,
        };

        debug!(
            collection = %spec.name,
            listed,
            captured = documents.len(),
            "Captured collection"
        );
        CollectionSnapshot::captured(&spec.name, documents)
    }
}

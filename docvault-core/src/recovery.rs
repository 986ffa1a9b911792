/*!
Recovery orchestration.

A recovery loads one snapshot, validates it unless forced, and replays each
collection into the data source with overwrite semantics, so replaying the
same snapshot twice leaves the same end state. Nothing is written when the
snapshot cannot be loaded or fails validation.

Per-collection outcomes never abort the run:
- degraded collections and collections missing from the snapshot are skipped
- a write error marks that collection failed and the run continues
*/

use crate::clock::Clock;
use crate::codec::StorageCodec;
use crate::observability;
use crate::records::{
    CollectionRecovery, CollectionRestoreStatus, RecoveryRecord, RecoveryStatus,
};
use crate::registry::{BackupRegistry, OperationKind};
use crate::snapshot::CollectionSnapshot;
use crate::source::DataSource;
use crate::validator::IntegrityValidator;
use crate::{Result, VaultError};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct RecoveryOptions {
    /// Count what would be restored without writing anything
    pub dry_run: bool,
    /// Restore only these collections
    pub collections: Option<Vec<String>>,
    /// Skip integrity validation
    pub force: bool,
    pub requested_by: Option<String>,
}

impl RecoveryOptions {
    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            ..Self::default()
        }
    }

    pub fn with_collections<I, S>(mut self, collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.collections = Some(collections.into_iter().map(Into::into).collect());
        self
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn requested_by<S: Into<String>>(mut self, who: S) -> Self {
        self.requested_by = Some(who.into());
        self
    }
}

pub struct RecoveryCoordinator {
    source: Arc<dyn DataSource>,
    codec: Arc<StorageCodec>,
    registry: Arc<BackupRegistry>,
    clock: Arc<dyn Clock>,
    validator: IntegrityValidator,
    parallel: bool,
}

impl RecoveryCoordinator {
    pub fn new(
        source: Arc<dyn DataSource>,
        codec: Arc<StorageCodec>,
        registry: Arc<BackupRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            codec,
            registry,
            clock,
            validator: IntegrityValidator::new(),
            parallel: true,
        }
    }

    pub fn with_parallelism(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Restore the backup `backup_id` into the data source
    ///
    /// # Errors
    /// * `VaultError::Conflict` - If another operation holds the slot
    /// * `VaultError::NotFound` - If no backup with this id is registered
    /// * `VaultError::RecoveryFailed` - If the snapshot could not be loaded
    /// * `VaultError::Validation` - If the snapshot failed integrity checks
    pub fn recover(&self, backup_id: &str, options: &RecoveryOptions) -> Result<RecoveryRecord> {
        let guard = self.registry.try_begin(OperationKind::Recovery)?;
        let record = self
            .registry
            .find_backup(backup_id)
            .ok_or_else(|| VaultError::NotFound(backup_id.to_string()))?;

        let recovery_id = Uuid::new_v4().to_string();
        let started_at = self.clock.now();
        let started = Instant::now();
        info!(
            recovery_id = %recovery_id,
            backup_id = %record.id,
            dry_run = options.dry_run,
            requested_by = options.requested_by.as_deref().unwrap_or("unknown"),
            "Starting recovery"
        );

        let (snapshot, digest) = match self.codec.read_with_digest(&record.storage_key) {
            Ok(loaded) => loaded,
            Err(e) => {
                self.registry.record_recovery_failure(&guard);
                observability::record_recovery(true, 0);
                error!(recovery_id = %recovery_id, backup_id = %record.id, error = %e, "Failed to load snapshot");
                return Err(VaultError::RecoveryFailed {
                    recovery_id,
                    backup_id: record.id,
                    source: Box::new(e),
                });
            }
        };

        let validation = self.validator.validate_stored(&snapshot, &record, &digest);
        if !validation.valid {
            if options.force {
                warn!(
                    recovery_id = %recovery_id,
                    issues = %validation.issues.join("; "),
                    "Restoring from a snapshot that failed validation"
                );
            } else {
                self.registry.record_recovery_failure(&guard);
                observability::record_recovery(true, 0);
                error!(recovery_id = %recovery_id, backup_id = %record.id, "Snapshot failed validation");
                return Err(VaultError::Validation {
                    target: record.id,
                    issues: validation.issues,
                });
            }
        }

        let targets = select_targets(&snapshot.collections, options.collections.as_deref());
        let restore = |(name, collection): &(String, Option<&CollectionSnapshot>)| {
            (name.clone(), self.restore_collection(name, *collection, options.dry_run))
        };
        let outcomes: Vec<(String, CollectionRecovery)> = if self.parallel {
            targets.par_iter().map(restore).collect()
        } else {
            targets.iter().map(restore).collect()
        };

        let total_documents_restored: usize = outcomes.iter().map(|(_, o)| o.restored_count).sum();
        let status = if outcomes
            .iter()
            .all(|(_, o)| o.status == CollectionRestoreStatus::Success)
        {
            RecoveryStatus::Completed
        } else {
            RecoveryStatus::Partial
        };

        let recovery = RecoveryRecord {
            id: recovery_id,
            backup_id: record.id,
            started_at,
            per_collection: outcomes.into_iter().collect::<BTreeMap<_, _>>(),
            total_documents_restored,
            status,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            dry_run: options.dry_run,
            requested_by: options.requested_by.clone(),
        };
        self.registry.record_recovery(&guard, recovery.clone());
        observability::record_recovery(false, if recovery.dry_run { 0 } else { total_documents_restored });

        info!(
            recovery_id = %recovery.id,
            backup_id = %recovery.backup_id,
            status = ?recovery.status,
            documents = recovery.total_documents_restored,
            duration_ms = recovery.duration_ms,
            "Recovery finished"
        );
        Ok(recovery)
    }

    fn restore_collection(
        &self,
        name: &str,
        collection: Option<&CollectionSnapshot>,
        dry_run: bool,
    ) -> CollectionRecovery {
        let Some(collection) = collection else {
            warn!(collection = %name, "Requested collection is not part of this backup");
            return CollectionRecovery::skipped("collection is not part of this backup");
        };
        if let Some(failure) = &collection.failure {
            warn!(collection = %name, failure = %failure, "Skipping collection degraded at backup time");
            return CollectionRecovery::skipped(format!("degraded at backup time: {failure}"));
        }
        if dry_run {
            return CollectionRecovery::success(collection.documents.len());
        }

        let mut restored = 0;
        for document in &collection.documents {
            if let Err(e) = self.source.put_document(name, document) {
                warn!(
                    collection = %name,
                    document_id = %document.id,
                    restored,
                    error = %e,
                    "Failed to restore collection"
                );
                return CollectionRecovery::failed(restored, e.to_string());
            }
            restored += 1;
        }
        CollectionRecovery::success(restored)
    }
}

/// Collections to restore, paired with their snapshot entry when present
fn select_targets<'a>(
    collections: &'a [CollectionSnapshot],
    requested: Option<&[String]>,
) -> Vec<(String, Option<&'a CollectionSnapshot>)> {
    match requested {
        None => collections.iter().map(|c| (c.name.clone(), Some(c))).collect(),
        Some(names) => {
            let mut seen = HashSet::new();
            names
                .iter()
                .filter(|name| seen.insert(name.as_str()))
                .map(|name| (name.clone(), collections.iter().find(|c| &c.name == name)))
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::metadata::{BackupKind, SnapshotMetadata};
    use crate::records::{BackupRecord, BackupStatus};
    use crate::snapshot::{DocumentRecord, Snapshot};
    use crate::source::{MemoryDataSource, MockDataSource};
    use crate::storage::MemoryBackupStore;
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn doc(id: &str) -> DocumentRecord {
        DocumentRecord::new(id, Default::default())
    }

    struct Fixture {
        store: MemoryBackupStore,
        registry: Arc<BackupRegistry>,
        codec: Arc<StorageCodec>,
    }

    /// Stores `snapshot` and registers it the way a completed backup would
    fn stored(snapshot: Snapshot) -> Fixture {
        let store = MemoryBackupStore::new();
        let codec = Arc::new(StorageCodec::new(Arc::new(store.clone())));
        let registry = Arc::new(BackupRegistry::new());

        let written = codec.write(&snapshot, true).unwrap();
        let guard = registry.try_begin(OperationKind::Maintenance).unwrap();
        registry.record_backup(
            &guard,
            BackupRecord {
                id: snapshot.metadata.id.clone(),
                kind: snapshot.metadata.kind,
                created_at: snapshot.metadata.created_at,
                storage_key: written.key,
                size_bytes: written.digest.size_bytes,
                checksum: written.digest.checksum,
                collection_names: snapshot.collection_names().map(str::to_string).collect::<BTreeSet<_>>(),
                status: BackupStatus::Completed,
                duration_ms: 1,
                based_on_id: None,
                degraded_collections: BTreeSet::new(),
                depends_on: BTreeSet::new(),
            },
        );
        drop(guard);

        Fixture {
            store,
            registry,
            codec,
        }
    }

    fn sample() -> Snapshot {
        Snapshot::new(
            SnapshotMetadata::new("full_1", BackupKind::Full, Utc::now()),
            vec![
                CollectionSnapshot::captured("products", vec![doc("p1"), doc("p2"), doc("p3")]),
                CollectionSnapshot::degraded("categories", "connection refused"),
            ],
        )
    }

    fn coordinator(f: &Fixture, source: Arc<dyn DataSource>) -> RecoveryCoordinator {
        RecoveryCoordinator::new(source, f.codec.clone(), f.registry.clone(), Arc::new(SystemClock))
            .with_parallelism(false)
    }

    #[test]
    fn test_degraded_collection_makes_recovery_partial() {
        let f = stored(sample());
        let target = MemoryDataSource::new();

        let record = coordinator(&f, Arc::new(target.clone()))
            .recover("full_1", &RecoveryOptions::default().requested_by("ops"))
            .unwrap();

        assert_eq!(record.status, RecoveryStatus::Partial);
        assert_eq!(record.total_documents_restored, 3);
        assert_eq!(record.per_collection["products"].status, CollectionRestoreStatus::Success);
        assert_eq!(record.per_collection["categories"].status, CollectionRestoreStatus::Skipped);
        assert_eq!(record.requested_by.as_deref(), Some("ops"));
        assert_eq!(target.count("products"), 3);
        assert_eq!(target.count("categories"), 0);
        assert_eq!(f.registry.counters().successful_recoveries, 1);
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let f = stored(sample());
        let mut source = MockDataSource::new();
        source.expect_put_document().never();

        let record = coordinator(&f, Arc::new(source))
            .recover("full_1", &RecoveryOptions::dry_run())
            .unwrap();
        assert!(record.dry_run);
        assert_eq!(record.total_documents_restored, 3);
    }

    #[test]
    fn test_write_failure_marks_collection_failed() {
        let f = stored(sample());
        let mut source = MockDataSource::new();
        source
            .expect_put_document()
            .returning(|_, document| {
                if document.id == "p2" {
                    Err(VaultError::source_error("write rejected"))
                } else {
                    Ok(())
                }
            });

        let record = coordinator(&f, Arc::new(source))
            .recover("full_1", &RecoveryOptions::default().with_collections(["products"]))
            .unwrap();

        let products = &record.per_collection["products"];
        assert_eq!(products.status, CollectionRestoreStatus::Failed);
        assert_eq!(products.restored_count, 1);
        assert!(products.error.as_deref().unwrap().contains("write rejected"));
        assert_eq!(record.status, RecoveryStatus::Partial);
        assert_eq!(record.errors().len(), 1);
    }

    #[test]
    fn test_missing_requested_collection_is_skipped() {
        let f = stored(sample());
        let record = coordinator(&f, Arc::new(MemoryDataSource::new()))
            .recover("full_1", &RecoveryOptions::default().with_collections(["users"]))
            .unwrap();

        assert_eq!(record.per_collection.len(), 1);
        assert_eq!(record.per_collection["users"].status, CollectionRestoreStatus::Skipped);
        assert_eq!(record.total_documents_restored, 0);
    }

    #[test]
    fn test_unknown_backup_is_not_found() {
        let f = stored(sample());
        let err = coordinator(&f, Arc::new(MemoryDataSource::new()))
            .recover("full_404", &RecoveryOptions::default())
            .unwrap_err();
        assert!(matches!(err, VaultError::NotFound(_)));
        assert_eq!(f.registry.in_progress(), None);
    }

    #[test]
    fn test_invalid_snapshot_aborts_before_writes() {
        let mut snapshot = sample();
        snapshot.collections[0].document_count = 99;
        let f = stored(snapshot);
        let target = MemoryDataSource::new();

        let err = coordinator(&f, Arc::new(target.clone()))
            .recover("full_1", &RecoveryOptions::default())
            .unwrap_err();
        assert!(matches!(err, VaultError::Validation { .. }));
        assert_eq!(target.count("products"), 0);
        assert_eq!(f.registry.counters().failed_recoveries, 1);

        let forced = coordinator(&f, Arc::new(target.clone()))
            .recover("full_1", &RecoveryOptions::default().forced())
            .unwrap();
        assert_eq!(forced.total_documents_restored, 3);
    }

    #[test]
    fn test_unreadable_blob_is_recovery_failure() {
        let f = stored(sample());
        let key = f.registry.find_backup("full_1").unwrap().storage_key;
        f.store.overwrite(&key, &b"garbage"[..]);

        let err = coordinator(&f, Arc::new(MemoryDataSource::new()))
            .recover("full_1", &RecoveryOptions::default())
            .unwrap_err();
        match err {
            VaultError::RecoveryFailed { backup_id, source, .. } => {
                assert_eq!(backup_id, "full_1");
                assert!(matches!(*source, VaultError::CorruptSnapshot { .. }));
            }
            other => panic!("Expected RecoveryFailed, got {other:?}"),
        }
        assert_eq!(f.registry.counters().failed_recoveries, 1);
    }
}

/*!
Backup orchestration.

[`BackupCoordinator::create_backup`] claims the operation slot, captures the
configured collections, writes the snapshot through the codec and records the
result in the registry. The slot is released on every exit path when the
guard drops.
*/

use crate::builder::SnapshotBuilder;
use crate::clock::Clock;
use crate::codec::StorageCodec;
use crate::config::{CollectionSpec, EngineConfig};
use crate::metadata::{BackupKind, SnapshotMetadata, SNAPSHOT_SCHEMA_VERSION};
use crate::observability;
use crate::records::{BackupRecord, BackupStatus};
use crate::registry::{BackupRegistry, OperationKind};
use crate::retention::{RetentionManager, RetentionPolicy};
use crate::source::DataSource;
use crate::{Result, VaultError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Per-run backup settings
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct BackupOptions {
    pub compress: bool,
    /// Apply the retention policy after a successful backup
    pub auto_cleanup: bool,
    /// Restrict the run to these configured collections
    pub collections: Option<Vec<String>>,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            compress: true,
            auto_cleanup: false,
            collections: None,
        }
    }
}

impl BackupOptions {
    /// Options carrying the configured defaults
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            compress: config.compress,
            auto_cleanup: config.auto_cleanup,
            collections: None,
        }
    }

    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn with_auto_cleanup(mut self, auto_cleanup: bool) -> Self {
        self.auto_cleanup = auto_cleanup;
        self
    }

    pub fn with_collections<I, S>(mut self, collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.collections = Some(collections.into_iter().map(Into::into).collect());
        self
    }
}

pub struct BackupCoordinator {
    collections: Vec<CollectionSpec>,
    builder: SnapshotBuilder,
    codec: Arc<StorageCodec>,
    registry: Arc<BackupRegistry>,
    retention: Arc<RetentionManager>,
    retention_policy: RetentionPolicy,
    clock: Arc<dyn Clock>,
    schema_version: String,
    environment: String,
}

impl BackupCoordinator {
    pub fn new(
        collections: Vec<CollectionSpec>,
        source: Arc<dyn DataSource>,
        codec: Arc<StorageCodec>,
        registry: Arc<BackupRegistry>,
        retention: Arc<RetentionManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            collections,
            builder: SnapshotBuilder::new(source),
            codec,
            registry,
            retention,
            retention_policy: RetentionPolicy::default(),
            clock,
            schema_version: SNAPSHOT_SCHEMA_VERSION.to_string(),
            environment: "development".to_string(),
        }
    }

    pub fn with_retention_policy(mut self, policy: RetentionPolicy) -> Self {
        self.retention_policy = policy;
        self
    }

    pub fn with_environment<S: Into<String>>(mut self, environment: S) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn with_schema_version<S: Into<String>>(mut self, schema_version: S) -> Self {
        self.schema_version = schema_version.into();
        self
    }

    pub fn with_parallelism(mut self, parallel: bool) -> Self {
        self.builder = self.builder.with_parallelism(parallel);
        self
    }

    /// Create a backup of the configured collections
    ///
    /// An incremental backup without a baseline runs as a full backup.
    ///
    /// # Errors
    /// * `VaultError::Validation` - If `options` names an unknown collection
    /// * `VaultError::Conflict` - If another operation holds the slot
    /// * `VaultError::BackupFailed` - If the snapshot could not be stored; the
    ///   failure is counted before the error is returned
    pub fn create_backup(&self, requested: BackupKind, options: &BackupOptions) -> Result<BackupRecord> {
        let collections = self.select_collections(options.collections.as_deref())?;
        let guard = self.registry.try_begin(OperationKind::Backup(requested))?;
        let started = Instant::now();

        let baselines = match requested {
            BackupKind::Incremental => self.collection_baselines(&collections),
            BackupKind::Full => BTreeMap::new(),
        };
        let kind = if requested == BackupKind::Incremental && baselines.is_empty() {
            info!("No earlier backup captured any selected collection; running a full backup instead");
            BackupKind::Full
        } else {
            requested
        };

        let (backup_id, created_at) = self.unique_id(kind, self.clock.now());
        let mut metadata = SnapshotMetadata::new(&backup_id, kind, created_at)
            .with_schema_version(&self.schema_version)
            .with_environment(&self.environment);
        if let Some(newest) = baselines.values().max_by_key(|base| base.created_at) {
            metadata = metadata.with_baseline(&newest.id, newest.created_at);
        }
        for spec in &collections {
            match baselines.get(&spec.name) {
                Some(base) => {
                    metadata = metadata.with_collection_baseline(&spec.name, &base.id, base.created_at);
                }
                None if kind == BackupKind::Incremental => {
                    info!(
                        backup_id = %backup_id,
                        collection = %spec.name,
                        "No earlier backup holds this collection; capturing it in full"
                    );
                }
                None => {}
            }
        }
        let based_on_id = metadata.based_on_id.clone();
        let depends_on = metadata.depends_on();

        info!(backup_id = %backup_id, kind = %kind, collections = collections.len(), "Starting backup");
        let snapshot = self.builder.build(metadata, &collections);

        let written = match self.codec.write(&snapshot, options.compress) {
            Ok(written) => written,
            Err(e) => {
                self.registry.record_backup_failure(&guard);
                observability::record_backup(kind, false, started.elapsed(), 0);
                error!(backup_id = %backup_id, error = %e, "Backup failed");
                return Err(VaultError::BackupFailed {
                    backup_id,
                    collections_captured: snapshot.collections.len()
                        - snapshot.degraded_collections().count(),
                    source: Box::new(e),
                });
            }
        };

        let elapsed = started.elapsed();
        let record = BackupRecord {
            id: backup_id,
            kind,
            created_at,
            storage_key: written.key,
            size_bytes: written.digest.size_bytes,
            checksum: written.digest.checksum,
            collection_names: snapshot.collection_names().map(str::to_string).collect::<BTreeSet<_>>(),
            status: BackupStatus::Completed,
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            based_on_id,
            degraded_collections: snapshot
                .degraded_collections()
                .map(|c| c.name.clone())
                .collect(),
            depends_on,
        };
        self.registry.record_backup(&guard, record.clone());
        observability::record_backup(kind, true, elapsed, record.size_bytes);

        info!(
            backup_id = %record.id,
            key = %record.storage_key,
            size_bytes = record.size_bytes,
            documents = snapshot.total_documents(),
            degraded = snapshot.degraded_collections().count(),
            duration_ms = record.duration_ms,
            "Backup completed"
        );

        if options.auto_cleanup {
            let report = self.retention.cleanup_with(&guard, &self.retention_policy);
            info!(
                deleted = report.deleted.len(),
                failed = report.failed.len(),
                "Post-backup retention cleanup finished"
            );
        }

        Ok(record)
    }

    fn select_collections(&self, requested: Option<&[String]>) -> Result<Vec<CollectionSpec>> {
        let Some(requested) = requested else {
            return Ok(self.collections.clone());
        };

        let mut issues = Vec::new();
        let mut seen = HashSet::new();
        let mut selected = Vec::new();
        for name in requested {
            if !seen.insert(name.as_str()) {
                continue;
            }
            match self.collections.iter().find(|spec| &spec.name == name) {
                Some(spec) => selected.push(spec.clone()),
                None => issues.push(format!("collection {name} is not configured")),
            }
        }
        if selected.is_empty() && issues.is_empty() {
            issues.push("no collections selected".to_string());
        }

        if issues.is_empty() {
            Ok(selected)
        } else {
            Err(VaultError::Validation {
                target: "backup options".to_string(),
                issues,
            })
        }
    }

    /// For each collection, the newest backup that captured it without degradation
    fn collection_baselines(&self, collections: &[CollectionSpec]) -> BTreeMap<String, BackupRecord> {
        let history = self.registry.backups();
        collections
            .iter()
            .filter_map(|spec| {
                history
                    .iter()
                    .find(|record| record.captured(&spec.name))
                    .map(|record| (spec.name.clone(), record.clone()))
            })
            .collect()
    }

    /// `<kind>_<epochMillis>`, bumped past any id already in use
    fn unique_id(&self, kind: BackupKind, now: DateTime<Utc>) -> (String, DateTime<Utc>) {
        let mut created_at = now;
        loop {
            let id = format!("{}_{}", kind.as_str(), created_at.timestamp_millis());
            let taken = self.registry.contains_backup(&id)
                || self.codec.store().exists(&StorageCodec::storage_key(&id, true))
                || self.codec.store().exists(&StorageCodec::storage_key(&id, false));
            if !taken {
                return (id, created_at);
            }
            created_at += Duration::milliseconds(1);
        }
    }
}

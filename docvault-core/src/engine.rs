/*!
The `BackupEngine` facade.

One engine owns one registry and the coordinators that share it. This is the
operational surface that outer layers (the CLI, a service) talk to.

## Usage

```rust
use docvault_core::{
    BackupEngine, BackupKind, DocumentRecord, EngineConfig, MemoryBackupStore,
    MemoryDataSource, RecoveryOptions, StorageConfig,
};
use std::sync::Arc;

let source = MemoryDataSource::new();
source.insert("products", DocumentRecord::new("p-1", Default::default()));

let config = EngineConfig::with_collection_names(["products"]).with_storage(StorageConfig::memory());
let engine = BackupEngine::new(config, Arc::new(source), Arc::new(MemoryBackupStore::new()))?;

let backup = engine.create_backup(BackupKind::Full, &engine.backup_options())?;
let recovery = engine.recover(&backup.id, &RecoveryOptions::dry_run())?;
assert_eq!(recovery.total_documents_restored, 1);
# Ok::<(), docvault_core::VaultError>(())
```
*/

use crate::backup::{BackupCoordinator, BackupOptions};
use crate::clock::{Clock, SystemClock};
use crate::codec::{parse_storage_key, StorageCodec};
use crate::config::EngineConfig;
use crate::metadata::BackupKind;
use crate::records::{BackupRecord, BackupStatus, RecoveryRecord};
use crate::recovery::{RecoveryCoordinator, RecoveryOptions};
use crate::registry::{BackupRegistry, OperationKind, RegistryStatus};
use crate::retention::{RetentionManager, RetentionPolicy, RetentionReport};
use crate::source::DataSource;
use crate::storage::BackupStore;
use crate::validator::{IntegrityValidator, ValidationResult};
use crate::{Result, VaultError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Newest,
    Oldest,
}

/// Selection for [`BackupEngine::list_backups`]
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct BackupFilter {
    pub kind: Option<BackupKind>,
    pub limit: Option<usize>,
    pub sort: SortOrder,
}

impl BackupFilter {
    pub fn kind(mut self, kind: BackupKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn oldest_first(mut self) -> Self {
        self.sort = SortOrder::Oldest;
        self
    }
}

pub struct BackupEngine {
    config: EngineConfig,
    registry: Arc<BackupRegistry>,
    codec: Arc<StorageCodec>,
    retention: Arc<RetentionManager>,
    backups: BackupCoordinator,
    recoveries: RecoveryCoordinator,
    validator: IntegrityValidator,
}

impl BackupEngine {
    pub fn new(
        config: EngineConfig,
        source: Arc<dyn DataSource>,
        store: Arc<dyn BackupStore>,
    ) -> Result<Self> {
        Self::with_clock(config, source, store, Arc::new(SystemClock))
    }

    /// Build an engine whose backup store comes from `config.storage`
    pub fn from_config(config: EngineConfig, source: Arc<dyn DataSource>) -> Result<Self> {
        let store = config.storage.build_store()?;
        Self::new(config, source, store)
    }

    pub fn with_clock(
        config: EngineConfig,
        source: Arc<dyn DataSource>,
        store: Arc<dyn BackupStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(BackupRegistry::with_recovery_history_limit(
            config.max_recovery_history,
        ));
        let codec = Arc::new(StorageCodec::new(store.clone()).with_retry_policy(config.retry.clone()));
        let retention = Arc::new(RetentionManager::new(store, registry.clone(), clock.clone()));

        let backups = BackupCoordinator::new(
            config.collections.clone(),
            source.clone(),
            codec.clone(),
            registry.clone(),
            retention.clone(),
            clock.clone(),
        )
        .with_retention_policy(config.retention.clone())
        .with_schema_version(&config.schema_version)
        .with_environment(&config.environment)
        .with_parallelism(config.parallel_collections);

        let recoveries = RecoveryCoordinator::new(source, codec.clone(), registry.clone(), clock)
            .with_parallelism(config.parallel_collections);

        Ok(Self {
            config,
            registry,
            codec,
            retention,
            backups,
            recoveries,
            validator: IntegrityValidator::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<BackupRegistry> {
        &self.registry
    }

    /// Backup options carrying the configured defaults
    pub fn backup_options(&self) -> BackupOptions {
        BackupOptions::from_config(&self.config)
    }

    pub fn create_backup(&self, kind: BackupKind, options: &BackupOptions) -> Result<BackupRecord> {
        self.backups.create_backup(kind, options)
    }

    pub fn list_backups(&self, filter: &BackupFilter) -> Vec<BackupRecord> {
        let mut backups: Vec<BackupRecord> = self
            .registry
            .backups()
            .into_iter()
            .filter(|record| filter.kind.map(|kind| record.kind == kind).unwrap_or(true))
            .collect();
        if filter.sort == SortOrder::Oldest {
            backups.reverse();
        }
        if let Some(limit) = filter.limit {
            backups.truncate(limit);
        }
        backups
    }

    pub fn status(&self) -> RegistryStatus {
        self.registry.status()
    }

    pub fn recoveries(&self) -> Vec<RecoveryRecord> {
        self.registry.recoveries()
    }

    pub fn recover(&self, backup_id: &str, options: &RecoveryOptions) -> Result<RecoveryRecord> {
        self.recoveries.recover(backup_id, options)
    }

    /// Check a stored backup without restoring it
    ///
    /// An undecodable blob yields an invalid result rather than an error.
    ///
    /// # Errors
    /// * `VaultError::NotFound` - If no backup with this id is registered
    /// * `VaultError::Io` / `VaultError::Storage` - If the blob cannot be read
    pub fn validate_backup(&self, backup_id: &str) -> Result<ValidationResult> {
        let record = self
            .registry
            .find_backup(backup_id)
            .ok_or_else(|| VaultError::NotFound(backup_id.to_string()))?;

        match self.codec.read_with_digest(&record.storage_key) {
            Ok((snapshot, digest)) => Ok(self.validator.validate_stored(&snapshot, &record, &digest)),
            Err(VaultError::CorruptSnapshot { reason, .. }) => {
                let mut result = ValidationResult::default();
                result.add_issue(reason);
                Ok(result)
            }
            Err(e) => Err(e),
        }
    }

    /// Delete one backup's blob and drop it from history
    ///
    /// If it was the recovery baseline, the next most recent backup takes over.
    pub fn delete_backup(&self, backup_id: &str) -> Result<BackupRecord> {
        let guard = self.registry.try_begin(OperationKind::Maintenance)?;
        let record = self
            .registry
            .find_backup(backup_id)
            .ok_or_else(|| VaultError::NotFound(backup_id.to_string()))?;

        let dependents: Vec<String> = self
            .registry
            .backups()
            .into_iter()
            .filter(|other| other.depends_on.contains(&record.id))
            .map(|other| other.id)
            .collect();
        if !dependents.is_empty() {
            warn!(
                backup_id = %record.id,
                dependents = ?dependents,
                "Deleting a backup that newer incrementals build on"
            );
        }

        self.codec.store().delete(&record.storage_key)?;
        self.registry.remove_backup(&guard, &record.id);
        info!(backup_id = %record.id, key = %record.storage_key, "Deleted backup");
        Ok(record)
    }

    pub fn cleanup(&self, policy: &RetentionPolicy) -> Result<RetentionReport> {
        self.retention.cleanup(policy)
    }

    /// Apply the configured retention policy
    pub fn cleanup_with_configured_policy(&self) -> Result<RetentionReport> {
        self.cleanup(&self.config.retention)
    }

    /// Rebuild the backup history from the blobs in the backup store
    ///
    /// Blobs whose key does not follow the naming scheme are ignored; blobs
    /// that cannot be decoded are logged and skipped. Returns the number of
    /// backups registered.
    pub fn rehydrate(&self) -> Result<usize> {
        let guard = self.registry.try_begin(OperationKind::Maintenance)?;

        let mut records = Vec::new();
        for blob in self.codec.store().list()? {
            let Some(parsed) = parse_storage_key(&blob.key) else {
                debug!(key = %blob.key, "Ignoring foreign blob");
                continue;
            };
            let (snapshot, digest) = match self.codec.read_with_digest(&blob.key) {
                Ok(loaded) => loaded,
                Err(e) => {
                    warn!(key = %blob.key, error = %e, "Skipping unreadable backup");
                    continue;
                }
            };
            if snapshot.metadata.id != parsed.backup_id {
                warn!(
                    key = %blob.key,
                    snapshot_id = %snapshot.metadata.id,
                    "Skipping blob whose snapshot id does not match its key"
                );
                continue;
            }

            let depends_on = snapshot.metadata.depends_on();
            let degraded_collections = snapshot
                .degraded_collections()
                .map(|c| c.name.clone())
                .collect();
            records.push(BackupRecord {
                id: parsed.backup_id,
                kind: snapshot.metadata.kind,
                created_at: snapshot.metadata.created_at,
                storage_key: blob.key,
                size_bytes: digest.size_bytes,
                checksum: digest.checksum,
                collection_names: snapshot.collection_names().map(str::to_string).collect(),
                status: BackupStatus::Completed,
                duration_ms: 0,
                based_on_id: snapshot.metadata.based_on_id,
                degraded_collections,
                depends_on,
            });
        }

        let count = records.len();
        self.registry.replace_history(&guard, records);
        info!(backups = count, "Rebuilt backup history from store");
        Ok(count)
    }
}

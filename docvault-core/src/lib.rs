/*!
# Docvault Core Engine

Backup and recovery engine for multi-collection document stores.

This crate snapshots a set of document collections to durable storage, checks
snapshot integrity, restores data from a chosen snapshot and prunes old
snapshots under a retention policy:

- Full and incremental backups with per-collection partial-failure tolerance
- Streaming JSON + gzip snapshot codec with SHA-256 blob digests
- Single-flight coordination of backups, recoveries and maintenance
- Idempotent, auditable recovery with dry-run support
- Count- and age-based retention that never drops the recovery baseline

## Architecture

The core follows a ports-and-adapters layout:
- [`DataSource`] is where documents are read from and restored into
- [`BackupStore`] is where snapshot blobs live
- [`Clock`] supplies timestamps
- The coordinators and the [`BackupEngine`] facade hold the domain logic

## Usage

```rust
use docvault_core::{
    BackupEngine, BackupKind, DocumentRecord, EngineConfig, MemoryBackupStore,
    MemoryDataSource, RecoveryOptions,
};
use std::sync::Arc;

let source = MemoryDataSource::new();
source.insert("products", DocumentRecord::new("p-1", Default::default()));
source.insert("categories", DocumentRecord::new("c-1", Default::default()));

let config = EngineConfig::with_collection_names(["products", "categories"]);
let engine = BackupEngine::new(config, Arc::new(source.clone()), Arc::new(MemoryBackupStore::new()))?;

// Back up, lose data, restore
let backup = engine.create_backup(BackupKind::Full, &engine.backup_options())?;
source.clear();
let recovery = engine.recover(&backup.id, &RecoveryOptions::default())?;

assert_eq!(recovery.total_documents_restored, 2);
assert_eq!(source.count("products"), 1);
# Ok::<(), docvault_core::VaultError>(())
```
*/

pub mod backup;
pub mod builder;
pub mod clock;
pub mod codec;
pub mod compression;
pub mod config;
pub mod engine;
pub mod error;
pub mod metadata;
pub mod observability;
pub mod records;
pub mod recovery;
pub mod registry;
pub mod retention;
pub mod snapshot;
pub mod source;
pub mod storage;
pub mod validator;

pub use backup::{BackupCoordinator, BackupOptions};
pub use builder::SnapshotBuilder;
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{parse_storage_key, BlobDigest, ParsedKey, StorageCodec, WrittenBlob};
pub use compression::{CompressionAdapter, GzipCompressor, NoCompression};
pub use config::{CollectionSpec, EngineConfig, StorageBackend, StorageConfig};
pub use engine::{BackupEngine, BackupFilter, SortOrder};
pub use error::{Result, VaultError};
pub use metadata::{BackupKind, CollectionBaseline, SnapshotMetadata, SNAPSHOT_SCHEMA_VERSION};
pub use observability::{init_observability, init_observability_with};
pub use records::{
    BackupRecord, BackupStatus, CollectionRecovery, CollectionRestoreStatus, RecoveryRecord,
    RecoveryStatus,
};
pub use recovery::{RecoveryCoordinator, RecoveryOptions};
pub use registry::{BackupRegistry, Counters, OperationGuard, OperationKind, RegistryStatus};
pub use retention::{RetentionFailure, RetentionManager, RetentionPolicy, RetentionReport};
pub use snapshot::{CollectionSnapshot, DocumentData, DocumentRecord, DocumentTimestamps, Snapshot};
pub use source::{ChangeDetection, ChangeDetector, DataSource, FsDataSource, MemoryDataSource};
pub use storage::{AsyncBackupStore, BackupStore, BlobInfo, FsBackupStore, MemoryBackupStore};
pub use validator::{IntegrityValidator, ValidationResult};

#[cfg(feature = "async-rt")]
pub use storage::BlockingStore;

#[cfg(feature = "metrics")]
pub use observability::VaultMetrics;

#[cfg(test)]
mod error_tests;

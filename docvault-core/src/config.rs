//! Configuration module for the backup engine
//!
//! This module provides the configuration structures for selecting the backup
//! store, the collections to back up, retention defaults and retry behaviour.
//! Everything is serde-friendly so a deployment can keep it in a JSON file.

use crate::metadata::SNAPSHOT_SCHEMA_VERSION;
use crate::retention::RetentionPolicy;
use crate::source::{ChangeDetection, ChangeDetector};
use crate::storage::{BackupStore, FsBackupStore, MemoryBackupStore};
use crate::{Result, VaultError};
use docvault_retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A collection to include in backups
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub name: String,

    /// Built-in strategy used for incremental backups
    #[serde(default)]
    pub change_detection: ChangeDetection,

    /// Custom predicate; takes precedence over `change_detection`
    #[serde(skip)]
    pub detector: Option<Arc<dyn ChangeDetector>>,
}

impl CollectionSpec {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            change_detection: ChangeDetection::default(),
            detector: None,
        }
    }

    pub fn with_change_detection(mut self, change_detection: ChangeDetection) -> Self {
        self.change_detection = change_detection;
        self
    }

    pub fn with_detector(mut self, detector: Arc<dyn ChangeDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    /// The predicate deciding which documents an incremental backup captures
    pub fn detector(&self) -> &dyn ChangeDetector {
        match &self.detector {
            Some(custom) => custom.as_ref(),
            None => &self.change_detection,
        }
    }
}

/// Enumeration of supported backup store backends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Local filesystem storage
    Local,
    /// Process memory; contents vanish on exit
    Memory,
}

/// Configuration structure for backup store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory holding snapshot blobs (required for the local backend)
    pub local_base_path: Option<PathBuf>,
}

impl StorageConfig {
    /// Create a configuration for local filesystem storage
    pub fn local<P: AsRef<Path>>(base_path: P) -> Self {
        Self {
            backend: StorageBackend::Local,
            local_base_path: Some(base_path.as_ref().to_path_buf()),
        }
    }

    pub fn memory() -> Self {
        Self {
            backend: StorageBackend::Memory,
            local_base_path: None,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        match self.backend {
            StorageBackend::Local => {
                let missing = self
                    .local_base_path
                    .as_ref()
                    .map(|p| p.as_os_str().is_empty())
                    .unwrap_or(true);
                if missing {
                    return Err(VaultError::config(
                        "Local backend requires a base path",
                    ));
                }
            }
            StorageBackend::Memory => {}
        }
        Ok(())
    }

    /// Instantiate the configured backup store
    pub fn build_store(&self) -> Result<Arc<dyn BackupStore>> {
        self.validate()?;
        match (&self.backend, &self.local_base_path) {
            (StorageBackend::Local, Some(path)) => Ok(Arc::new(FsBackupStore::new(path))),
            (StorageBackend::Local, None) => Err(VaultError::config(
                "Local backend requires a base path",
            )),
            (StorageBackend::Memory, _) => Ok(Arc::new(MemoryBackupStore::new())),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::local("./backups")
    }
}

fn default_true() -> bool {
    true
}

fn default_schema_version() -> String {
    SNAPSHOT_SCHEMA_VERSION.to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_max_recovery_history() -> usize {
    100
}

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Collections to back up, in the order they are processed
    pub collections: Vec<CollectionSpec>,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Gzip snapshot blobs
    #[serde(default = "default_true")]
    pub compress: bool,

    /// Run retention cleanup after every successful backup
    #[serde(default)]
    pub auto_cleanup: bool,

    #[serde(default)]
    pub retention: RetentionPolicy,

    #[serde(default = "default_schema_version")]
    pub schema_version: String,

    #[serde(default = "default_environment")]
    pub environment: String,

    /// Read and restore collections concurrently
    #[serde(default = "default_true")]
    pub parallel_collections: bool,

    /// Retry policy for backup store writes
    #[serde(default = "RetryPolicy::local_storage")]
    pub retry: RetryPolicy,

    /// Number of recovery records kept in memory
    #[serde(default = "default_max_recovery_history")]
    pub max_recovery_history: usize,
}

impl EngineConfig {
    pub fn new(collections: Vec<CollectionSpec>) -> Self {
        Self {
            collections,
            storage: StorageConfig::default(),
            compress: true,
            auto_cleanup: false,
            retention: RetentionPolicy::default(),
            schema_version: default_schema_version(),
            environment: default_environment(),
            parallel_collections: true,
            retry: RetryPolicy::local_storage(),
            max_recovery_history: default_max_recovery_history(),
        }
    }

    /// Convenience constructor from plain collection names
    pub fn with_collection_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(names.into_iter().map(CollectionSpec::new).collect())
    }

    pub fn with_storage(mut self, storage: StorageConfig) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    /// Load and validate a JSON configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            VaultError::config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        let config: EngineConfig = serde_json::from_str(&raw).map_err(|e| {
            VaultError::config(format!("Failed to parse config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.collections.is_empty() {
            return Err(VaultError::config("At least one collection must be configured"));
        }

        let mut seen = HashSet::new();
        for spec in &self.collections {
            if spec.name.trim().is_empty() {
                return Err(VaultError::config("Collection names cannot be empty"));
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(VaultError::config(format!(
                    "Collection '{}' is configured more than once",
                    spec.name
                )));
            }
        }

        if self.schema_version.trim().is_empty() {
            return Err(VaultError::config("schema_version cannot be empty"));
        }

        self.storage.validate()
    }
}

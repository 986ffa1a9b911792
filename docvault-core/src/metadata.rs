/*!
Snapshot metadata and backup kinds.
*/

use crate::{Result, VaultError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Schema version written into every new snapshot
pub const SNAPSHOT_SCHEMA_VERSION: &str = "1.0";

/// Whether a backup captures every document or only recent changes
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    Full,
    Incremental,
}

impl BackupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupKind::Full => "full",
            BackupKind::Incremental => "incremental",
        }
    }
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupKind {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(BackupKind::Full),
            "incremental" => Ok(BackupKind::Incremental),
            other => Err(VaultError::validation(
                "backup kind",
                format!("unknown backup kind '{other}' (expected 'full' or 'incremental')"),
            )),
        }
    }
}

/// Where one collection's delta starts
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CollectionBaseline {
    /// Newest earlier backup that captured the collection without degradation
    pub backup_id: String,
    pub since: DateTime<Utc>,
}

/// Descriptive header stored at the top of every snapshot
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SnapshotMetadata {
    /// Unique identifier, `<kind>_<epochMillis>`
    pub id: String,

    pub kind: BackupKind,

    /// When the snapshot was assembled
    pub created_at: DateTime<Utc>,

    /// Id of the backup this incremental snapshot builds on
    pub based_on_id: Option<String>,

    /// Documents changed at or after this instant are included (incremental only)
    pub since_timestamp: Option<DateTime<Utc>>,

    /// Per-collection baselines of an incremental snapshot
    ///
    /// A collection listed here only holds documents changed since its own
    /// baseline. When the map is non-empty, collections missing from it were
    /// captured in full.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub collection_baselines: BTreeMap<String, CollectionBaseline>,

    pub schema_version: String,

    /// Deployment environment the data was read from
    pub environment: String,
}

impl SnapshotMetadata {
    /// Create metadata for a full snapshot
    ///
    /// # Example
    /// ```rust
    /// use docvault_core::{BackupKind, SnapshotMetadata};
    ///
    /// let metadata = SnapshotMetadata::new("full_1700000000000", BackupKind::Full, chrono::Utc::now());
    /// assert!(metadata.based_on_id.is_none());
    /// ```
    pub fn new<S: Into<String>>(id: S, kind: BackupKind, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            kind,
            created_at,
            based_on_id: None,
            since_timestamp: None,
            collection_baselines: BTreeMap::new(),
            schema_version: SNAPSHOT_SCHEMA_VERSION.to_string(),
            environment: "development".to_string(),
        }
    }

    /// Record the baseline an incremental snapshot was taken against
    pub fn with_baseline<S: Into<String>>(mut self, based_on_id: S, since: DateTime<Utc>) -> Self {
        self.based_on_id = Some(based_on_id.into());
        self.since_timestamp = Some(since);
        self
    }

    /// Take `collection`'s delta against `backup_id` instead of the snapshot-wide baseline
    pub fn with_collection_baseline<C, B>(mut self, collection: C, backup_id: B, since: DateTime<Utc>) -> Self
    where
        C: Into<String>,
        B: Into<String>,
    {
        self.collection_baselines.insert(
            collection.into(),
            CollectionBaseline {
                backup_id: backup_id.into(),
                since,
            },
        );
        self
    }

    /// Change-detection cutoff for `collection`; `None` means capture everything
    pub fn since_for(&self, collection: &str) -> Option<DateTime<Utc>> {
        if self.collection_baselines.is_empty() {
            self.since_timestamp
        } else {
            self.collection_baselines.get(collection).map(|b| b.since)
        }
    }

    /// Ids of every backup this snapshot needs in order to be complete
    pub fn depends_on(&self) -> BTreeSet<String> {
        self.based_on_id
            .iter()
            .cloned()
            .chain(self.collection_baselines.values().map(|b| b.backup_id.clone()))
            .collect()
    }

    pub fn with_environment<S: Into<String>>(mut self, environment: S) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn with_schema_version<S: Into<String>>(mut self, schema_version: S) -> Self {
        self.schema_version = schema_version.into();
        self
    }

    /// Describe a broken baseline invariant, if any
    ///
    /// `based_on_id` and `since_timestamp` must be present exactly when the
    /// snapshot is incremental.
    pub fn lineage_issue(&self) -> Option<String> {
        let has_base = self.based_on_id.is_some();
        let has_since = self.since_timestamp.is_some();
        match self.kind {
            BackupKind::Incremental if !(has_base && has_since) => Some(format!(
                "incremental snapshot {} is missing its baseline (based_on_id and since_timestamp are required)",
                self.id
            )),
            BackupKind::Full if has_base || has_since || !self.collection_baselines.is_empty() => Some(format!(
                "full snapshot {} must not reference a baseline",
                self.id
            )),
            _ => None,
        }
    }

    /// Check if this snapshot's schema major version can be read by this build
    pub fn is_compatible(&self) -> bool {
        major_version(&self.schema_version)
            .zip(major_version(SNAPSHOT_SCHEMA_VERSION))
            .map(|(ours, current)| ours <= current)
            .unwrap_or(false)
    }
}

fn major_version(version: &str) -> Option<u32> {
    version.split('.').next()?.trim().parse().ok()
}

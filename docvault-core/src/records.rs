/*!
Bookkeeping records kept in the backup registry.

Records are created once by a coordinator and never mutated afterwards.
*/

use crate::metadata::BackupKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    Completed,
    Failed,
}

/// A backup that was written to the backup store
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BackupRecord {
    pub id: String,
    pub kind: BackupKind,
    pub created_at: DateTime<Utc>,
    /// Key of the blob in the backup store
    pub storage_key: String,
    pub size_bytes: u64,
    /// Hex SHA-256 of the stored blob
    pub checksum: String,
    pub collection_names: BTreeSet<String>,
    pub status: BackupStatus,
    pub duration_ms: u64,
    pub based_on_id: Option<String>,
    /// Collections that could not be read when the backup ran
    #[serde(default)]
    pub degraded_collections: BTreeSet<String>,
    /// Every backup an incremental needs, directly
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
}

impl BackupRecord {
    /// Whether this backup holds a usable copy of `collection`
    pub fn captured(&self, collection: &str) -> bool {
        self.collection_names.contains(collection) && !self.degraded_collections.contains(collection)
    }

    /// Whether the blob was written with gzip compression
    pub fn is_compressed(&self) -> bool {
        crate::codec::is_compressed_key(&self.storage_key)
    }

    /// Age of the backup relative to `now`, clamped at zero
    pub fn age_ms(&self, now: DateTime<Utc>) -> u64 {
        (now - self.created_at).num_milliseconds().max(0) as u64
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CollectionRestoreStatus {
    Success,
    Failed,
    Skipped,
}

/// Outcome of restoring one collection
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CollectionRecovery {
    /// Documents written (or that would be written, for a dry run)
    pub restored_count: usize,
    pub status: CollectionRestoreStatus,
    pub error: Option<String>,
}

impl CollectionRecovery {
    pub fn success(restored_count: usize) -> Self {
        Self {
            restored_count,
            status: CollectionRestoreStatus::Success,
            error: None,
        }
    }

    pub fn failed<S: Into<String>>(restored_count: usize, error: S) -> Self {
        Self {
            restored_count,
            status: CollectionRestoreStatus::Failed,
            error: Some(error.into()),
        }
    }

    pub fn skipped<S: Into<String>>(reason: S) -> Self {
        Self {
            restored_count: 0,
            status: CollectionRestoreStatus::Skipped,
            error: Some(reason.into()),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryStatus {
    /// Every selected collection was restored
    Completed,
    /// At least one collection failed or was skipped
    Partial,
}

/// Audit record of one recovery run
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RecoveryRecord {
    pub id: String,
    pub backup_id: String,
    pub started_at: DateTime<Utc>,
    pub per_collection: BTreeMap<String, CollectionRecovery>,
    pub total_documents_restored: usize,
    pub status: RecoveryStatus,
    pub duration_ms: u64,
    pub dry_run: bool,
    pub requested_by: Option<String>,
}

impl RecoveryRecord {
    /// Collection errors, formatted as `collection: message`
    pub fn errors(&self) -> Vec<String> {
        self.per_collection
            .iter()
            .filter(|(_, result)| result.status == CollectionRestoreStatus::Failed)
            .filter_map(|(name, result)| result.error.as_ref().map(|e| format!("{name}: {e}")))
            .collect()
    }

    pub fn collections_with(&self, status: CollectionRestoreStatus) -> Vec<&str> {
        self.per_collection
            .iter()
            .filter(|(_, result)| result.status == status)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_age_is_clamped() {
        let now = Utc::now();
        let record = BackupRecord {
            id: "full_1".to_string(),
            kind: BackupKind::Full,
            created_at: now + chrono::Duration::seconds(5),
            storage_key: "full_1.gz".to_string(),
            size_bytes: 10,
            checksum: String::new(),
            collection_names: BTreeSet::new(),
            status: BackupStatus::Completed,
            duration_ms: 1,
            based_on_id: None,
            degraded_collections: BTreeSet::new(),
            depends_on: BTreeSet::new(),
        };

        assert_eq!(record.age_ms(now), 0);
        assert_eq!(record.age_ms(now + chrono::Duration::seconds(7)), 2_000);
        assert!(record.is_compressed());
    }

    #[test]
    fn test_recovery_errors_only_list_failures() {
        let mut per_collection = BTreeMap::new();
        per_collection.insert("products".to_string(), CollectionRecovery::success(3));
        per_collection.insert("categories".to_string(), CollectionRecovery::skipped("degraded"));
        per_collection.insert("users".to_string(), CollectionRecovery::failed(1, "write refused"));

        let record = RecoveryRecord {
            id: "r1".to_string(),
            backup_id: "full_1".to_string(),
            started_at: Utc::now(),
            per_collection,
            total_documents_restored: 4,
            status: RecoveryStatus::Partial,
            duration_ms: 0,
            dry_run: false,
            requested_by: None,
        };

        assert_eq!(record.errors(), vec!["users: write refused".to_string()]);
        assert_eq!(record.collections_with(CollectionRestoreStatus::Skipped), vec!["categories"]);
    }
}

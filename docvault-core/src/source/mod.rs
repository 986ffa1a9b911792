/*!
Data source port: where documents are read from during a backup and written
back to during a recovery.

Any error returned by a data source is treated as a failure of that single
collection. The coordinators record it and move on to the next collection.
*/

pub mod fs;
pub mod memory;

use crate::snapshot::DocumentRecord;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use fs::FsDataSource;
pub use memory::MemoryDataSource;

/// Document store the engine backs up and restores into
#[cfg_attr(test, mockall::automock)]
pub trait DataSource: Send + Sync {
    /// Every document currently stored in `collection`
    fn list_documents(&self, collection: &str) -> Result<Vec<DocumentRecord>>;

    /// Write `document` under its id, replacing any existing version
    fn put_document(&self, collection: &str, document: &DocumentRecord) -> Result<()>;
}

/// Decides whether a document belongs in an incremental snapshot
pub trait ChangeDetector: Send + Sync + fmt::Debug {
    fn changed_since(&self, document: &DocumentRecord, since: DateTime<Utc>) -> bool;
}

/// Built-in change detection strategies
///
/// Documents that carry no usable timestamp are always treated as changed, so
/// an incremental backup can over-capture but never silently miss a document.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChangeDetection {
    /// `updated_at` (falling back to `created_at`) is at or after the baseline
    #[default]
    UpdatedSince,
    /// `created_at` is at or after the baseline; for append-only collections
    CreatedSince,
    /// Every document, as in a full backup
    Always,
}

impl ChangeDetector for ChangeDetection {
    fn changed_since(&self, document: &DocumentRecord, since: DateTime<Utc>) -> bool {
        let stamp = match self {
            ChangeDetection::UpdatedSince => document.source_timestamps.last_modified(),
            ChangeDetection::CreatedSince => document.source_timestamps.created_at,
            ChangeDetection::Always => return true,
        };
        stamp.map(|at| at >= since).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::DocumentTimestamps;
    use chrono::Duration;

    fn doc_with(created: Option<DateTime<Utc>>, updated: Option<DateTime<Utc>>) -> DocumentRecord {
        DocumentRecord::new("d", Default::default()).with_timestamps(DocumentTimestamps {
            created_at: created,
            updated_at: updated,
        })
    }

    #[test]
    fn test_updated_since_uses_latest_timestamp() {
        let since = Utc::now();
        let old = since - Duration::hours(1);
        let new = since + Duration::hours(1);

        assert!(ChangeDetection::UpdatedSince.changed_since(&doc_with(Some(old), Some(new)), since));
        assert!(!ChangeDetection::UpdatedSince.changed_since(&doc_with(Some(old), Some(old)), since));
        assert!(ChangeDetection::UpdatedSince.changed_since(&doc_with(Some(new), None), since));
        // Boundary is inclusive
        assert!(ChangeDetection::UpdatedSince.changed_since(&doc_with(None, Some(since)), since));
    }

    #[test]
    fn test_created_since_ignores_updates() {
        let since = Utc::now();
        let old = since - Duration::hours(1);
        let new = since + Duration::hours(1);

        assert!(!ChangeDetection::CreatedSince.changed_since(&doc_with(Some(old), Some(new)), since));
        assert!(ChangeDetection::CreatedSince.changed_since(&doc_with(Some(new), None), since));
    }

    #[test]
    fn test_missing_timestamps_count_as_changed() {
        let since = Utc::now();
        assert!(ChangeDetection::UpdatedSince.changed_since(&doc_with(None, None), since));
        assert!(ChangeDetection::CreatedSince.changed_since(&doc_with(None, None), since));
        assert!(ChangeDetection::Always.changed_since(&doc_with(None, None), since));
    }

    #[test]
    fn test_change_detection_serde_names() {
        let parsed: ChangeDetection = serde_json::from_str("\"created_since\"").unwrap();
        assert_eq!(parsed, ChangeDetection::CreatedSince);
        assert_eq!(ChangeDetection::default(), ChangeDetection::UpdatedSince);
    }
}

/*!
Structural integrity checks for snapshots.

Validation is pure: it never touches a store and reports every problem it
finds, in check order, instead of stopping at the first one.
*/

use crate::codec::BlobDigest;
use crate::records::BackupRecord;
use crate::snapshot::Snapshot;
use serde::Serialize;
use std::collections::HashSet;

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub valid: bool,
    pub issues: Vec<String>,
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self {
            valid: true,
            issues: Vec::new(),
        }
    }
}

impl ValidationResult {
    pub fn add_issue<S: Into<String>>(&mut self, issue: S) {
        self.valid = false;
        self.issues.push(issue.into());
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IntegrityValidator;

impl IntegrityValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, snapshot: &Snapshot) -> ValidationResult {
        let mut result = ValidationResult::default();
        let metadata = &snapshot.metadata;

        if metadata.id.trim().is_empty() {
            result.add_issue("snapshot metadata has no id");
        }
        if !metadata.is_compatible() {
            result.add_issue(format!(
                "unsupported snapshot schema version {}",
                metadata.schema_version
            ));
        }
        if let Some(issue) = metadata.lineage_issue() {
            result.add_issue(issue);
        }

        for collection in &snapshot.collections {
            if collection.failure.is_none() && collection.document_count != collection.documents.len() {
                result.add_issue(format!(
                    "collection {} declares {} documents but holds {}",
                    collection.name,
                    collection.document_count,
                    collection.documents.len()
                ));
            }
            if collection.failure.is_some() && !collection.documents.is_empty() {
                result.add_issue(format!(
                    "degraded collection {} must not hold documents",
                    collection.name
                ));
            }
        }

        let mut seen = HashSet::new();
        for name in snapshot.collection_names() {
            if !seen.insert(name) {
                result.add_issue(format!("duplicate collection {name}"));
            }
        }

        result
    }

    /// Validate a snapshot loaded for `record`, including the stored blob's digest
    pub fn validate_stored(
        &self,
        snapshot: &Snapshot,
        record: &BackupRecord,
        digest: &BlobDigest,
    ) -> ValidationResult {
        let mut result = self.validate(snapshot);

        if snapshot.metadata.id != record.id {
            result.add_issue(format!(
                "blob {} holds snapshot {} instead of {}",
                record.storage_key, snapshot.metadata.id, record.id
            ));
        }
        // Records rebuilt from a store scan carry the digest they were read with.
        if !record.checksum.is_empty() && record.checksum != digest.checksum {
            result.add_issue(format!(
                "checksum mismatch for {}: expected {}, found {}",
                record.storage_key, record.checksum, digest.checksum
            ));
        }
        if record.size_bytes != digest.size_bytes {
            result.add_issue(format!(
                "size mismatch for {}: expected {} bytes, found {}",
                record.storage_key, record.size_bytes, digest.size_bytes
            ));
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{BackupKind, SnapshotMetadata};
    use crate::records::BackupStatus;
    use crate::snapshot::{CollectionSnapshot, DocumentRecord};
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn doc(id: &str) -> DocumentRecord {
        DocumentRecord::new(id, Default::default())
    }

    fn snapshot(collections: Vec<CollectionSnapshot>) -> Snapshot {
        Snapshot::new(
            SnapshotMetadata::new("full_1", BackupKind::Full, Utc::now()),
            collections,
        )
    }

    #[test]
    fn test_valid_snapshot_with_degraded_collection() {
        let result = IntegrityValidator::new().validate(&snapshot(vec![
            CollectionSnapshot::captured("products", vec![doc("a"), doc("b")]),
            CollectionSnapshot::degraded("categories", "timeout"),
        ]));
        assert!(result.valid, "{:?}", result.issues);
        assert!(result.issues.is_empty());
    }

    #[test]
    fn test_count_mismatch() {
        let mut products = CollectionSnapshot::captured("products", vec![doc("a")]);
        products.document_count = 5;

        let result = IntegrityValidator::new().validate(&snapshot(vec![products]));
        assert!(!result.valid);
        assert_eq!(result.issues.len(), 1);
        assert!(result.issues[0].contains("declares 5 documents but holds 1"));
    }

    #[test]
    fn test_issues_reported_in_check_order() {
        let mut snap = snapshot(vec![
            CollectionSnapshot::captured("products", vec![]),
            CollectionSnapshot::captured("products", vec![]),
        ]);
        snap.metadata.id = String::new();
        snap.collections[0].document_count = 1;

        let result = IntegrityValidator::new().validate(&snap);
        assert_eq!(result.issues.len(), 3);
        assert!(result.issues[0].contains("no id"));
        assert!(result.issues[1].contains("declares 1"));
        assert!(result.issues[2].contains("duplicate collection products"));
    }

    #[test]
    fn test_lineage_and_schema_checks() {
        let mut snap = snapshot(vec![]);
        snap.metadata.kind = BackupKind::Incremental;
        snap.metadata.schema_version = "2.0".to_string();

        let result = IntegrityValidator::new().validate(&snap);
        assert_eq!(result.issues.len(), 2);
        assert!(result.issues[0].contains("schema version 2.0"));
        assert!(result.issues[1].contains("missing its baseline"));
    }

    #[test]
    fn test_degraded_collection_with_documents() {
        let mut categories = CollectionSnapshot::degraded("categories", "boom");
        categories.documents.push(doc("x"));

        let result = IntegrityValidator::new().validate(&snapshot(vec![categories]));
        assert!(!result.valid);
        assert!(result.issues[0].contains("must not hold documents"));
    }

    #[test]
    fn test_validate_stored_checks_digest() {
        let snap = snapshot(vec![]);
        let record = BackupRecord {
            id: "full_1".to_string(),
            kind: BackupKind::Full,
            created_at: snap.metadata.created_at,
            storage_key: "full_1.gz".to_string(),
            size_bytes: 10,
            checksum: "aaaa".to_string(),
            collection_names: BTreeSet::new(),
            status: BackupStatus::Completed,
            duration_ms: 0,
            based_on_id: None,
            degraded_collections: BTreeSet::new(),
            depends_on: BTreeSet::new(),
        };
        let validator = IntegrityValidator::new();

        let matching = BlobDigest {
            size_bytes: 10,
            checksum: "aaaa".to_string(),
        };
        assert!(validator.validate_stored(&snap, &record, &matching).valid);

        let tampered = BlobDigest {
            size_bytes: 11,
            checksum: "bbbb".to_string(),
        };
        let result = validator.validate_stored(&snap, &record, &tampered);
        assert_eq!(result.issues.len(), 2);
        assert!(result.issues[0].contains("checksum mismatch"));
        assert!(result.issues[1].contains("size mismatch"));
    }
}

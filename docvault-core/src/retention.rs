/*!
Retention enforcement.

A backup is eligible for deletion when its rank by recency (0 = newest) is at
least `max_backups`, or when it is older than `max_age_ms`. The current
recovery baseline (`last_backup`) is never eligible, so at least one backup
always stays reachable. Neither is any backup that a kept incremental depends
on, directly or through another incremental; such records are reported in
`kept_as_base`.

Eligible records are processed oldest-first. A record is dropped from history
only after its blob was actually deleted; a failed delete is logged and the
record stays.
*/

use crate::clock::Clock;
use crate::observability;
use crate::records::BackupRecord;
use crate::registry::{BackupRegistry, OperationGuard, OperationKind};
use crate::storage::BackupStore;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RetentionPolicy {
    /// Keep at most this many backups
    pub max_backups: Option<usize>,
    /// Discard backups older than this
    pub max_age_ms: Option<u64>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_backups: Some(10),
            max_age_ms: Some(30 * DAY_MS),
        }
    }
}

impl RetentionPolicy {
    /// A policy that never deletes anything
    pub fn keep_all() -> Self {
        Self {
            max_backups: None,
            max_age_ms: None,
        }
    }

    pub fn with_max_backups(mut self, max_backups: usize) -> Self {
        self.max_backups = Some(max_backups);
        self
    }

    pub fn with_max_age_days(mut self, days: u64) -> Self {
        self.max_age_ms = Some(days.saturating_mul(DAY_MS));
        self
    }

    /// Whether the record at `rank` (0 = newest) with the given age falls outside the policy
    pub fn is_eligible(&self, rank: usize, age_ms: u64) -> bool {
        let over_count = self.max_backups.map(|max| rank >= max).unwrap_or(false);
        let over_age = self.max_age_ms.map(|max| age_ms > max).unwrap_or(false);
        over_count || over_age
    }
}

/// A backup whose blob could not be deleted
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RetentionFailure {
    pub backup_id: String,
    pub error: String,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct RetentionReport {
    /// Records removed from history, oldest first
    pub deleted: Vec<BackupRecord>,
    /// Eligible records that were kept because their blob survived
    pub failed: Vec<RetentionFailure>,
    /// Eligible records that were kept because a newer backup builds on them
    pub kept_as_base: Vec<String>,
}

pub struct RetentionManager {
    store: Arc<dyn BackupStore>,
    registry: Arc<BackupRegistry>,
    clock: Arc<dyn Clock>,
}

impl RetentionManager {
    pub fn new(
        store: Arc<dyn BackupStore>,
        registry: Arc<BackupRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            registry,
            clock,
        }
    }

    /// Run a cleanup pass in its own maintenance slot
    ///
    /// # Errors
    /// * `VaultError::Conflict` - If a backup, recovery or other maintenance is running
    pub fn cleanup(&self, policy: &RetentionPolicy) -> Result<RetentionReport> {
        let guard = self.registry.try_begin(OperationKind::Maintenance)?;
        Ok(self.cleanup_with(&guard, policy))
    }

    /// Run a cleanup pass inside an operation that already holds the slot
    pub fn cleanup_with(&self, guard: &OperationGuard<'_>, policy: &RetentionPolicy) -> RetentionReport {
        let now = self.clock.now();
        let baseline = self.registry.last_backup().map(|record| record.id);

        let history = self.registry.backups();
        let (eligible, kept): (Vec<_>, Vec<_>) = history.iter().enumerate().partition(|(rank, record)| {
            Some(&record.id) != baseline.as_ref() && policy.is_eligible(*rank, record.age_ms(now))
        });
        let bases = chain_bases(&history, kept.iter().map(|(_, record)| *record));

        let mut report = RetentionReport::default();
        let mut doomed = Vec::new();
        for (_, record) in eligible {
            if bases.contains(record.id.as_str()) {
                info!(backup_id = %record.id, "Keeping expired backup that a newer incremental builds on");
                report.kept_as_base.push(record.id.clone());
            } else {
                doomed.push(record.clone());
            }
        }

        for record in doomed.into_iter().rev() {
            match self.store.delete(&record.storage_key) {
                Ok(()) => {
                    self.registry.remove_backup(guard, &record.id);
                    info!(backup_id = %record.id, key = %record.storage_key, "Deleted expired backup");
                    report.deleted.push(record);
                }
                Err(e) => {
                    warn!(
                        backup_id = %record.id,
                        key = %record.storage_key,
                        error = %e,
                        "Failed to delete expired backup; keeping record"
                    );
                    report.failed.push(RetentionFailure {
                        backup_id: record.id,
                        error: e.to_string(),
                    });
                }
            }
        }

        observability::record_retention(report.deleted.len(), report.failed.len());
        report
    }
}

/// Ids reachable from `roots` through `depends_on`
fn chain_bases<'a>(
    history: &'a [BackupRecord],
    roots: impl Iterator<Item = &'a BackupRecord>,
) -> HashSet<&'a str> {
    let by_id: HashMap<&str, &BackupRecord> = history.iter().map(|r| (r.id.as_str(), r)).collect();
    let mut pending: Vec<&str> = roots.flat_map(|r| r.depends_on.iter().map(String::as_str)).collect();
    let mut bases = HashSet::new();
    while let Some(id) = pending.pop() {
        if !bases.insert(id) {
            continue;
        }
        if let Some(record) = by_id.get(id) {
            pending.extend(record.depends_on.iter().map(String::as_str));
        }
    }
    bases
}

/*!
Process-wide backup bookkeeping.

The registry holds the single operation slot that serializes backups,
recoveries and maintenance, plus the history and counters those operations
produce. It is an ordinary value: wire one instance into the coordinators at
startup, or create a fresh one per test.

Mutating methods take an [`OperationGuard`], which can only be obtained by
winning the operation slot. Status readers never block on a running
operation; they see the state as of the last completed mutation.
*/

use crate::metadata::BackupKind;
use crate::records::{BackupRecord, RecoveryRecord};
use crate::{Result, VaultError};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, PoisonError, RwLock};
use tracing::debug;

/// What currently holds the operation slot
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Backup(BackupKind),
    Recovery,
    /// Retention cleanup or an explicit delete
    Maintenance,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Backup(kind) => write!(f, "{kind} backup"),
            OperationKind::Recovery => f.write_str("recovery"),
            OperationKind::Maintenance => f.write_str("maintenance"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub total_backups: u64,
    pub successful_backups: u64,
    pub failed_backups: u64,
    pub total_recoveries: u64,
    pub successful_recoveries: u64,
    pub failed_recoveries: u64,
}

/// Consistent, point-in-time view of the registry
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RegistryStatus {
    pub in_progress: Option<OperationKind>,
    pub last_backup: Option<BackupRecord>,
    pub last_recovery: Option<RecoveryRecord>,
    pub backup_count: usize,
    pub recovery_count: usize,
    pub counters: Counters,
}

#[derive(Debug, Default)]
struct RegistryState {
    last_backup: Option<BackupRecord>,
    /// Newest first
    backup_history: Vec<BackupRecord>,
    /// Newest first
    recovery_history: VecDeque<RecoveryRecord>,
    counters: Counters,
}

#[derive(Debug)]
pub struct BackupRegistry {
    in_progress: Mutex<Option<OperationKind>>,
    state: RwLock<RegistryState>,
    max_recovery_history: usize,
}

/// Proof of holding the operation slot; releases it when dropped
#[derive(Debug)]
pub struct OperationGuard<'a> {
    registry: &'a BackupRegistry,
    kind: OperationKind,
}

impl OperationGuard<'_> {
    pub fn kind(&self) -> OperationKind {
        self.kind
    }
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        let mut slot = self
            .registry
            .in_progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        debug!(operation = %self.kind, "Releasing operation slot");
        *slot = None;
    }
}

impl Default for BackupRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BackupRegistry {
    pub fn new() -> Self {
        Self::with_recovery_history_limit(100)
    }

    pub fn with_recovery_history_limit(max_recovery_history: usize) -> Self {
        Self {
            in_progress: Mutex::new(None),
            state: RwLock::new(RegistryState::default()),
            max_recovery_history: max_recovery_history.max(1),
        }
    }

    /// Claim the operation slot, failing immediately if it is taken
    pub fn try_begin(&self, kind: OperationKind) -> Result<OperationGuard<'_>> {
        let mut slot = self
            .in_progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(active) = *slot {
            return Err(VaultError::Conflict {
                requested: kind,
                active,
            });
        }
        *slot = Some(kind);
        debug!(operation = %kind, "Acquired operation slot");
        Ok(OperationGuard {
            registry: self,
            kind,
        })
    }

    pub fn in_progress(&self) -> Option<OperationKind> {
        *self
            .in_progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self, guard: &OperationGuard<'_>) -> std::sync::RwLockWriteGuard<'_, RegistryState> {
        debug_assert!(
            std::ptr::eq(guard.registry, self),
            "operation guard belongs to a different registry"
        );
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> RegistryStatus {
        let in_progress = self.in_progress();
        let state = self.read_state();
        RegistryStatus {
            in_progress,
            last_backup: state.last_backup.clone(),
            last_recovery: state.recovery_history.front().cloned(),
            backup_count: state.backup_history.len(),
            recovery_count: state.recovery_history.len(),
            counters: state.counters,
        }
    }

    pub fn counters(&self) -> Counters {
        self.read_state().counters
    }

    pub fn last_backup(&self) -> Option<BackupRecord> {
        self.read_state().last_backup.clone()
    }

    /// Backup history, newest first
    pub fn backups(&self) -> Vec<BackupRecord> {
        self.read_state().backup_history.clone()
    }

    /// Recovery history, newest first
    pub fn recoveries(&self) -> Vec<RecoveryRecord> {
        self.read_state().recovery_history.iter().cloned().collect()
    }

    pub fn find_backup(&self, id: &str) -> Option<BackupRecord> {
        self.read_state()
            .backup_history
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    pub fn contains_backup(&self, id: &str) -> bool {
        self.read_state().backup_history.iter().any(|r| r.id == id)
    }

    /// Add a completed backup to history
    ///
    /// The baseline is always the newest record by `created_at`, so a backup
    /// stamped earlier than an existing one does not displace it.
    pub fn record_backup(&self, guard: &OperationGuard<'_>, record: BackupRecord) {
        let mut state = self.write_state(guard);
        let position = state
            .backup_history
            .partition_point(|existing| existing.created_at > record.created_at);
        state.backup_history.insert(position, record);
        state.last_backup = state.backup_history.first().cloned();
        state.counters.total_backups += 1;
        state.counters.successful_backups += 1;
    }

    pub fn record_backup_failure(&self, guard: &OperationGuard<'_>) {
        let mut state = self.write_state(guard);
        state.counters.total_backups += 1;
        state.counters.failed_backups += 1;
    }

    pub fn record_recovery(&self, guard: &OperationGuard<'_>, record: RecoveryRecord) {
        let mut state = self.write_state(guard);
        state.recovery_history.push_front(record);
        state.recovery_history.truncate(self.max_recovery_history);
        state.counters.total_recoveries += 1;
        state.counters.successful_recoveries += 1;
    }

    pub fn record_recovery_failure(&self, guard: &OperationGuard<'_>) {
        let mut state = self.write_state(guard);
        state.counters.total_recoveries += 1;
        state.counters.failed_recoveries += 1;
    }

    /// Drop a backup from history
    ///
    /// If it was the recovery baseline, the next most recent backup takes its place.
    pub fn remove_backup(&self, guard: &OperationGuard<'_>, id: &str) -> Option<BackupRecord> {
        let mut state = self.write_state(guard);
        let index = state.backup_history.iter().position(|r| r.id == id)?;
        let removed = state.backup_history.remove(index);

        let was_baseline = state
            .last_backup
            .as_ref()
            .map(|last| last.id == removed.id)
            .unwrap_or(false);
        if was_baseline {
            state.last_backup = state.backup_history.first().cloned();
        }
        Some(removed)
    }

    /// Replace the backup history wholesale, e.g. after scanning the backup store
    ///
    /// Counters are left untouched; they describe this process's activity.
    pub fn replace_history(&self, guard: &OperationGuard<'_>, mut records: Vec<BackupRecord>) {
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        let mut state = self.write_state(guard);
        state.last_backup = records.first().cloned();
        state.backup_history = records;
    }
}

//! Shared per-target status store
//!
//! Written only by the owning lifecycle controller (and by the abort sweep
//! once that controller is gone), read by the status reporter and the
//! report builder. Each update takes the write lock once, so readers never
//! see a torn field.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use vmprobe_common::{RunResult, TargetPhase};

use super::types::TargetStatus;

/// Cloneable handle to the status of every target in a run
#[derive(Debug, Clone, Default)]
pub struct StatusTable {
    inner: Arc<RwLock<BTreeMap<String, TargetStatus>>>,
}

impl StatusTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add targets in `Pending` (existing entries are left alone)
    pub fn register<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut table = self.write();
        for name in names {
            table.entry(name.into()).or_default();
        }
    }

    /// Stamp the start time of a target
    pub fn mark_started(&self, name: &str) {
        if let Some(status) = self.write().get_mut(name) {
            status.started_at.get_or_insert_with(Instant::now);
        }
    }

    /// Move a target to `phase`.
    ///
    /// Terminal phases are sticky: returns `false` and changes nothing if the
    /// target is already terminal (or unknown).
    pub fn set_phase(&self, name: &str, phase: TargetPhase) -> bool {
        let mut table = self.write();
        let Some(status) = table.get_mut(name) else {
            return false;
        };
        if status.is_terminal() {
            return false;
        }
        status.phase = phase;
        if phase.is_terminal() {
            status.finished_at = Some(Instant::now());
        }
        true
    }

    /// Replace the progress annotation of a target
    pub fn set_progress(&self, name: &str, progress: impl Into<String>) {
        if let Some(status) = self.write().get_mut(name) {
            status.progress = progress.into();
        }
    }

    /// Append a step result; ignored once the target is terminal
    pub fn record_result(&self, name: &str, result: RunResult) {
        if let Some(status) = self.write().get_mut(name) {
            if !status.is_terminal() {
                status.results.push(result);
            }
        }
    }

    /// Count a force-destroy issued for a target
    pub fn record_destroy(&self, name: &str) {
        if let Some(status) = self.write().get_mut(name) {
            status.destroy_attempts += 1;
        }
    }

    /// Current phase of a target
    pub fn phase(&self, name: &str) -> Option<TargetPhase> {
        self.read().get(name).map(|s| s.phase)
    }

    /// Copy of one target's status
    pub fn get(&self, name: &str) -> Option<TargetStatus> {
        self.read().get(name).cloned()
    }

    /// Consistent copy of every target's status, ordered by name
    pub fn snapshot(&self) -> Vec<(String, TargetStatus)> {
        self.read()
            .iter()
            .map(|(name, status)| (name.clone(), status.clone()))
            .collect()
    }

    /// True when every registered target is terminal
    pub fn all_terminal(&self) -> bool {
        self.read().values().all(TargetStatus::is_terminal)
    }

    /// Targets whose controller may currently own a running VM
    pub fn holding_resources(&self) -> Vec<String> {
        self.read()
            .iter()
            .filter(|(_, status)| status.phase.may_hold_resource())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Targets not yet in a terminal phase
    pub fn unfinished(&self) -> Vec<String> {
        self.read()
            .iter()
            .filter(|(_, status)| !status.is_terminal())
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, TargetStatus>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, TargetStatus>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

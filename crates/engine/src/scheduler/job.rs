use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use vigil_common::model::AlertState;

use crate::alert::Rule;

/// Scheduling wrapper around one rule.
///
/// The scheduler swaps the rule on refresh while keeping the same `Job`, so a
/// claim taken by an in-flight evaluation survives the refresh.
#[derive(Debug)]
pub struct Job {
    rule: RwLock<Rule>,
    offset_ms: AtomicI64,
    running: AtomicBool,
}

impl Job {
    pub fn new(rule: Rule) -> Self {
        Self {
            rule: RwLock::new(rule),
            offset_ms: AtomicI64::new(0),
            running: AtomicBool::new(false),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Rule> {
        self.rule.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Rule> {
        self.rule.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of the rule for one evaluation.
    pub fn rule(&self) -> Rule {
        self.read().clone()
    }

    pub fn rule_id(&self) -> i64 {
        self.read().id
    }

    pub fn frequency(&self) -> i64 {
        self.read().frequency
    }

    pub fn is_paused(&self) -> bool {
        self.read().is_paused()
    }

    pub(crate) fn replace_rule(&self, rule: Rule) {
        *self.write() = rule;
    }

    /// Mirrors a persisted transition so the next evaluation sees it before
    /// the following refresh.
    pub fn record_transition(&self, state: AlertState, at: DateTime<Utc>, state_changes: i64) {
        let mut rule = self.write();
        rule.state = state;
        rule.last_state_change = at;
        rule.state_changes = state_changes;
    }

    pub fn offset(&self) -> Duration {
        Duration::from_millis(self.offset_ms.load(Ordering::Relaxed).max(0) as u64)
    }

    pub(crate) fn set_offset_ms(&self, offset_ms: i64) {
        self.offset_ms.store(offset_ms, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Marks the job running if it was idle. Returns false when another
    /// evaluation still holds it.
    pub fn try_claim(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }
}

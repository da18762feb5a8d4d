use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Lock-free counters shared by every engine task.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    ticks: AtomicU64,
    jobs_queued: AtomicU64,
    jobs_completed: AtomicU64,
    eval_attempts: AtomicU64,
    eval_failures: AtomicU64,
    eval_timeouts: AtomicU64,
    panics_recovered: AtomicU64,
    state_transitions: AtomicU64,
    notifications_sent: AtomicU64,
    notifications_failed: AtomicU64,
    notification_version_conflicts: AtomicU64,
    eval_latency_sum_us: AtomicU64,
    eval_latency_count: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inc_ticks(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_jobs_queued(&self, count: u64) {
        self.jobs_queued.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_jobs_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_eval_attempts(&self) {
        self.eval_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_eval_failures(&self) {
        self.eval_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_eval_timeouts(&self) {
        self.eval_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_panics_recovered(&self) {
        self.panics_recovered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_state_transitions(&self) {
        self.state_transitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_notifications_sent(&self) {
        self.notifications_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_notifications_failed(&self) {
        self.notifications_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_notification_version_conflicts(&self) {
        self.notification_version_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eval_latency(&self, elapsed: Duration) {
        let us = elapsed.as_micros() as u64;
        self.eval_latency_sum_us.fetch_add(us, Ordering::Relaxed);
        self.eval_latency_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ticks_val(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn jobs_queued_val(&self) -> u64 {
        self.jobs_queued.load(Ordering::Relaxed)
    }

    pub fn jobs_completed_val(&self) -> u64 {
        self.jobs_completed.load(Ordering::Relaxed)
    }

    pub fn eval_attempts_val(&self) -> u64 {
        self.eval_attempts.load(Ordering::Relaxed)
    }

    pub fn eval_failures_val(&self) -> u64 {
        self.eval_failures.load(Ordering::Relaxed)
    }

    pub fn eval_timeouts_val(&self) -> u64 {
        self.eval_timeouts.load(Ordering::Relaxed)
    }

    pub fn panics_recovered_val(&self) -> u64 {
        self.panics_recovered.load(Ordering::Relaxed)
    }

    pub fn state_transitions_val(&self) -> u64 {
        self.state_transitions.load(Ordering::Relaxed)
    }

    pub fn notifications_sent_val(&self) -> u64 {
        self.notifications_sent.load(Ordering::Relaxed)
    }

    pub fn notifications_failed_val(&self) -> u64 {
        self.notifications_failed.load(Ordering::Relaxed)
    }

    pub fn notification_version_conflicts_val(&self) -> u64 {
        self.notification_version_conflicts.load(Ordering::Relaxed)
    }

    pub fn eval_latency_vals(&self) -> (u64, u64) {
        (
            self.eval_latency_sum_us.load(Ordering::Relaxed),
            self.eval_latency_count.load(Ordering::Relaxed),
        )
    }
}

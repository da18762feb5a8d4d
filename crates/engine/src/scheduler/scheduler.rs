use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::Job;
use crate::alert::Rule;

/// Maps ticks to due jobs. Owned by the tick consumer; nothing else touches
/// the job map.
#[derive(Debug, Default)]
pub struct Scheduler {
    jobs: HashMap<i64, Arc<Job>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn job(&self, rule_id: i64) -> Option<Arc<Job>> {
        self.jobs.get(&rule_id).cloned()
    }

    /// Replaces the job set with a fresh rule snapshot.
    ///
    /// Jobs for rules that are still present are reused, so their running
    /// flag is untouched. Each job gets an offset of
    /// `(frequency * 1000 / rule_count) * ordinal` milliseconds, spreading
    /// same-frequency rules across the bucket.
    pub fn update(&mut self, rules: Vec<Rule>) {
        let count = rules.len() as i64;
        let mut previous = std::mem::take(&mut self.jobs);

        for (i, rule) in rules.into_iter().enumerate() {
            let bucket_ms = rule.frequency.saturating_mul(1_000) / count;
            let offset_ms = bucket_ms.saturating_mul(i as i64);
            let id = rule.id;
            let job = match previous.remove(&id) {
                Some(job) => {
                    job.replace_rule(rule);
                    job
                }
                None => Arc::new(Job::new(rule)),
            };
            job.set_offset_ms(offset_ms);
            self.jobs.insert(id, job);
        }

        tracing::debug!(
            rule_count = self.jobs.len(),
            removed = previous.len(),
            "scheduler updated"
        );
    }

    /// Queues every job due at `t`: `t` seconds divisible by the rule's
    /// frequency, not paused, and not already running. The send waits when
    /// the queue is full. Returns the number of jobs queued.
    pub async fn tick(&self, t: DateTime<Utc>, exec_queue: &mpsc::Sender<Arc<Job>>) -> usize {
        let now = t.timestamp();
        let mut queued = 0;

        for job in self.jobs.values() {
            if job.is_paused() || now % job.frequency() != 0 {
                continue;
            }
            if !job.try_claim() {
                tracing::debug!(rule_id = job.rule_id(), "skipping running job");
                continue;
            }
            if exec_queue.send(job.clone()).await.is_err() {
                job.set_running(false);
                tracing::debug!("exec queue closed; stopping tick");
                break;
            }
            queued += 1;
        }

        queued
    }
}

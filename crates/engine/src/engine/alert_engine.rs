//! The engine pipeline.
//!
//! Four long-lived tasks connected by three channels:
//!
//! ```text
//! ticker --C--> tick consumer --exec queue--> exec dispatcher --result queue--> result dispatcher
//!                 (scheduler)                  (task per job)                   (ResultHandler)
//! ```
//!
//! Shutdown stops the tick consumer, which drops the exec queue sender. The
//! exec dispatcher then drains and exits, and the result dispatcher exits once
//! every in-flight job has pushed its result. In-flight evaluations are not
//! cancelled; [`Disposer::dispose`] is the separate, forceful path.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

use vigil_common::clock::Clock;

use super::retry::{process_job_with_retry, ExecDeps};
use super::supervise::{supervise, PanicReport};
use crate::alert::{test_rule, EvalContext, EvalHandler, Rule};
use crate::config::AlertingSettings;
use crate::metrics::EngineMetrics;
use crate::result_handler::{HandleOutcome, ResultHandler};
use crate::rule_reader::RuleReader;
use crate::scheduler::{Job, Scheduler};
use crate::ticker::Ticker;

pub struct EngineDeps {
    pub clock: Arc<dyn Clock>,
    pub rule_reader: Arc<dyn RuleReader>,
    pub eval_handler: Arc<dyn EvalHandler>,
    pub result_handler: Arc<ResultHandler>,
    pub metrics: Arc<EngineMetrics>,
}

/// A finished evaluation on its way to the result handler.
pub struct JobResult {
    pub job: Arc<Job>,
    pub context: EvalContext,
}

/// Aborts every evaluation attempt in flight.
#[derive(Clone)]
pub struct Disposer {
    tx: Arc<watch::Sender<bool>>,
}

impl Disposer {
    pub fn dispose(&self) {
        let _ = self.tx.send(true);
    }
}

pub struct AlertEngine {
    deps: EngineDeps,
    settings: AlertingSettings,
    dispose_tx: Arc<watch::Sender<bool>>,
}

impl AlertEngine {
    pub fn new(deps: EngineDeps, settings: AlertingSettings) -> Self {
        let (dispose_tx, _) = watch::channel(false);
        Self {
            deps,
            settings,
            dispose_tx: Arc::new(dispose_tx),
        }
    }

    pub fn disposer(&self) -> Disposer {
        Disposer {
            tx: self.dispose_tx.clone(),
        }
    }

    /// Evaluates `rule` once without persisting or notifying.
    pub async fn test_rule(&self, rule: Rule) -> EvalContext {
        test_rule(rule, self.deps.eval_handler.as_ref(), self.deps.clock.as_ref()).await
    }

    /// Runs until `shutdown` resolves, then drains.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        let s = &self.settings;
        let start = truncate_to_second(self.deps.clock.now());
        let ticker = Ticker::spawn(
            self.deps.clock.clone(),
            start,
            chrono::Duration::zero(),
            s.tick_interval_seconds,
        );

        let (exec_tx, exec_rx) = mpsc::channel::<Arc<Job>>(s.exec_queue_capacity);
        let (result_tx, result_rx) = mpsc::channel::<JobResult>(s.result_queue_capacity);
        let (stop_tx, stop_rx) = oneshot::channel();

        let exec_deps = ExecDeps {
            eval_handler: self.deps.eval_handler.clone(),
            clock: self.deps.clock.clone(),
            metrics: self.deps.metrics.clone(),
            max_attempts: s.max_attempts,
            evaluation_timeout: s.evaluation_timeout(),
        };

        let tick_task = tokio::spawn(tick_loop(
            ticker,
            self.deps.rule_reader.clone(),
            self.deps.metrics.clone(),
            s.rule_refresh_ticks.max(1),
            exec_tx,
            stop_rx,
        ));
        let exec_task = tokio::spawn(exec_loop(
            exec_rx,
            result_tx,
            exec_deps,
            self.dispose_tx.subscribe(),
        ));
        let result_task = tokio::spawn(result_loop(
            result_rx,
            self.deps.result_handler.clone(),
            self.deps.metrics.clone(),
        ));

        tracing::info!(
            tick_interval_s = s.tick_interval_seconds,
            max_attempts = s.max_attempts,
            "alert engine started"
        );

        shutdown.await;
        tracing::info!("alert engine stopping");
        let _ = stop_tx.send(());

        for (name, task) in [("tick", tick_task), ("exec", exec_task), ("result", result_task)] {
            if let Err(e) = task.await {
                tracing::error!(task = name, error = %e, "engine task failed");
            }
        }
        tracing::info!("alert engine stopped");
    }
}

fn truncate_to_second(t: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(t.timestamp(), 0).unwrap_or(t)
}

fn report_panic(task: &str, metrics: &EngineMetrics, panic: &PanicReport) {
    metrics.inc_panics_recovered();
    tracing::error!(
        task,
        panic = %panic.message,
        backtrace = %panic.backtrace_string(),
        "recovered from panic"
    );
}

async fn tick_loop(
    mut ticker: Ticker,
    rule_reader: Arc<dyn RuleReader>,
    metrics: Arc<EngineMetrics>,
    refresh_every: u64,
    exec_tx: mpsc::Sender<Arc<Job>>,
    mut stop: oneshot::Receiver<()>,
) {
    let mut scheduler = Scheduler::new();
    let mut ticks: u64 = 0;

    loop {
        let tick = tokio::select! {
            biased;
            _ = &mut stop => break,
            tick = ticker.c.recv() => match tick {
                Some(t) => t,
                None => break,
            },
        };

        let iteration = supervise(async {
            if ticks % refresh_every == 0 {
                let rules = rule_reader.fetch().await;
                scheduler.update(rules);
            }
            ticks += 1;
            metrics.inc_ticks();
            scheduler.tick(tick, &exec_tx).await
        })
        .await;

        match iteration {
            Ok(queued) => metrics.add_jobs_queued(queued as u64),
            Err(panic) => report_panic("tick", &metrics, &panic),
        }
    }
    tracing::debug!(ticks, "tick loop stopped");
}

async fn exec_loop(
    mut exec_rx: mpsc::Receiver<Arc<Job>>,
    result_tx: mpsc::Sender<JobResult>,
    deps: ExecDeps,
    dispose: watch::Receiver<bool>,
) {
    while let Some(job) = exec_rx.recv().await {
        let deps = deps.clone();
        let result_tx = result_tx.clone();
        let dispose = dispose.clone();
        tokio::spawn(async move {
            let outcome = supervise(run_job(job.clone(), &deps, dispose, &result_tx)).await;
            if let Err(panic) = outcome {
                report_panic("job", &deps.metrics, &panic);
            }
            job.set_running(false);
        });
    }
    tracing::debug!("exec queue closed");
}

async fn run_job(
    job: Arc<Job>,
    deps: &ExecDeps,
    dispose: watch::Receiver<bool>,
    result_tx: &mpsc::Sender<JobResult>,
) {
    let Some(context) = process_job_with_retry(job.clone(), deps, dispose).await else {
        return;
    };
    deps.metrics.inc_jobs_completed();
    let rule_id = context.rule.id;
    if result_tx
        .send(JobResult {
            job: job.clone(),
            context,
        })
        .await
        .is_err()
    {
        tracing::warn!(rule_id, "result queue closed, dropping evaluation");
    }
    job.set_running(false);
}

async fn result_loop(
    mut result_rx: mpsc::Receiver<JobResult>,
    handler: Arc<ResultHandler>,
    metrics: Arc<EngineMetrics>,
) {
    while let Some(JobResult { job, mut context }) = result_rx.recv().await {
        let rule_id = context.rule.id;
        match supervise(handler.handle(&mut context)).await {
            Ok(Ok(HandleOutcome::Transitioned { to, .. })) => {
                let rule = &context.rule;
                job.record_transition(to, rule.last_state_change, rule.state_changes);
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                tracing::error!(rule_id, error = %e, "failed to handle evaluation result")
            }
            Err(panic) => report_panic("result", &metrics, &panic),
        }
    }
    tracing::debug!("result queue closed");
}

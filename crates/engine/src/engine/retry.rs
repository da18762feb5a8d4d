use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

use vigil_common::clock::Clock;

use super::supervise::supervise;
use crate::alert::{EvalContext, EvalError, EvalHandler};
use crate::metrics::EngineMetrics;
use crate::scheduler::Job;

/// What a single job's evaluation needs, cloned into every attempt task.
#[derive(Clone)]
pub struct ExecDeps {
    pub eval_handler: Arc<dyn EvalHandler>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<EngineMetrics>,
    pub max_attempts: u32,
    pub evaluation_timeout: Duration,
}

enum AttemptSignal {
    Next(u32),
    Finished(Box<EvalContext>),
}

/// Evaluates `job`, retrying failed or timed out attempts until one succeeds
/// or `max_attempts` have run. Attempts run one at a time, each in its own
/// task. Returns `None` when `dispose` fires, which aborts the attempt in
/// flight, or when an attempt task dies outside the evaluation guard.
pub async fn process_job_with_retry(
    job: Arc<Job>,
    deps: &ExecDeps,
    mut dispose: watch::Receiver<bool>,
) -> Option<EvalContext> {
    let rule_id = job.rule_id();
    let mut attempt = 1;
    let mut dispose_open = true;

    loop {
        let mut handle = tokio::spawn(run_attempt(job.clone(), deps.clone(), attempt));
        let joined = loop {
            tokio::select! {
                joined = &mut handle => break joined,
                changed = dispose.changed(), if dispose_open => {
                    if changed.is_err() {
                        dispose_open = false;
                        continue;
                    }
                    if *dispose.borrow() {
                        handle.abort();
                        tracing::warn!(rule_id, "evaluation aborted by dispose");
                        return None;
                    }
                }
            }
        };

        match joined {
            Ok(AttemptSignal::Next(next)) => attempt = next,
            Ok(AttemptSignal::Finished(ctx)) => return Some(*ctx),
            Err(e) => {
                if e.is_panic() {
                    deps.metrics.inc_panics_recovered();
                }
                tracing::error!(rule_id, attempt, error = %e, "evaluation attempt task died");
                return None;
            }
        }
    }
}

async fn run_attempt(job: Arc<Job>, deps: ExecDeps, attempt: u32) -> AttemptSignal {
    if attempt == 1 {
        let offset = job.offset();
        if !offset.is_zero() {
            tokio::time::sleep(offset).await;
        }
    }

    let rule_id = job.rule_id();
    let mut ctx = EvalContext::new(job.rule(), deps.clock.now());
    ctx.attempt = attempt;
    deps.metrics.inc_eval_attempts();

    let started = Instant::now();
    let evaluated = tokio::time::timeout(
        deps.evaluation_timeout,
        supervise(deps.eval_handler.eval(&mut ctx)),
    )
    .await;
    deps.metrics.record_eval_latency(started.elapsed());

    match evaluated {
        Ok(Ok(())) => {}
        Ok(Err(panic)) => {
            deps.metrics.inc_panics_recovered();
            tracing::error!(
                rule_id,
                attempt,
                panic = %panic.message,
                backtrace = %panic.backtrace_string(),
                "evaluation panicked"
            );
            ctx.error = Some(EvalError::Aborted(panic.to_string()));
        }
        Err(_) => {
            deps.metrics.inc_eval_timeouts();
            ctx.error = Some(EvalError::Timeout(deps.evaluation_timeout));
        }
    }
    if ctx.end_time.is_none() {
        ctx.end_time = Some(deps.clock.now());
    }

    match &ctx.error {
        Some(e) => {
            deps.metrics.inc_eval_failures();
            if attempt < deps.max_attempts {
                tracing::warn!(rule_id, attempt, error = %e, "evaluation failed, retrying");
                AttemptSignal::Next(attempt + 1)
            } else {
                tracing::warn!(
                    rule_id,
                    attempt,
                    error = %e,
                    "evaluation failed, attempts exhausted"
                );
                AttemptSignal::Finished(Box::new(ctx))
            }
        }
        None => AttemptSignal::Finished(Box::new(ctx)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::testing::{epoch, rule_with, static_condition};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use vigil_common::clock::MockClock;

    /// Fails (or hangs, or panics) on the first `bad_attempts` calls.
    struct Flaky {
        calls: AtomicU32,
        bad_attempts: u32,
        mode: Mode,
    }

    #[derive(Clone, Copy)]
    enum Mode {
        Error,
        Hang,
        Panic,
    }

    impl Flaky {
        fn new(bad_attempts: u32, mode: Mode) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                bad_attempts,
                mode,
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EvalHandler for Flaky {
        async fn eval(&self, ctx: &mut EvalContext) {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.bad_attempts {
                match self.mode {
                    Mode::Error => {
                        ctx.error = Some(EvalError::Query(format!("call {call} failed")));
                        return;
                    }
                    Mode::Hang => std::future::pending::<()>().await,
                    Mode::Panic => panic!("evaluator bug on call {call}"),
                }
            }
            ctx.firing = true;
        }
    }

    fn deps(handler: Arc<Flaky>) -> (ExecDeps, Arc<EngineMetrics>) {
        let metrics = EngineMetrics::new();
        let deps = ExecDeps {
            eval_handler: handler,
            clock: Arc::new(MockClock::from_epoch_seconds(1_000)),
            metrics: metrics.clone(),
            max_attempts: 3,
            evaluation_timeout: Duration::from_secs(5),
        };
        (deps, metrics)
    }

    fn job() -> Arc<Job> {
        Arc::new(Job::new(rule_with(vec![static_condition(true)])))
    }

    /// A dispose channel whose sender is already gone.
    fn no_dispose() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[tokio::test]
    async fn always_failing_runs_exactly_max_attempts() {
        let handler = Flaky::new(u32::MAX, Mode::Error);
        let (deps, metrics) = deps(handler.clone());

        let ctx = process_job_with_retry(job(), &deps, no_dispose()).await.unwrap();

        assert_eq!(handler.calls(), 3);
        assert_eq!(ctx.attempt, 3);
        assert_eq!(ctx.error, Some(EvalError::Query("call 3 failed".into())));
        assert_eq!(metrics.eval_attempts_val(), 3);
        assert_eq!(metrics.eval_failures_val(), 3);
    }

    #[tokio::test]
    async fn success_on_attempt_k_stops_retrying() {
        for k in 1..=3 {
            let handler = Flaky::new(k - 1, Mode::Error);
            let (deps, _) = deps(handler.clone());

            let ctx = process_job_with_retry(job(), &deps, no_dispose()).await.unwrap();

            assert_eq!(handler.calls(), k);
            assert_eq!(ctx.attempt, k);
            assert!(ctx.error.is_none());
            assert!(ctx.firing);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hung_attempt_times_out_and_retries() {
        let handler = Flaky::new(1, Mode::Hang);
        let (deps, metrics) = deps(handler.clone());

        let ctx = process_job_with_retry(job(), &deps, no_dispose()).await.unwrap();

        assert_eq!(handler.calls(), 2);
        assert!(ctx.error.is_none());
        assert_eq!(metrics.eval_timeouts_val(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_timeout_is_surfaced() {
        let handler = Flaky::new(u32::MAX, Mode::Hang);
        let (deps, _) = deps(handler.clone());

        let ctx = process_job_with_retry(job(), &deps, no_dispose()).await.unwrap();

        assert_eq!(handler.calls(), 3);
        assert_eq!(ctx.error, Some(EvalError::Timeout(Duration::from_secs(5))));
    }

    #[tokio::test]
    async fn panicking_attempt_is_contained() {
        let handler = Flaky::new(1, Mode::Panic);
        let (deps, metrics) = deps(handler.clone());

        let ctx = process_job_with_retry(job(), &deps, no_dispose()).await.unwrap();

        assert_eq!(handler.calls(), 2);
        assert!(ctx.error.is_none());
        assert_eq!(metrics.panics_recovered_val(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_aborts_in_flight_attempt() {
        let handler = Flaky::new(u32::MAX, Mode::Hang);
        let (mut deps, _) = deps(handler.clone());
        deps.evaluation_timeout = Duration::from_secs(3_600);
        let (dispose_tx, dispose_rx) = watch::channel(false);

        let task = tokio::spawn({
            let deps = deps.clone();
            async move { process_job_with_retry(job(), &deps, dispose_rx).await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        dispose_tx.send(true).unwrap();

        assert!(task.await.unwrap().is_none());
        assert_eq!(handler.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn offset_delays_first_attempt() {
        let handler = Flaky::new(0, Mode::Error);
        let (deps, _) = deps(handler);
        let job = job();
        job.set_offset_ms(2_500);

        let ctx = process_job_with_retry(job, &deps, no_dispose()).await.unwrap();
        assert_eq!(ctx.start_time, epoch(1_000) + chrono::Duration::milliseconds(2_500));
    }

    /// Panics on every read, which happens before the evaluation guard.
    struct BrokenClock;

    impl Clock for BrokenClock {
        fn now(&self) -> chrono::DateTime<chrono::Utc> {
            panic!("clock unavailable")
        }
    }

    #[tokio::test]
    async fn attempt_dying_outside_guard_ends_processing() {
        let handler = Flaky::new(0, Mode::Error);
        let (mut deps, metrics) = deps(handler.clone());
        deps.clock = Arc::new(BrokenClock);

        let processed = tokio::time::timeout(
            Duration::from_secs(5),
            process_job_with_retry(job(), &deps, no_dispose()),
        )
        .await
        .expect("processing must not wait on a dead attempt");

        assert!(processed.is_none());
        assert_eq!(handler.calls(), 0);
        assert_eq!(metrics.panics_recovered_val(), 1);
    }
}

use super::engine_metrics::EngineMetrics;

pub fn render_prometheus(m: &EngineMetrics) -> String {
    let mut out = String::with_capacity(1024);

    write_counter(&mut out, "vigil_engine_ticks_total", m.ticks_val());
    write_counter(&mut out, "vigil_engine_jobs_queued_total", m.jobs_queued_val());
    write_counter(&mut out, "vigil_engine_jobs_completed_total", m.jobs_completed_val());
    write_counter(&mut out, "vigil_engine_eval_attempts_total", m.eval_attempts_val());
    write_counter(&mut out, "vigil_engine_eval_failures_total", m.eval_failures_val());
    write_counter(&mut out, "vigil_engine_eval_timeouts_total", m.eval_timeouts_val());
    write_counter(&mut out, "vigil_engine_panics_recovered_total", m.panics_recovered_val());
    write_counter(&mut out, "vigil_engine_state_transitions_total", m.state_transitions_val());
    write_counter(&mut out, "vigil_engine_notifications_sent_total", m.notifications_sent_val());
    write_counter(
        &mut out,
        "vigil_engine_notifications_failed_total",
        m.notifications_failed_val(),
    );
    write_counter(
        &mut out,
        "vigil_engine_notification_version_conflicts_total",
        m.notification_version_conflicts_val(),
    );

    let (sum, count) = m.eval_latency_vals();
    write_summary(&mut out, "vigil_engine_eval_latency_us", sum, count);

    out
}

fn write_counter(out: &mut String, name: &str, val: u64) {
    use std::fmt::Write;
    let _ = writeln!(out, "# TYPE {name} counter");
    let _ = writeln!(out, "{name} {val}");
}

fn write_summary(out: &mut String, name: &str, sum: u64, count: u64) {
    use std::fmt::Write;
    let _ = writeln!(out, "# TYPE {name} summary");
    let _ = writeln!(out, "{name}_sum {sum}");
    let _ = writeln!(out, "{name}_count {count}");
}

use std::sync::OnceLock;

use anyhow::Result;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

const POLL_ITERATIONS_TOTAL: &str = "solarlink_worker_poll_iterations_total";
const POLL_FAILURE_STREAK_GAUGE: &str = "solarlink_worker_poll_failure_streak";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub fn init_metrics() -> Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = METRICS_HANDLE.set(handle);
    Ok(())
}

pub fn register_poll_outcome(outcome: &str, idle: bool) {
    counter!(
        POLL_ITERATIONS_TOTAL,
        "outcome" => outcome.to_string(),
        "cadence" => if idle { "idle" } else { "active" }
    )
    .increment(1);

    // The streak itself lives in the poll loop; the gauge only tracks
    // whether the last iteration succeeded.
    let failing = matches!(outcome, "poll_failed" | "store_unavailable");
    gauge!(POLL_FAILURE_STREAK_GAUGE).set(if failing { 1.0 } else { 0.0 });
}

//! Fan-out metrics
//!
//! Every provider call records one counter increment and one latency sample.
//! Nothing is exported until the host application installs a recorder, for
//! example with [`install_prometheus_recorder`].

use anyhow::{Result, anyhow};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

pub const PROVIDER_CALLS_TOTAL: &str = "observability_provider_calls_total";
pub const PROVIDER_CALL_DURATION: &str = "observability_provider_call_duration_seconds";

/// How a single provider call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Ok,
    Error,
    Panic,
    Timeout,
}

impl CallOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallOutcome::Ok => "ok",
            CallOutcome::Error => "error",
            CallOutcome::Panic => "panic",
            CallOutcome::Timeout => "timeout",
        }
    }
}

pub fn record_provider_call(
    provider: &str,
    operation: &'static str,
    outcome: CallOutcome,
    elapsed: Duration,
) {
    ::metrics::counter!(
        PROVIDER_CALLS_TOTAL,
        "provider" => provider.to_string(),
        "operation" => operation,
        "outcome" => outcome.as_str()
    )
    .increment(1);

    ::metrics::histogram!(
        PROVIDER_CALL_DURATION,
        "provider" => provider.to_string(),
        "operation" => operation
    )
    .record(elapsed.as_secs_f64());
}

/// Install a process-wide Prometheus recorder and return its render handle.
pub fn install_prometheus_recorder() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .add_global_label("service", env!("CARGO_PKG_NAME"))
        .install_recorder()
        .map_err(|e| anyhow!("Failed to install Prometheus recorder: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_labels() {
        assert_eq!(CallOutcome::Ok.as_str(), "ok");
        assert_eq!(CallOutcome::Timeout.as_str(), "timeout");
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_provider_call("database", "end_span", CallOutcome::Error, Duration::from_millis(3));
    }

    // The only test in this crate that installs the global recorder
    #[test]
    fn test_prometheus_render_includes_provider_calls() {
        let handle = install_prometheus_recorder().unwrap();
        record_provider_call("analytics", "start_trace", CallOutcome::Timeout, Duration::from_millis(12));

        let rendered = handle.render();
        assert!(rendered.contains(PROVIDER_CALLS_TOTAL));
        assert!(rendered.contains("outcome=\"timeout\""));
    }
}

//! Process-wide Prometheus metric registry (§6 "process-wide state",
//! SPEC_FULL §11). Initialised once at startup, no teardown required, mirroring
//! clarium's own process-wide globals (`scripts.rs::GLOBAL_REG`,
//! `system_catalog/registry.rs`), which are also `once_cell` statics.
//!
//! Named after the original Python's `epstats/prometheus.py` counters/timers,
//! exposed at `GET /metrics` in Prometheus text exposition format via the
//! `prometheus` crate.

use once_cell::sync::Lazy;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder};

pub struct Metrics {
    pub registry: Registry,
    pub evaluation_requests_total: IntCounter,
    pub evaluation_successes_total: IntCounter,
    pub evaluation_errors_total: IntCounter,
    pub errors_check_total: IntCounter,
    pub evaluation_duration_seconds: Histogram,
    pub query_duration_seconds: Histogram,
    pub stats_computation_duration_seconds: Histogram,
}

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new();

        let evaluation_requests_total =
            IntCounter::with_opts(Opts::new("evaluation_requests_total", "Total number of /evaluate requests received"))
                .expect("static metric options are always valid");
        let evaluation_successes_total = IntCounter::with_opts(Opts::new(
            "evaluation_successes_total",
            "Total number of /evaluate requests that completed successfully",
        ))
        .expect("static metric options are always valid");
        let evaluation_errors_total =
            IntCounter::with_opts(Opts::new("evaluation_errors_total", "Total number of /evaluate requests that failed"))
                .expect("static metric options are always valid");
        let errors_check_total =
            IntCounter::with_opts(Opts::new("errors_check_total", "Total number of checks skipped due to an evaluation error"))
                .expect("static metric options are always valid");

        let evaluation_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "evaluation_duration_seconds",
            "Wall-clock duration of a full experiment evaluation",
        ))
        .expect("static metric options are always valid");
        let query_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "query_duration_seconds",
            "Duration of the data collaborator's get_agg_goals call",
        ))
        .expect("static metric options are always valid");
        let stats_computation_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "stats_computation_duration_seconds",
            "Duration of the statistical kernel computation within an evaluation",
        ))
        .expect("static metric options are always valid");

        for collector in [
            Box::new(evaluation_requests_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(evaluation_successes_total.clone()),
            Box::new(evaluation_errors_total.clone()),
            Box::new(errors_check_total.clone()),
            Box::new(evaluation_duration_seconds.clone()),
            Box::new(query_duration_seconds.clone()),
            Box::new(stats_computation_duration_seconds.clone()),
        ] {
            registry.register(collector).expect("metric names are unique and registered exactly once");
        }

        Metrics {
            registry,
            evaluation_requests_total,
            evaluation_successes_total,
            evaluation_errors_total,
            errors_check_total,
            evaluation_duration_seconds,
            query_duration_seconds,
            stats_computation_duration_seconds,
        }
    }

    /// Render the registry in Prometheus text exposition format (`GET /metrics`).
    pub fn encode_text(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&families, &mut buf).expect("text encoding of gathered metric families cannot fail");
        String::from_utf8(buf).expect("prometheus text encoder always emits valid utf-8")
    }
}

pub static METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_registered_families() {
        METRICS.evaluation_requests_total.inc();
        let text = METRICS.encode_text();
        assert!(text.contains("evaluation_requests_total"));
    }
}

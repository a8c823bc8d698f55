use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Histogram bucket boundaries for decision latency (seconds). The decision
/// path is one store round trip, so the interesting range is sub-10ms
/// through the 2s command timeout.
const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0,
];

/// Thin handle around the global metrics recorder.
///
/// After `Metrics::install()` the `metrics` crate macros (`counter!`,
/// `gauge!`, `histogram!`) can be used anywhere in the codebase. The
/// `PrometheusHandle` is retained solely for rendering `/metrics`; the
/// protection families with derived-on-read gauges are rendered separately
/// by the shield module and appended to this output.
#[derive(Clone)]
pub struct Metrics {
    handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and register metric
    /// descriptions. Must be called once at startup before any macro use.
    pub fn install() -> Self {
        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(
                metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
                LATENCY_BUCKETS,
            )
            .expect("valid matcher")
            .install_recorder()
            .expect("failed to install metrics recorder");

        // --- Describe all operational metrics (adds HELP / TYPE lines) ---

        // request path
        describe_counter!(
            "atlas_http_requests_total",
            Unit::Count,
            "HTTP requests processed, labeled by decision outcome"
        );
        describe_histogram!(
            "atlas_decision_duration_seconds",
            Unit::Seconds,
            "Admission decision latency including the store round trip"
        );
        describe_histogram!(
            "atlas_upstream_duration_seconds",
            Unit::Seconds,
            "Upstream forwarding latency for admitted requests"
        );

        // store
        describe_counter!(
            "atlas_store_round_trips_total",
            Unit::Count,
            "Bucket script invocations against the store"
        );
        describe_counter!(
            "atlas_store_reconnects_total",
            Unit::Count,
            "Store reconnect attempts"
        );

        // connections
        describe_gauge!(
            "atlas_connections_active",
            Unit::Count,
            "Active downstream connections"
        );
        describe_counter!(
            "atlas_connections_total",
            Unit::Count,
            "Connections accepted"
        );

        // admin plane
        describe_counter!(
            "atlas_metrics_scrapes_total",
            Unit::Count,
            "Metrics endpoint requests, labeled by outcome"
        );

        Self { handle }
    }

    /// Render the operational families in Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

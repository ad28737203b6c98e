//! Metric names and the Prometheus exporter.

use metrics_exporter_prometheus::PrometheusBuilder;

/// Counter: HTTP requests served, labeled by `route`, `method`, `status`.
pub const HTTP_REQUESTS_TOTAL: &str = "quorum_http_requests_total";
/// Histogram: HTTP request latency in seconds, labeled by `route`, `method`.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "quorum_http_request_duration_seconds";
/// Gauge: plans currently resident in memory.
pub const PLANS_ACTIVE: &str = "quorum_plans_active";
/// Counter: plan-state reads answered from the TTL cache.
pub const STATE_CACHE_HITS_TOTAL: &str = "quorum_state_cache_hits_total";
/// Counter: plan-state reads that recomputed from plan data.
pub const STATE_CACHE_MISSES_TOTAL: &str = "quorum_state_cache_misses_total";
/// Histogram: wall time of one WAL group-commit flush.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "quorum_wal_flush_duration_seconds";
/// Histogram: events committed per WAL flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "quorum_wal_flush_batch_size";

/// Install the Prometheus recorder, optionally with a scrape endpoint on
/// `0.0.0.0:{port}`. Without a port the recorder still collects, it just
/// isn't exposed.
pub fn init(port: Option<u16>) {
    let builder = PrometheusBuilder::new();
    let result = match port {
        Some(port) => builder
            .with_http_listener(([0, 0, 0, 0], port))
            .install()
            .map(|_| ()),
        None => builder.install_recorder().map(|_| ()),
    };
    if let Err(e) = result {
        tracing::warn!(error = %e, "failed to install metrics exporter");
    }
}

//! Metric names and the Prometheus exporter.
//!
//! Counters and histograms are recorded through the `metrics` facade at the
//! call sites; this module owns the names and installs the exporter whose
//! handle renders the `/metrics` text payload.

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

pub const REQUESTS_TOTAL: &str = "statico_requests_total";
pub const CACHE_HITS_TOTAL: &str = "statico_cache_hits_total";
pub const CACHE_MISSES_TOTAL: &str = "statico_cache_misses_total";
pub const BYTES_SERVED_TOTAL: &str = "statico_bytes_served_total";
pub const REQUEST_DURATION_SECONDS: &str = "statico_request_duration_seconds";
pub const ACTIVE_CONNECTIONS: &str = "statico_active_connections";

/// Install the Prometheus recorder and describe the exported series.
///
/// Returns the handle the `/metrics` endpoint renders from.
pub fn install() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    describe_counter!(REQUESTS_TOTAL, "Total number of requests");
    describe_counter!(CACHE_HITS_TOTAL, "Total number of cache hits");
    describe_counter!(CACHE_MISSES_TOTAL, "Total number of cache misses");
    describe_counter!(BYTES_SERVED_TOTAL, "Total bytes served");
    describe_histogram!(REQUEST_DURATION_SECONDS, "Request duration in seconds");
    describe_gauge!(ACTIVE_CONNECTIONS, "Number of in-flight requests");

    Ok(handle)
}

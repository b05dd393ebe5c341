//! Prometheus metrics for the objectds proxy
//!
//! Exposes metrics in Prometheus format for monitoring and observability.

use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Gauge, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};

lazy_static! {
    /// Global Prometheus registry for objectds metrics
    pub static ref REGISTRY: Registry = Registry::new();

    // ============== Query Metrics ==============

    /// Panel queries answered, by outcome (`ok` or the error kind)
    pub static ref QUERIES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("queries_total", "Total number of panel queries answered")
            .namespace("objectds"),
        &["status"]
    ).expect("metric can be created");

    /// Frames handed back to callers
    pub static ref FRAMES_DECODED_TOTAL: IntCounter = IntCounter::with_opts(
        Opts::new("frames_decoded_total", "Total frames decoded from upstream results")
            .namespace("objectds")
    ).expect("metric can be created");

    // ============== Upstream Metrics ==============

    /// Outbound calls to the upstream query endpoint, by outcome
    pub static ref UPSTREAM_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("upstream_requests_total", "Total batched requests sent upstream")
            .namespace("objectds"),
        &["status"]
    ).expect("metric can be created");

    /// Round-trip time of outbound calls
    pub static ref UPSTREAM_REQUEST_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "upstream_request_duration_seconds",
            "Upstream round-trip duration in seconds"
        )
        .namespace("objectds")
        .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0])
    ).expect("metric can be created");

    /// Upstream health status (1 = healthy, 0 = unhealthy)
    pub static ref UPSTREAM_HEALTHY: Gauge = Gauge::with_opts(
        Opts::new("upstream_healthy", "Upstream health status (1=healthy, 0=unhealthy)")
            .namespace("objectds")
    ).expect("metric can be created");
}

/// Register all metrics with the global registry.
/// Should be called once at startup.
pub fn register_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(QUERIES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(FRAMES_DECODED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(UPSTREAM_REQUESTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(UPSTREAM_REQUEST_DURATION_SECONDS.clone()))?;
    REGISTRY.register(Box::new(UPSTREAM_HEALTHY.clone()))?;
    Ok(())
}

/// Encode all metrics to Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_else(|e| format!("# Error encoding metrics: {}", e))
}

/// Tracks one upstream round trip.
/// Counts as an error if dropped without being recorded.
pub struct UpstreamTimer {
    start: std::time::Instant,
}

impl UpstreamTimer {
    pub fn start() -> Self {
        Self { start: std::time::Instant::now() }
    }

    /// Record a round trip that returned a response with `status`.
    pub fn record_status(self, status: u16) {
        self.observe(&status.to_string());
    }

    /// Record a round trip that never produced a response.
    pub fn record_failure(self) {
        self.observe("error");
    }

    fn observe(self, label: &str) {
        UPSTREAM_REQUEST_DURATION_SECONDS.observe(self.start.elapsed().as_secs_f64());
        UPSTREAM_REQUESTS_TOTAL.with_label_values(&[label]).inc();
        // Prevent the Drop impl from running
        std::mem::forget(self);
    }
}

impl Drop for UpstreamTimer {
    fn drop(&mut self) {
        UPSTREAM_REQUESTS_TOTAL.with_label_values(&["error"]).inc();
    }
}

/// Record the outcome of one panel query.
pub fn record_query(status: &str, frames: usize) {
    QUERIES_TOTAL.with_label_values(&[status]).inc();
    FRAMES_DECODED_TOTAL.inc_by(frames as u64);
}

/// Set upstream health status.
pub fn set_upstream_healthy(healthy: bool) {
    UPSTREAM_HEALTHY.set(if healthy { 1.0 } else { 0.0 });
}

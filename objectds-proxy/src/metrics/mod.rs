//! Metrics module for the objectds proxy
//!
//! Provides Prometheus metrics for monitoring and observability.

pub mod prometheus;

// Re-export commonly used items
pub use prometheus::{
    encode_metrics, record_query, register_metrics, set_upstream_healthy, UpstreamTimer,
    QUERIES_TOTAL, UPSTREAM_HEALTHY, UPSTREAM_REQUESTS_TOTAL,
};

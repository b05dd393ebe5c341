//! Upstream health check.
//!
//! Sends the instance's canned query links through the same path as a real
//! call, over the last ten minutes. The upstream is healthy when it answers
//! 200 with a JSON body.

use chrono::Duration;
use objectds_core::{batcher, TimeRange};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::metrics;
use crate::orchestrator::Instance;

/// Minutes covered by the health query
pub const HEALTH_WINDOW_MINUTES: i64 = 10;

/// Message reported by a passing check
pub const HEALTHY_MESSAGE: &str = "Data source is working";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Error,
}

/// Outcome of one health check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    pub message: String,
}

impl HealthCheckResult {
    fn ok() -> Self {
        Self { status: HealthStatus::Ok, message: HEALTHY_MESSAGE.to_string() }
    }

    fn error(message: impl Into<String>) -> Self {
        Self { status: HealthStatus::Error, message: message.into() }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Ok
    }
}

/// Probe the upstream of `instance`
#[instrument(skip(instance), fields(url = %instance.settings.url))]
pub async fn check_health(instance: &Instance) -> HealthCheckResult {
    let result = probe(instance).await;
    metrics::set_upstream_healthy(result.is_healthy());
    match result.status {
        HealthStatus::Ok => info!("Upstream is healthy"),
        HealthStatus::Error => warn!(message = %result.message, "Upstream health check failed"),
    }
    result
}

async fn probe(instance: &Instance) -> HealthCheckResult {
    let queries = match instance.settings.health_queries() {
        Ok(queries) => queries,
        Err(e) => return HealthCheckResult::error(e.to_string()),
    };
    debug!(queries = queries.len(), "Sending health query");

    let Some(window) = TimeRange::last(Duration::minutes(HEALTH_WINDOW_MINUTES)) else {
        return HealthCheckResult::error("health window is out of range");
    };
    let envelope = batcher::envelope(&window, queries);
    let body = match envelope.to_bytes() {
        Ok(body) => body,
        Err(e) => return HealthCheckResult::error(e.to_string()),
    };

    let response = match instance.send(body).await {
        Ok(response) => response,
        Err(e) => return HealthCheckResult::error(e.to_string()),
    };
    if response.status != 200 {
        return HealthCheckResult::error(format!("upstream returned status {}", response.status));
    }

    match serde_json::from_slice::<serde::de::IgnoredAny>(&response.body) {
        Ok(_) => HealthCheckResult::ok(),
        Err(e) => HealthCheckResult::error(format!("upstream returned invalid JSON: {}", e)),
    }
}

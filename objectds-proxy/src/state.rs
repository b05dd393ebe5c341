//! Application state for the objectds proxy server.

use std::sync::atomic::{AtomicU64, Ordering};

use objectds_core::QueryResponse;
use serde::Serialize;

use crate::error::ProxyError;
use crate::orchestrator::{Instance, QueryProxy};
use crate::settings::Settings;

/// Default listen port
pub const DEFAULT_PORT: u16 = 8000;

/// Application state shared across all handlers
pub struct AppState {
    /// Query proxy holding the current instance snapshot
    pub proxy: QueryProxy,

    /// Runtime statistics
    pub stats: ProxyStats,

    /// Configuration the server was started with
    pub config: ProxyConfig,
}

impl AppState {
    /// Create application state with an HTTP transport
    pub fn new(config: ProxyConfig) -> Result<Self, ProxyError> {
        let instance = Instance::new(config.settings.clone())?;
        Ok(Self::with_instance(config, instance))
    }

    pub fn with_instance(config: ProxyConfig, instance: Instance) -> Self {
        Self { proxy: QueryProxy::new(instance), stats: ProxyStats::default(), config }
    }
}

/// Proxy configuration
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Port to listen on
    pub port: u16,

    /// Initial instance settings
    pub settings: Settings,
}

impl ProxyConfig {
    pub fn new(settings: Settings) -> Self {
        Self { port: DEFAULT_PORT, settings }
    }

    /// Create config from environment variables
    pub fn from_env() -> Result<Self, ProxyError> {
        let port = std::env::var("OBJECTDS_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        Ok(Self { port, settings: Settings::from_env()? })
    }
}

/// Runtime statistics
#[derive(Debug, Default)]
pub struct ProxyStats {
    /// Calls received on `/api/query`
    pub calls_total: AtomicU64,

    /// Panel queries answered
    pub queries_total: AtomicU64,

    /// Panel queries answered with an error
    pub queries_failed: AtomicU64,

    /// Frames returned to callers
    pub frames_returned: AtomicU64,

    /// Settings replacements
    pub settings_updates: AtomicU64,
}

impl ProxyStats {
    /// Record a completed call
    pub fn record_call(&self, response: &QueryResponse) {
        let frames: usize = response.results.values().map(|r| r.frames.len()).sum();
        self.calls_total.fetch_add(1, Ordering::Relaxed);
        self.queries_total.fetch_add(response.len() as u64, Ordering::Relaxed);
        self.queries_failed.fetch_add(response.error_count() as u64, Ordering::Relaxed);
        self.frames_returned.fetch_add(frames as u64, Ordering::Relaxed);
    }

    pub fn record_settings_update(&self) {
        self.settings_updates.fetch_add(1, Ordering::Relaxed);
    }

    /// Share of queries answered without an error
    pub fn success_rate(&self) -> f64 {
        let total = self.queries_total.load(Ordering::Relaxed);
        if total == 0 {
            return 1.0;
        }
        let failed = self.queries_failed.load(Ordering::Relaxed);
        total.saturating_sub(failed) as f64 / total as f64
    }

    /// Get a snapshot of all statistics
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            calls_total: self.calls_total.load(Ordering::Relaxed),
            queries_total: self.queries_total.load(Ordering::Relaxed),
            queries_failed: self.queries_failed.load(Ordering::Relaxed),
            frames_returned: self.frames_returned.load(Ordering::Relaxed),
            settings_updates: self.settings_updates.load(Ordering::Relaxed),
            success_rate: self.success_rate(),
        }
    }
}

/// Snapshot of statistics at a point in time
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub calls_total: u64,
    pub queries_total: u64,
    pub queries_failed: u64,
    pub frames_returned: u64,
    pub settings_updates: u64,
    pub success_rate: f64,
}

//! objectds proxy library
//!
//! Forwards batches of panel queries to an upstream `/api/ds/query`
//! endpoint and translates the results into uniform columnar frames.
//!
//! This library can be used either as a standalone server binary or
//! embedded in the `objectds` CLI.

use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

pub mod error;
pub mod health;
pub mod metrics;
pub mod orchestrator;
pub mod routes;
pub mod settings;
pub mod state;
pub mod transport;

pub use error::{ProxyError, SettingsError};
pub use health::{check_health, HealthCheckResult, HealthStatus};
pub use orchestrator::{Instance, QueryProxy};
pub use settings::Settings;
pub use state::{AppState, ProxyConfig};

/// Server configuration for the proxy
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,
    /// Initial instance settings
    pub settings: Settings,
    /// Whether to print the banner on startup
    pub print_banner: bool,
}

impl ServerConfig {
    pub fn new(settings: Settings) -> Self {
        Self { port: state::DEFAULT_PORT, settings, print_banner: true }
    }
}

impl From<ServerConfig> for ProxyConfig {
    fn from(config: ServerConfig) -> Self {
        ProxyConfig { port: config.port, settings: config.settings }
    }
}

/// Initialize Prometheus metrics registry.
/// Should be called once before starting the server.
pub fn init_metrics() {
    if let Err(e) = metrics::register_metrics() {
        warn!("Failed to register Prometheus metrics: {}", e);
    }
}

/// Build the HTTP router over `state`
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Query endpoints
        .route("/api/query", post(routes::query))
        .route("/api/settings", put(routes::update_settings))
        // Health endpoints
        .route("/api/health", get(routes::health))
        .route("/live", get(routes::live))
        .route("/metrics", get(routes::metrics))
        .route("/metrics/prometheus", get(routes::metrics_prometheus))
        // Middleware
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the objectds proxy server.
///
/// This function starts the HTTP server and blocks until it's shut down.
///
/// # Example
/// ```no_run
/// use objectds_proxy::{run_server, ServerConfig, Settings};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = ServerConfig::new(Settings::new("http://localhost:3000"));
///     run_server(config).await
/// }
/// ```
pub async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    init_metrics();

    let proxy_config = ProxyConfig::from(config.clone());

    info!(
        port = proxy_config.port,
        upstream = %proxy_config.settings.url,
        "Starting objectds proxy v{}",
        env!("CARGO_PKG_VERSION")
    );

    let state = Arc::new(AppState::new(proxy_config)?);

    // Probe the upstream once; the server starts either way
    let probe = check_health(&state.proxy.instance()).await;
    if !probe.is_healthy() {
        warn!(
            "Upstream at {} is not answering: {}. Proxy will start anyway.",
            config.settings.url, probe.message
        );
    }

    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("objectds proxy listening on http://{}", addr);

    if config.print_banner {
        print_banner(&config);
    }

    axum::serve(listener, app).await?;

    Ok(())
}

/// Print the startup banner
fn print_banner(config: &ServerConfig) {
    let settings = &config.settings;

    println!();
    println!("==================================================");
    println!("  objectds proxy v{}", env!("CARGO_PKG_VERSION"));
    println!("==================================================");
    println!("  Listening on: http://0.0.0.0:{}", config.port);
    println!("  Upstream:     {}", settings.query_url());
    println!(
        "  Auth:         {}",
        match settings.authorization() {
            Some(header) if header.starts_with("Bearer") => "api token",
            Some(_) => "basic",
            None => "none",
        }
    );
    println!("  Timeout:      {}s", settings.timeout.as_secs());
    println!("  Query links:  {}", settings.query_links.len());
    println!();
    println!("  Endpoints:");
    println!("    Query:    POST /api/query");
    println!("    Settings: PUT  /api/settings");
    println!("    Health:   GET  /api/health, /live, /metrics");
    println!("    Prometheus: GET /metrics/prometheus");
    println!("==================================================");
    println!();
}

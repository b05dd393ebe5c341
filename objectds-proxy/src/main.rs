//! objectds proxy - query proxy and frame translation server.
//!
//! Accepts batches of panel queries, forwards them to an upstream
//! `/api/ds/query` endpoint in one round trip, and answers with uniform
//! columnar frames keyed by `refId`.
//!
//! ## Quick Start
//!
//! ```bash
//! # Upstream at localhost:3000, listen on port 8000
//! objectds-proxy
//!
//! # Custom configuration
//! OBJECTDS_URL=http://grafana:3000 OBJECTDS_API_TOKEN=... OBJECTDS_PORT=9000 objectds-proxy
//!
//! # Full settings document
//! OBJECTDS_SETTINGS=/etc/objectds/settings.json objectds-proxy
//! ```

use objectds_proxy::{run_server, ProxyConfig, ServerConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("objectds_proxy=info,tower_http=info"));

    tracing_subscriber::registry().with(fmt::layer().with_target(false)).with(filter).init();

    // Load configuration
    let config = ProxyConfig::from_env()?;

    run_server(ServerConfig { port: config.port, settings: config.settings, print_banner: true })
        .await
}

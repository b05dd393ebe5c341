//! Error types for the objectds proxy.
//!
//! Per-query failures never surface here: they travel inside
//! [`objectds_core::QueryResult`]. `ProxyError` covers what stops the proxy
//! from handling a call at all.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Proxy error types
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Instance settings are missing or invalid
    #[error("Invalid settings: {0}")]
    Settings(#[from] SettingsError),

    /// The HTTP client could not be built
    #[error("Transport setup failed: {0}")]
    Transport(String),

    /// Inbound request could not be understood
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Errors raised while loading instance settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("could not unmarshal instance settings json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("could not read settings file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("upstream url is missing")]
    MissingUrl,

    #[error("invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = match &self {
            ProxyError::Settings(_) => StatusCode::BAD_REQUEST,
            ProxyError::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        };

        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "type": format!("{:?}", self).split('(').next().unwrap_or("Unknown"),
            }
        }));

        (status, body).into_response()
    }
}

//! Settings route.

use axum::{body::Bytes, extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::error::ProxyError;
use crate::orchestrator::Instance;
use crate::settings::Settings;
use crate::state::AppState;

/// Replace the instance settings
///
/// PUT /api/settings
///
/// The body is a full settings document. Calls already in flight finish on
/// the instance they started with.
pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, ProxyError> {
    let settings = Settings::from_json(&body)?;
    info!(url = %settings.url, "Handling PUT /api/settings");

    let url = settings.url.clone();
    state.proxy.update(Instance::new(settings)?);
    state.stats.record_settings_update();

    Ok(Json(json!({ "status": "updated", "url": url })))
}

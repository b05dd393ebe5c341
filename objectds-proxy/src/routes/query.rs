//! Query route.

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use objectds_core::model::DEFAULT_MAX_DATA_POINTS;
use objectds_core::{PanelQuery, QueryRequest, QueryResponse, TimeRange};
use serde::Deserialize;
use serde_json::value::RawValue;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::ProxyError;
use crate::state::AppState;

/// Body of `POST /api/query`, also the file format read by the CLI.
///
/// Each entry of `queries` is kept verbatim as the panel query payload; only
/// the header fields are read here. Queries marked `hide: true` are dropped.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryBody {
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,

    #[serde(default)]
    pub to: Option<DateTime<Utc>>,

    #[serde(default)]
    pub max_data_points: Option<i64>,

    pub queries: Vec<Box<RawValue>>,
}

/// Header fields of one panel query. Only `refId` is typed; a bad paging
/// hint fails its own query, not the call.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryHeader {
    #[serde(default)]
    ref_id: Option<String>,

    #[serde(default)]
    interval_ms: Option<Value>,

    #[serde(default)]
    max_data_points: Option<Value>,

    #[serde(default)]
    hide: Option<Value>,
}

impl QueryBody {
    /// Build a call from the body. `range` overrides the body's `from`/`to`.
    pub fn into_request(self, range: Option<TimeRange>) -> Result<QueryRequest, ProxyError> {
        let time_range = match (range, self.from, self.to) {
            (Some(range), _, _) => range,
            (None, Some(from), Some(to)) => TimeRange::new(from, to),
            _ => return Err(ProxyError::InvalidRequest("`from` and `to` are required".into())),
        };
        if time_range.to < time_range.from {
            return Err(ProxyError::InvalidRequest("`to` is before `from`".into()));
        }

        let mut queries = Vec::with_capacity(self.queries.len());
        for (i, raw) in self.queries.iter().enumerate() {
            if let Some(query) = panel_query(i, raw)? {
                queries.push(query);
            }
        }

        Ok(QueryRequest::new(queries, time_range)
            .with_max_data_points(self.max_data_points.unwrap_or(DEFAULT_MAX_DATA_POINTS)))
    }
}

/// `None` for a hidden query
fn panel_query(index: usize, raw: &RawValue) -> Result<Option<PanelQuery>, ProxyError> {
    let header: QueryHeader = serde_json::from_str(raw.get()).map_err(|e| {
        ProxyError::InvalidRequest(format!("query {} is not a JSON object: {}", index, e))
    })?;
    let ref_id = header
        .ref_id
        .filter(|r| !r.is_empty())
        .ok_or_else(|| ProxyError::InvalidRequest(format!("query {} has no refId", index)))?;

    if header.hide == Some(Value::Bool(true)) {
        debug!(ref_id = %ref_id, "Skipping hidden query");
        return Ok(None);
    }

    let mut query = PanelQuery::new(ref_id, raw.get().as_bytes().to_vec());
    match (
        paging_hint("intervalMs", header.interval_ms),
        paging_hint("maxDataPoints", header.max_data_points),
    ) {
        (Ok(interval), Ok(max)) => {
            query = query.with_interval_ms(interval.unwrap_or_default());
            if let Some(max) = max {
                query = query.with_max_data_points(max);
            }
        }
        (Err(reason), _) | (_, Err(reason)) => query = query.malformed(reason),
    }
    Ok(Some(query))
}

fn paging_hint(name: &str, value: Option<Value>) -> Result<Option<i64>, String> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_i64()
            .map(Some)
            .ok_or_else(|| format!("{} must be an integer, got {}", name, value)),
    }
}

/// Run a batch of panel queries
///
/// POST /api/query
pub async fn query(
    State(state): State<Arc<AppState>>,
    Json(body): Json<QueryBody>,
) -> Result<Json<QueryResponse>, ProxyError> {
    let request = body.into_request(None)?;
    info!(queries = request.queries.len(), "Handling POST /api/query");

    let response = state.proxy.query(&request).await;
    state.stats.record_call(&response);

    Ok(Json(response))
}

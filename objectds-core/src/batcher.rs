//! Request batching.
//!
//! Every panel query of a call goes into one shared [`ProxiedEnvelope`]. The
//! query's `config.query` object is forwarded with the paging hints merged in;
//! a query whose payload cannot be parsed is left out of the envelope and
//! reported back as [`QueryError::MalformedQuery`] without affecting the rest.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::QueryError;
use crate::model::{PanelQuery, QueryRequest};
use crate::time_range::TimeRange;
use crate::wire::ProxiedEnvelope;

/// Target of a panel query: which upstream datasource and what to ask it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryLink {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Map<String, Value>>,
}

/// Payload of a panel query as sent by the front end
#[derive(Debug, Deserialize)]
struct ObjectQuery {
    #[serde(default)]
    name: String,
    config: QueryLink,
}

/// Result of batching one call
#[derive(Debug)]
pub struct Batch {
    pub envelope: ProxiedEnvelope,

    /// `refId`s whose payloads made it into the envelope, in envelope order
    pub accepted: Vec<String>,

    /// `refId`s that were left out, with the reason
    pub rejected: Vec<(String, QueryError)>,
}

impl Batch {
    /// Whether there is nothing to send upstream
    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty()
    }
}

/// Build the shared envelope for a call
pub fn build_batch(request: &QueryRequest) -> Batch {
    let mut seen = HashSet::new();
    let mut queries = Vec::with_capacity(request.queries.len());
    let mut accepted = Vec::with_capacity(request.queries.len());
    let mut rejected = Vec::new();

    for query in &request.queries {
        if !seen.insert(query.ref_id.as_str()) {
            warn!(ref_id = %query.ref_id, "Duplicate refId in call, keeping the first query");
            continue;
        }

        match prepare_query(query, request.max_data_points) {
            Ok(payload) => {
                queries.push(payload);
                accepted.push(query.ref_id.clone());
            }
            Err(e) => {
                debug!(ref_id = %query.ref_id, error = %e, "Rejecting query");
                rejected.push((query.ref_id.clone(), e));
            }
        }
    }

    Batch { envelope: envelope(&request.time_range, queries), accepted, rejected }
}

/// Merge the paging hints into a query's `config.query` and serialize it
pub fn prepare_query(
    query: &PanelQuery,
    default_max_data_points: i64,
) -> Result<Box<RawValue>, QueryError> {
    if let Some(reason) = &query.malformed {
        return Err(QueryError::malformed_query(reason.clone()));
    }
    let parsed: ObjectQuery = serde_json::from_slice(&query.payload)
        .map_err(|e| QueryError::malformed_query(e.to_string()))?;

    let mut inner = parsed.config.query.ok_or_else(|| {
        QueryError::malformed_query(format!("query '{}' has no config.query object", parsed.name))
    })?;

    let max_data_points = query.max_data_points.unwrap_or(default_max_data_points);
    inner.insert("intervalMs".to_string(), Value::from(query.interval_ms));
    inner.insert("maxDataPoints".to_string(), Value::from(max_data_points));
    inner.insert("limit".to_string(), Value::from(max_data_points));
    inner.insert("refId".to_string(), Value::from(query.ref_id.clone()));

    let json =
        serde_json::to_string(&inner).map_err(|e| QueryError::malformed_query(e.to_string()))?;
    RawValue::from_string(json).map_err(|e| QueryError::malformed_query(e.to_string()))
}

/// Wrap already-serialized queries into an envelope for `time_range`
pub fn envelope(time_range: &TimeRange, queries: Vec<Box<RawValue>>) -> ProxiedEnvelope {
    let (from, to) = time_range.to_wire();
    ProxiedEnvelope { from, to, queries }
}

//! Query and frame model.
//!
//! Inbound panel queries carry an opaque JSON payload; outbound results are
//! column-aligned [`Frame`]s keyed by the `refId` of the query that asked for
//! them. The serde form of [`Frame`] is also the canonical blob encoding used
//! by upstreams that ship pre-serialized frames.

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueryError;
use crate::time_range::TimeRange;

/// One panel query as received from the front end
#[derive(Debug, Clone)]
pub struct PanelQuery {
    /// Unique identifier within one call; results are keyed by it
    pub ref_id: String,

    /// Suggested interval between points in milliseconds
    pub interval_ms: i64,

    /// Per-query maximum number of points, overriding the call-level hint
    pub max_data_points: Option<i64>,

    /// Raw JSON of the query: `{"name": .., "config": {"uid": .., "query": {..}}}`
    pub payload: Bytes,

    /// Why the query's own header could not be read; the query is rejected
    /// alone and never sent
    pub malformed: Option<String>,
}

impl PanelQuery {
    /// Create a query with no paging hints
    pub fn new(ref_id: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            ref_id: ref_id.into(),
            interval_ms: 0,
            max_data_points: None,
            payload: payload.into(),
            malformed: None,
        }
    }

    pub fn with_interval_ms(mut self, interval_ms: i64) -> Self {
        self.interval_ms = interval_ms;
        self
    }

    pub fn with_max_data_points(mut self, max_data_points: i64) -> Self {
        self.max_data_points = Some(max_data_points);
        self
    }

    pub fn malformed(mut self, reason: impl Into<String>) -> Self {
        self.malformed = Some(reason.into());
        self
    }
}

/// Everything needed for one proxied call
#[derive(Debug, Clone)]
pub struct QueryRequest {
    /// Queries in submission order
    pub queries: Vec<PanelQuery>,

    /// Shared time range of all queries
    pub time_range: TimeRange,

    /// Call-level maximum points, used when a query has none of its own
    pub max_data_points: i64,
}

impl QueryRequest {
    pub fn new(queries: Vec<PanelQuery>, time_range: TimeRange) -> Self {
        Self { queries, time_range, max_data_points: DEFAULT_MAX_DATA_POINTS }
    }

    pub fn with_max_data_points(mut self, max_data_points: i64) -> Self {
        self.max_data_points = max_data_points;
        self
    }
}

/// Max data points used when neither the call nor the query sets one
pub const DEFAULT_MAX_DATA_POINTS: i64 = 1000;

/// Typed column values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum FieldValues {
    Time(Vec<Option<DateTime<Utc>>>),
    Float64(Vec<Option<f64>>),
    String(Vec<Option<String>>),
}

impl FieldValues {
    pub fn len(&self) -> usize {
        match self {
            Self::Time(v) => v.len(),
            Self::Float64(v) => v.len(),
            Self::String(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of missing values
    pub fn null_count(&self) -> usize {
        match self {
            Self::Time(v) => v.iter().filter(|x| x.is_none()).count(),
            Self::Float64(v) => v.iter().filter(|x| x.is_none()).count(),
            Self::String(v) => v.iter().filter(|x| x.is_none()).count(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Time(_) => "time",
            Self::Float64(_) => "float64",
            Self::String(_) => "string",
        }
    }
}

/// One named, typed column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Whether `values` may contain `None`
    #[serde(default)]
    pub nullable: bool,

    pub values: FieldValues,
}

impl Field {
    pub fn new(name: impl Into<String>, values: FieldValues) -> Self {
        Self { name: name.into(), labels: BTreeMap::new(), nullable: false, values }
    }

    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Column-aligned set of fields; the canonical output unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    pub name: String,

    /// Set by the proxy to the owning query, never taken from upstream
    #[serde(default)]
    pub ref_id: String,

    #[serde(default)]
    pub fields: Vec<Field>,
}

impl Frame {
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Self { name: name.into(), ref_id: String::new(), fields }
    }

    /// Number of rows, taken from the first field
    pub fn row_count(&self) -> usize {
        self.fields.first().map(Field::len).unwrap_or(0)
    }

    /// Check that every field has the same length and honours its nullability
    pub fn validate(&self) -> Result<(), QueryError> {
        let rows = self.row_count();
        for field in &self.fields {
            if field.len() != rows {
                return Err(QueryError::result(format!(
                    "frame '{}': field '{}' has {} values, expected {}",
                    self.name,
                    field.name,
                    field.len(),
                    rows
                )));
            }
            if !field.nullable && field.values.null_count() > 0 {
                return Err(QueryError::result(format!(
                    "frame '{}': non-nullable field '{}' contains nulls",
                    self.name, field.name
                )));
            }
        }
        Ok(())
    }

    /// Serialize into the canonical blob encoding
    pub fn to_blob(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parse a canonical blob and check column alignment
    pub fn from_blob(bytes: &[u8]) -> Result<Self, QueryError> {
        let frame: Frame = serde_json::from_slice(bytes)
            .map_err(|e| QueryError::result(format!("invalid frame blob: {}", e)))?;
        frame.validate()?;
        Ok(frame)
    }
}

/// Outcome of one panel query
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub frames: Vec<Frame>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<QueryError>,
}

impl QueryResult {
    pub fn frames(frames: Vec<Frame>) -> Self {
        Self { frames, error: None }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn error(error: QueryError) -> Self {
        Self { frames: Vec::new(), error: Some(error) }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Results of one call, keyed by `refId`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResponse {
    pub results: BTreeMap<String, QueryResult>,
}

impl QueryResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, ref_id: impl Into<String>, result: QueryResult) {
        self.results.insert(ref_id.into(), result);
    }

    pub fn get(&self, ref_id: &str) -> Option<&QueryResult> {
        self.results.get(ref_id)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Number of entries carrying an error
    pub fn error_count(&self) -> usize {
        self.results.values().filter(|r| !r.is_ok()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_frame() -> Frame {
        let mut labels = BTreeMap::new();
        labels.insert("host".to_string(), "a".to_string());
        Frame::new(
            "cpu",
            vec![
                Field::new(
                    "time",
                    FieldValues::Time(vec![
                        Some(Utc.timestamp_opt(1, 500_000_000).unwrap()),
                        Some(Utc.timestamp_opt(2, 0).unwrap()),
                    ]),
                ),
                Field::new("value", FieldValues::Float64(vec![Some(0.25), Some(3.14)]))
                    .with_labels(labels),
            ],
        )
    }

    #[test]
    fn test_blob_round_trip_is_byte_identical() {
        let blob = sample_frame().to_blob().unwrap();
        let decoded = Frame::from_blob(&blob).unwrap();
        assert_eq!(decoded, sample_frame());
        assert_eq!(decoded.to_blob().unwrap(), blob);
    }

    #[test]
    fn test_validate_rejects_misaligned_fields() {
        let mut frame = sample_frame();
        frame.fields[1].values = FieldValues::Float64(vec![Some(1.0)]);
        let err = frame.validate().unwrap_err();
        assert!(matches!(err, QueryError::MalformedResult(_)));
    }

    #[test]
    fn test_validate_rejects_nulls_in_non_nullable_field() {
        let mut frame = sample_frame();
        frame.fields[1].values = FieldValues::Float64(vec![Some(1.0), None]);
        assert!(frame.validate().is_err());

        frame.fields[1].nullable = true;
        assert!(frame.validate().is_ok());
    }

    #[test]
    fn test_from_blob_rejects_garbage() {
        let err = Frame::from_blob(b"{\"name\": 3}").unwrap_err();
        assert!(matches!(err, QueryError::MalformedResult(_)));
    }

    #[test]
    fn test_query_response_counts() {
        let mut response = QueryResponse::new();
        response.insert("A", QueryResult::frames(vec![sample_frame()]));
        response.insert("B", QueryResult::error(QueryError::malformed_query("bad json")));
        response.insert("C", QueryResult::empty());

        assert_eq!(response.len(), 3);
        assert_eq!(response.error_count(), 1);
        assert!(response.get("C").unwrap().frames.is_empty());
    }
}

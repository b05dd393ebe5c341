//! Upstream wire types.
//!
//! Outbound, one [`ProxiedEnvelope`] carries every query of a call. Inbound,
//! the upstream answers with `{"results": {"<refId>": {...}}}` where each
//! result is one of several shapes:
//!
//! ```text
//! {"frames":     ["<base64 frame blob>", ...]}          -> SerializedBlob
//! {"dataframes": ["<base64 frame blob>", ...]}          -> SerializedBlob
//! {"name": "..", "fields": [{"name", "typeinfo", ..}]}  -> RawColumnar
//! {}                                                    -> Empty
//! ```

use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::{Number, Value};

use crate::error::QueryError;

/// Batched outbound request body
#[derive(Debug, Serialize, Deserialize)]
pub struct ProxiedEnvelope {
    /// Range start, epoch milliseconds as a decimal string
    pub from: String,

    /// Range end, epoch milliseconds as a decimal string
    pub to: String,

    /// One serialized payload per accepted panel query, in submission order
    pub queries: Vec<Box<RawValue>>,
}

impl ProxiedEnvelope {
    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}

/// Batched upstream response; results stay unparsed until demultiplexed
#[derive(Debug, Deserialize)]
pub struct ProxiedResponse {
    #[serde(default)]
    pub results: HashMap<String, Box<RawValue>>,
}

impl ProxiedResponse {
    pub fn from_slice(body: &[u8]) -> Result<Self, QueryError> {
        serde_json::from_slice(body).map_err(|e| QueryError::envelope(e.to_string()))
    }
}

/// One result as it appears on the wire
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResult {
    #[serde(default)]
    error: Option<String>,

    #[serde(default)]
    frames: Option<Vec<FrameBlob>>,

    #[serde(default)]
    dataframes: Option<Vec<FrameBlob>>,

    #[serde(default)]
    name: Option<String>,

    #[serde(default)]
    fields: Option<Vec<RawField>>,
}

/// A pre-serialized frame
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FrameBlob {
    /// Base64 of the canonical frame JSON
    Encoded(String),
    /// Canonical frame JSON inlined as an object
    Inline(Value),
}

/// Raw columnar description of one frame
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub name: String,
    pub fields: Vec<RawField>,
}

/// One raw column with untyped values
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawField {
    pub name: String,

    #[serde(default)]
    pub labels: Option<BTreeMap<String, String>>,

    #[serde(default)]
    pub config: Option<RawFieldConfig>,

    #[serde(default, rename = "typeinfo", alias = "typeInfo")]
    pub type_info: RawTypeInfo,

    #[serde(default)]
    pub values: Vec<Value>,
}

impl RawField {
    /// Labels from `labels`, falling back to `config.labels`
    pub fn labels(&self) -> BTreeMap<String, String> {
        self.labels
            .clone()
            .or_else(|| self.config.as_ref().and_then(|c| c.labels.clone()))
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawFieldConfig {
    #[serde(default)]
    pub labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawTypeInfo {
    /// Type tag, e.g. `time.Time`, `*time.Time`, `float64`
    #[serde(default)]
    pub frame: String,

    #[serde(default)]
    pub nullable: bool,
}

/// One upstream result, classified by which encoding is present
#[derive(Debug, Clone, PartialEq)]
pub enum ProxiedResult {
    RawColumnar(RawFrame),
    SerializedBlob(Vec<FrameBlob>),
    Empty,
}

impl ProxiedResult {
    /// Parse and classify one result. Upstream-reported errors come back as
    /// [`QueryError::Upstream`].
    pub fn parse(raw: &RawValue) -> Result<Self, QueryError> {
        let wire: WireResult = serde_json::from_str(raw.get())
            .map_err(|e| QueryError::result(format!("invalid result: {}", e)))?;

        if let Some(error) = wire.error.filter(|e| !e.is_empty()) {
            return Err(QueryError::Upstream(error));
        }

        if wire.frames.is_some() || wire.dataframes.is_some() {
            let blobs = wire.frames.into_iter().chain(wire.dataframes).flatten().collect();
            return Ok(Self::SerializedBlob(blobs));
        }

        match wire.fields {
            Some(fields) => {
                Ok(Self::RawColumnar(RawFrame { name: wire.name.unwrap_or_default(), fields }))
            }
            None => Ok(Self::Empty),
        }
    }

    pub fn encoding(&self) -> &'static str {
        match self {
            Self::RawColumnar(_) => "raw_columnar",
            Self::SerializedBlob(_) => "serialized_blob",
            Self::Empty => "empty",
        }
    }
}

/// Untyped scalar accepted in raw field values
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Number(Number),
    String(String),
    Null,
}

impl TryFrom<&Value> for Scalar {
    type Error = ();

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        match value {
            Value::Number(n) => Ok(Self::Number(n.clone())),
            Value::String(s) => Ok(Self::String(s.clone())),
            Value::Null => Ok(Self::Null),
            Value::Bool(_) | Value::Array(_) | Value::Object(_) => Err(()),
        }
    }
}

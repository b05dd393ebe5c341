//! Error types for the objectds core library
//!
//! Every failure a proxied query can run into is a [`QueryError`]. Errors are
//! attached to the `refId` they belong to rather than aborting the call, so the
//! type is `Clone`: call-wide failures are copied onto every outstanding query.
//!
//! # Error scope
//!
//! ```text
//! QueryError
//! ├── MalformedQuery            - one refId (payload unparseable)
//! ├── TransportFailure          - every refId in the call
//! ├── MalformedResponseEnvelope - every refId in the call
//! ├── MalformedResult           - one refId (result undecodable)
//! ├── UnsupportedFieldType      - one refId (value/type mismatch)
//! └── Upstream                  - one refId (upstream reported an error)
//! ```

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use thiserror::Error;

/// Errors that can be attached to a single query result
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// The panel query payload could not be parsed or re-serialized
    #[error("malformed query: {0}")]
    MalformedQuery(String),

    /// The outbound call could not be sent, timed out, or was rejected
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// The top-level batched response could not be parsed
    #[error("malformed response envelope: {0}")]
    MalformedResponseEnvelope(String),

    /// One result inside the batched response could not be decoded
    #[error("malformed result: {0}")]
    MalformedResult(String),

    /// A field value does not match the decoder chosen by its type tag
    #[error("unsupported value {value} for field '{field}' of type '{kind}'")]
    UnsupportedFieldType { field: String, kind: String, value: String },

    /// The upstream reported an error for this query
    #[error("upstream error: {0}")]
    Upstream(String),
}

impl QueryError {
    /// Create a malformed query error
    pub fn malformed_query(msg: impl Into<String>) -> Self {
        Self::MalformedQuery(msg.into())
    }

    /// Create a transport failure
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::TransportFailure(msg.into())
    }

    /// Create a malformed envelope error
    pub fn envelope(msg: impl Into<String>) -> Self {
        Self::MalformedResponseEnvelope(msg.into())
    }

    /// Create a malformed result error
    pub fn result(msg: impl Into<String>) -> Self {
        Self::MalformedResult(msg.into())
    }

    /// Create an unsupported field type error
    pub fn unsupported(
        field: impl Into<String>,
        kind: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::UnsupportedFieldType { field: field.into(), kind: kind.into(), value: value.into() }
    }

    /// Stable machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedQuery(_) => "MalformedQuery",
            Self::TransportFailure(_) => "TransportFailure",
            Self::MalformedResponseEnvelope(_) => "MalformedResponseEnvelope",
            Self::MalformedResult(_) => "MalformedResult",
            Self::UnsupportedFieldType { .. } => "UnsupportedFieldType",
            Self::Upstream(_) => "Upstream",
        }
    }

    /// Whether this error applies to every query of a call
    pub fn is_call_fatal(&self) -> bool {
        matches!(self, Self::TransportFailure(_) | Self::MalformedResponseEnvelope(_))
    }
}

impl Serialize for QueryError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("QueryError", 2)?;
        state.serialize_field("kind", self.kind())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

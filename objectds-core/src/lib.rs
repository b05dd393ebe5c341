//! objectds core library
//!
//! Query model, request batching and response decoding for the objectds
//! query proxy. Nothing in here does I/O: the proxy crate owns the transport
//! and feeds raw response bytes through [`demux::demultiplex`].

pub mod batcher;
pub mod decoder;
pub mod demux;
pub mod error;
pub mod model;
pub mod time_range;
pub mod wire;

pub use error::QueryError;
pub use model::{Field, FieldValues, Frame, PanelQuery, QueryRequest, QueryResponse, QueryResult};
pub use time_range::TimeRange;

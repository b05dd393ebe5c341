//! HTTP route handlers for the objectds proxy.
//!
//! - `query`: batched panel queries
//! - `health`: health check and metrics endpoints
//! - `settings`: instance settings replacement

pub mod health;
pub mod query;
pub mod settings;

pub use health::{health, live, metrics, metrics_prometheus};
pub use query::{query, QueryBody};
pub use settings::update_settings;

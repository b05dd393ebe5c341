//! Time ranges and their wire encoding.
//!
//! Upstream expects both ends of the range as decimal strings of
//! milliseconds since the Unix epoch.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Half-open interval `[from, to)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    /// The range ending now and spanning `span`, if its start is representable
    pub fn last(span: Duration) -> Option<Self> {
        let to = Utc::now();
        to.checked_sub_signed(span).map(|from| Self { from, to })
    }

    pub fn duration(&self) -> Duration {
        self.to - self.from
    }

    /// Encode both ends as millisecond epoch strings
    pub fn to_wire(&self) -> (String, String) {
        (epoch_millis(&self.from).to_string(), epoch_millis(&self.to).to_string())
    }
}

/// Milliseconds since the epoch, truncated toward zero
pub fn epoch_millis(instant: &DateTime<Utc>) -> i64 {
    let nanos = i128::from(instant.timestamp()) * 1_000_000_000
        + i128::from(instant.timestamp_subsec_nanos());
    (nanos / 1_000_000) as i64
}

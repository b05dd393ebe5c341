//! Response demultiplexing.
//!
//! Splits the batched upstream response back into one [`QueryResult`] per
//! outstanding `refId`. Correlation is by key, never by position.

use tracing::{debug, warn};

use crate::decoder;
use crate::error::QueryError;
use crate::model::{QueryResponse, QueryResult};
use crate::time_range::TimeRange;
use crate::wire::{ProxiedResponse, ProxiedResult};

/// Decode a batched response body for the given `refId`s.
///
/// Fails as a whole only when the envelope itself cannot be parsed. A `refId`
/// missing from the response gets an empty, error-free result.
pub fn demultiplex<S: AsRef<str>>(
    body: &[u8],
    outstanding: &[S],
    time_range: &TimeRange,
) -> Result<QueryResponse, QueryError> {
    let mut response = ProxiedResponse::from_slice(body)?;
    let mut out = QueryResponse::new();

    for ref_id in outstanding.iter().map(AsRef::as_ref) {
        let result = match response.results.remove(ref_id) {
            Some(raw) => decode_one(ref_id, &raw, time_range),
            None => {
                debug!(ref_id, "No result returned for query");
                QueryResult::empty()
            }
        };
        out.insert(ref_id, result);
    }

    for ref_id in response.results.keys() {
        debug!(ref_id = %ref_id, "Ignoring result for a query that was not sent");
    }

    Ok(out)
}

/// Decode one result and stamp its frames with the owning `refId`
fn decode_one(
    ref_id: &str,
    raw: &serde_json::value::RawValue,
    time_range: &TimeRange,
) -> QueryResult {
    let decoded = ProxiedResult::parse(raw).and_then(|result| {
        debug!(ref_id, encoding = result.encoding(), "Decoding result");
        decoder::decode(result, time_range)
    });

    match decoded {
        Ok(mut frames) => {
            for frame in &mut frames {
                frame.ref_id = ref_id.to_string();
            }
            QueryResult::frames(frames)
        }
        Err(e) => {
            warn!(ref_id, error = %e, "Failed to decode result");
            QueryResult::error(e)
        }
    }
}

/// The same error for every `refId`
pub fn fail_all<S: AsRef<str>>(ref_ids: &[S], error: &QueryError) -> QueryResponse {
    let mut out = QueryResponse::new();
    for ref_id in ref_ids {
        out.insert(ref_id.as_ref(), QueryResult::error(error.clone()));
    }
    out
}

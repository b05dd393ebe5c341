//! Per-call control flow.
//!
//! ```text
//! Idle -> Batching -> AwaitingResponse -> Demultiplexing -> Done
//! ```
//!
//! One call is one upstream round trip. Every input `refId` gets exactly one
//! entry in the response; a transport failure or an unreadable response
//! envelope is copied onto every query that was sent.

use std::sync::Arc;

use arc_swap::ArcSwap;
use objectds_core::batcher::{self, Batch};
use objectds_core::{demux, QueryError, QueryRequest, QueryResponse, QueryResult};
use tracing::{debug, info, instrument, warn};

use crate::error::ProxyError;
use crate::metrics::{self, UpstreamTimer};
use crate::settings::Settings;
use crate::transport::{HttpTransport, Transport, UpstreamRequest, UpstreamResponse};

/// Longest upstream body excerpt carried in a transport error
const ERROR_BODY_LIMIT: usize = 256;

/// Immutable snapshot of one configured datasource instance
pub struct Instance {
    pub settings: Settings,
    transport: Arc<dyn Transport>,
}

impl Instance {
    /// Build an instance with an HTTP transport honouring the settings' timeout
    pub fn new(settings: Settings) -> Result<Self, ProxyError> {
        let transport =
            HttpTransport::new(settings.timeout).map_err(|e| ProxyError::Transport(e.to_string()))?;
        Ok(Self::with_transport(settings, Arc::new(transport)))
    }

    pub fn with_transport(settings: Settings, transport: Arc<dyn Transport>) -> Self {
        Self { settings, transport }
    }

    /// POST `body` to the upstream query endpoint. Anything but a 2xx reply
    /// is a transport failure.
    pub(crate) async fn send(&self, body: bytes::Bytes) -> Result<UpstreamResponse, QueryError> {
        let request = UpstreamRequest {
            url: self.settings.query_url(),
            authorization: self.settings.authorization(),
            body,
        };

        let timer = UpstreamTimer::start();
        let response = match self.transport.post(request).await {
            Ok(response) => {
                timer.record_status(response.status);
                response
            }
            Err(e) => {
                timer.record_failure();
                return Err(QueryError::transport(e.to_string()));
            }
        };

        if !response.is_success() {
            let body = String::from_utf8_lossy(&response.body);
            let excerpt: String = body.chars().take(ERROR_BODY_LIMIT).collect();
            return Err(QueryError::transport(format!(
                "upstream returned status {}: {}",
                response.status, excerpt
            )));
        }

        Ok(response)
    }
}

/// Stage of one proxied call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    Batching,
    AwaitingResponse,
    Demultiplexing,
    Done,
}

impl CallState {
    fn advance(&mut self, next: CallState) {
        debug!(from = ?*self, to = ?next, "Call state");
        *self = next;
    }
}

/// Forwards panel queries upstream and assembles their results
pub struct QueryProxy {
    instance: ArcSwap<Instance>,
}

impl QueryProxy {
    pub fn new(instance: Instance) -> Self {
        Self { instance: ArcSwap::from_pointee(instance) }
    }

    /// Current instance snapshot
    pub fn instance(&self) -> Arc<Instance> {
        self.instance.load_full()
    }

    /// Replace the instance wholesale; in-flight calls keep their snapshot
    pub fn update(&self, instance: Instance) {
        info!(url = %instance.settings.url, "Replacing instance settings");
        self.instance.store(Arc::new(instance));
    }

    /// Run one call
    #[instrument(skip(self, request), fields(queries = request.queries.len()))]
    pub async fn query(&self, request: &QueryRequest) -> QueryResponse {
        let instance = self.instance();
        let mut state = CallState::Idle;

        state.advance(CallState::Batching);
        let Batch { envelope, accepted, rejected } = batcher::build_batch(request);

        let mut response = QueryResponse::new();
        for (ref_id, error) in rejected {
            response.insert(ref_id, QueryResult::error(error));
        }

        if !accepted.is_empty() {
            let sent = match envelope.to_bytes() {
                Ok(body) => {
                    state.advance(CallState::AwaitingResponse);
                    instance.send(body).await
                }
                Err(e) => Err(QueryError::malformed_query(e.to_string())),
            };

            state.advance(CallState::Demultiplexing);
            let results = sent
                .and_then(|upstream| {
                    demux::demultiplex(&upstream.body, &accepted, &request.time_range)
                })
                .unwrap_or_else(|e| {
                    warn!(error = %e, queries = accepted.len(), "Call failed for every query");
                    demux::fail_all(&accepted, &e)
                });
            response.results.extend(results.results);
        }

        state.advance(CallState::Done);
        for result in response.results.values() {
            let status = result.error.as_ref().map(QueryError::kind).unwrap_or("ok");
            metrics::record_query(status, result.frames.len());
        }
        info!(results = response.len(), errors = response.error_count(), "Call complete");

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::{TimeZone, Utc};
    use objectds_core::{PanelQuery, TimeRange};
    use serde_json::{json, Value};
    use std::sync::Mutex;

    /// Replies with a fixed response and remembers what was sent
    struct StubTransport {
        reply: Result<(u16, Value), String>,
        sent: Mutex<Vec<UpstreamRequest>>,
    }

    impl StubTransport {
        fn ok(body: Value) -> Arc<Self> {
            Arc::new(Self { reply: Ok((200, body)), sent: Mutex::new(Vec::new()) })
        }

        fn status(status: u16, body: Value) -> Arc<Self> {
            Arc::new(Self { reply: Ok((status, body)), sent: Mutex::new(Vec::new()) })
        }

        fn refused() -> Arc<Self> {
            Arc::new(Self { reply: Err("connection refused".into()), sent: Mutex::new(Vec::new()) })
        }

        fn calls(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Transport for StubTransport {
        async fn post(&self, request: UpstreamRequest) -> Result<UpstreamResponse, TransportError> {
            self.sent.lock().unwrap().push(request);
            match &self.reply {
                Ok((status, body)) => Ok(UpstreamResponse {
                    status: *status,
                    body: Bytes::from(body.to_string()),
                }),
                Err(e) => Err(TransportError::Connect(e.clone())),
            }
        }
    }

    fn proxy(transport: Arc<StubTransport>) -> QueryProxy {
        let settings = Settings::new("http://upstream").with_api_token("tok");
        QueryProxy::new(Instance::with_transport(settings, transport))
    }

    fn query(ref_id: &str) -> PanelQuery {
        PanelQuery::new(ref_id, r#"{"name":"q","config":{"uid":"u","query":{"expr":"up"}}}"#)
    }

    fn request(queries: Vec<PanelQuery>) -> QueryRequest {
        let range =
            TimeRange::new(Utc.timestamp_opt(0, 0).unwrap(), Utc.timestamp_opt(60, 0).unwrap());
        QueryRequest::new(queries, range)
    }

    fn raw_result() -> Value {
        json!({
            "name": "series",
            "fields": [
                { "name": "time", "typeinfo": { "frame": "time.Time" }, "values": [1000] },
                { "name": "value", "typeinfo": { "frame": "float64" }, "values": [1.0] },
            ]
        })
    }

    #[tokio::test]
    async fn test_malformed_query_does_not_affect_siblings() {
        let transport =
            StubTransport::ok(json!({ "results": { "A": raw_result(), "C": raw_result() } }));
        let proxy = proxy(transport.clone());

        let response = proxy
            .query(&request(vec![
                query("A"),
                PanelQuery::new("B", "{not json"),
                query("C"),
            ]))
            .await;

        assert_eq!(response.len(), 3);
        assert!(response.get("A").unwrap().is_ok());
        assert!(response.get("C").unwrap().is_ok());
        let b = response.get("B").unwrap();
        assert!(matches!(b.error, Some(QueryError::MalformedQuery(_))));
        assert!(b.frames.is_empty());
        for (ref_id, result) in &response.results {
            assert!(result.frames.iter().all(|f| &f.ref_id == ref_id));
        }
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_is_shared_by_every_query() {
        let proxy = proxy(StubTransport::refused());
        let response = proxy.query(&request(vec![query("A"), query("B")])).await;

        let a = response.get("A").unwrap();
        let b = response.get("B").unwrap();
        assert!(matches!(a.error, Some(QueryError::TransportFailure(_))));
        assert_eq!(a.error, b.error);
        assert!(a.frames.is_empty() && b.frames.is_empty());
    }

    #[tokio::test]
    async fn test_error_status_is_a_transport_failure() {
        let proxy = proxy(StubTransport::status(502, json!({ "message": "bad gateway" })));
        let response = proxy.query(&request(vec![query("A")])).await;
        match &response.get("A").unwrap().error {
            Some(QueryError::TransportFailure(msg)) => assert!(msg.contains("502")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_envelope_fails_every_sent_query_only() {
        let transport = StubTransport::ok(json!("not an envelope"));
        let proxy = proxy(transport);
        let response = proxy.query(&request(vec![query("A"), PanelQuery::new("B", "[]")])).await;

        assert!(matches!(
            response.get("A").unwrap().error,
            Some(QueryError::MalformedResponseEnvelope(_))
        ));
        assert!(matches!(response.get("B").unwrap().error, Some(QueryError::MalformedQuery(_))));
    }

    #[tokio::test]
    async fn test_omitted_ref_id_is_empty() {
        let proxy = proxy(StubTransport::ok(json!({ "results": { "A": raw_result() } })));
        let response = proxy.query(&request(vec![query("A"), query("B")])).await;

        let b = response.get("B").unwrap();
        assert!(b.is_ok());
        assert!(b.frames.is_empty());
    }

    #[tokio::test]
    async fn test_all_malformed_skips_round_trip() {
        let transport = StubTransport::ok(json!({ "results": {} }));
        let proxy = proxy(transport.clone());
        let response = proxy.query(&request(vec![PanelQuery::new("A", "nope")])).await;

        assert_eq!(response.len(), 1);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_envelope_and_headers() {
        let transport = StubTransport::ok(json!({ "results": {} }));
        let proxy = proxy(transport.clone());
        proxy.query(&request(vec![query("A").with_interval_ms(500)])).await;

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent[0].url, "http://upstream/api/ds/query");
        assert_eq!(sent[0].authorization.as_deref(), Some("Bearer tok"));

        let envelope: Value = serde_json::from_slice(&sent[0].body).unwrap();
        assert_eq!(envelope["from"], "0");
        assert_eq!(envelope["to"], "60000");
        assert_eq!(envelope["queries"][0]["refId"], "A");
        assert_eq!(envelope["queries"][0]["intervalMs"], 500);
    }

    #[tokio::test]
    async fn test_update_swaps_instance() {
        let first = StubTransport::ok(json!({ "results": {} }));
        let second = StubTransport::ok(json!({ "results": {} }));
        let proxy = proxy(first.clone());

        let snapshot = proxy.instance();
        proxy.update(Instance::with_transport(Settings::new("http://other"), second.clone()));
        assert_eq!(snapshot.settings.url, "http://upstream");
        assert_eq!(proxy.instance().settings.url, "http://other");

        proxy.query(&request(vec![query("A")])).await;
        assert_eq!(first.calls(), 0);
        assert_eq!(second.calls(), 1);
    }
}

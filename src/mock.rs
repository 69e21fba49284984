//! # Mock Transport & Testing Guide
//!
//! [`MockTransport`] implements the [`Transport`](crate::transport::Transport)
//! contract entirely in-memory. It lets you queue expectations and canned
//! responses for unit tests, enabling fast, deterministic testing of the
//! engine without any network.
//!
//! Expectations are consumed in FIFO order; a request that arrives with no
//! matching expectation panics, and [`MockTransport::verify`] panics when
//! expectations remain unconsumed. Every call is recorded, so tests can
//! assert on call counts (the single-flight guarantees) and on the exact
//! normalized body that went out.
//!
//! ```rust
//! use std::sync::Arc;
//! use jsonapi_engine::{Engine, Method, MockTransport, SchemaRegistry};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut schemas = SchemaRegistry::new();
//!     schemas.register("widget", &[]);
//!
//!     let transport = Arc::new(MockTransport::new());
//!     transport.expect(Method::Post, "widget").return_json(json!({
//!         "data": {"type": "widget", "id": "42", "attributes": {"name": "x"}}
//!     }));
//!
//!     let engine = Engine::new(schemas, transport.clone(), "https://api.example.com/");
//!     let widget = engine.create("widget").unwrap();
//!     engine.set_attr(widget, "name", json!("x"));
//!     engine.save(widget).await.unwrap();
//!
//!     assert_eq!(engine.resource(widget).unwrap().id, "42");
//!     transport.verify();
//! }
//! ```

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::document::Document;
use crate::error::TransportError;
use crate::transport::{Method, Transport};

struct Expectation {
    method: Method,
    path: String,
    response: Result<Value, TransportError>,
}

/// One request as the mock saw it, body already normalized by the request
/// layer.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

/// An in-memory transport with expectation tracking.
#[derive(Default)]
pub struct MockTransport {
    expectations: Mutex<VecDeque<Expectation>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an expectation for the next unconsumed request.
    pub fn expect(&self, method: Method, path: &str) -> ExpectationBuilder<'_> {
        ExpectationBuilder {
            mock: self,
            method,
            path: path.to_string(),
        }
    }

    /// Everything the mock has been asked to send so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Panics when queued expectations were never consumed.
    pub fn verify(&self) {
        let remaining = self.expectations.lock().len();
        if remaining > 0 {
            panic!("not all expectations were met: {remaining} remaining");
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        _base_url: &str,
        path: &str,
        method: Method,
        body: Option<Value>,
    ) -> Result<Value, TransportError> {
        self.calls.lock().push(RecordedCall {
            method,
            path: path.to_string(),
            body,
        });

        // Suspend once so concurrent callers interleave the way they would
        // against a real socket; single-flight tests depend on the first
        // request still being outstanding when the second caller arrives.
        tokio::task::yield_now().await;

        let expectation = self.expectations.lock().pop_front();
        match expectation {
            Some(expectation) => {
                if expectation.method != method || expectation.path != path {
                    panic!(
                        "unexpected request {method} {path}; expected {} {}",
                        expectation.method, expectation.path
                    );
                }
                expectation.response
            }
            None => panic!("unexpected request {method} {path}; no expectations queued"),
        }
    }
}

/// Fluent response half of [`MockTransport::expect`].
pub struct ExpectationBuilder<'a> {
    mock: &'a MockTransport,
    method: Method,
    path: String,
}

impl ExpectationBuilder<'_> {
    /// Responds with a raw JSON payload.
    pub fn return_json(self, value: Value) {
        self.push(Ok(value));
    }

    /// Responds with a wire document.
    pub fn return_document(self, document: Document) {
        let value = serde_json::to_value(document)
            .unwrap_or_else(|err| panic!("unencodable mock document: {err}"));
        self.push(Ok(value));
    }

    /// Rejects with the given transport error.
    pub fn return_err(self, error: TransportError) {
        self.push(Err(error));
    }

    fn push(self, response: Result<Value, TransportError>) {
        self.mock.expectations.lock().push_back(Expectation {
            method: self.method,
            path: self.path,
            response,
        });
    }
}

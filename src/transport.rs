//! # Transport Seam & Request Layer
//!
//! The [`Transport`] trait is the abstract collaborator that actually moves
//! bytes: `send(base_url, path, method, body) -> document | error`. The
//! engine never calls it directly; every call goes through the
//! [`RequestLayer`], which owns the concerns around the wire:
//!
//! - outgoing bodies are normalized (null attribute values become empty
//!   strings, relationships with empty data are stripped) before transmission
//! - reads are single-flighted through the [`RequestDeduper`]; writes always
//!   execute
//! - incoming payloads may arrive wrapped in a `{"body": ...}` envelope and
//!   failures in an `{"error": ...}` envelope; both are unwrapped here
//! - failures are routed to a pluggable [`ErrorReporter`] so a caller can
//!   observe them globally, split into offline (`status <= 0`) and genuine
//!   HTTP errors
//!
//! Retry, backoff, authentication, and cancellation are deliberately absent:
//! once a call is issued it runs to completion or failure.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::dedup::RequestDeduper;
use crate::document::Document;
use crate::error::{EngineError, TransportError};

/// HTTP-ish method of a transport call. `Get` is the only read; everything
/// else is a write and bypasses deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    pub fn is_read(&self) -> bool {
        matches!(self, Method::Get)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The external collaborator executing the actual call.
///
/// Implementations reject with a [`TransportError`] whose `status <= 0`
/// signals a connectivity failure distinct from an HTTP-level error status.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        base_url: &str,
        path: &str,
        method: Method,
        body: Option<Value>,
    ) -> Result<Value, TransportError>;
}

/// Global observer for transport failures.
///
/// Lets a caller watch every failure without handling it at each call site.
/// `on_offline` receives connectivity failures; `on_error` receives HTTP
/// failures unless the call suppressed reporting.
pub trait ErrorReporter: Send + Sync {
    fn on_error(&self, _error: &TransportError) {}
    fn on_offline(&self, _error: &TransportError) {}
}

/// The default reporter: observes nothing.
#[derive(Debug, Default)]
pub struct NoopReporter;

impl ErrorReporter for NoopReporter {}

/// Replaces every `null` in `value` with an empty string, recursively.
/// Servers in this protocol family treat null and absent as distinct; the
/// original wire contract transmits empty strings instead.
fn scrub_nulls(value: &mut Value) {
    match value {
        Value::Null => *value = Value::String(String::new()),
        Value::Array(items) => items.iter_mut().for_each(scrub_nulls),
        Value::Object(map) => map.values_mut().for_each(scrub_nulls),
        _ => {}
    }
}

/// Normalizes an outgoing document: null attribute values become empty
/// strings and relationships whose data is empty or absent are stripped
/// entirely.
pub(crate) fn prepare_body(document: &Document) -> Document {
    let mut doc = document.clone();
    let scrub = |obj: &mut crate::document::ResourceObject| {
        for value in obj.attributes.values_mut() {
            scrub_nulls(value);
        }
        obj.relationships.retain(|_, rel| !rel.data.is_empty());
    };
    match &mut doc.data {
        crate::document::PrimaryData::One(obj) => scrub(obj),
        crate::document::PrimaryData::Many(objs) => objs.iter_mut().for_each(scrub),
    }
    doc.included.iter_mut().for_each(scrub);
    doc
}

/// Unwraps a `{"body": ...}` envelope around a successful payload.
fn unwrap_body_envelope(raw: Value) -> Value {
    match raw {
        Value::Object(mut map) if map.contains_key("body") => {
            map.remove("body").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// The engine's single gateway to the transport collaborator.
pub struct RequestLayer {
    transport: Arc<dyn Transport>,
    deduper: RequestDeduper,
    reporter: Arc<dyn ErrorReporter>,
    base_url: String,
}

impl RequestLayer {
    pub fn new(transport: Arc<dyn Transport>, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            deduper: RequestDeduper::new(),
            reporter: Arc::new(NoopReporter),
            base_url: base_url.into(),
        }
    }

    pub fn set_reporter(&mut self, reporter: Arc<dyn ErrorReporter>) {
        self.reporter = reporter;
    }

    /// True while a read for `path` is outstanding.
    pub fn has_pending(&self, path: &str) -> bool {
        self.deduper.has_pending(path)
    }

    /// A deduplicated read returning the decoded document.
    pub async fn get(&self, path: &str) -> Result<Document, EngineError> {
        self.send(Method::Get, path, None, false).await
    }

    /// Executes a call and decodes the response as a wire document.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Document>,
        suppress_error_reporting: bool,
    ) -> Result<Document, EngineError> {
        let raw = self
            .execute(method, path, body, suppress_error_reporting)
            .await?;
        serde_json::from_value(raw)
            .map_err(|err| EngineError::MalformedDocument(format!("undecodable response: {err}")))
    }

    /// Executes a call and returns the raw payload. Used where the response
    /// body carries no document worth decoding, e.g. deletes.
    pub async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<&Document>,
        suppress_error_reporting: bool,
    ) -> Result<Value, EngineError> {
        let prepared = match body {
            Some(doc) => Some(serde_json::to_value(prepare_body(doc)).map_err(|err| {
                EngineError::MalformedDocument(format!("unencodable body: {err}"))
            })?),
            None => None,
        };

        debug!(%method, path, "transport call");
        let result = if method.is_read() && prepared.is_none() {
            self.deduper
                .deduped_get(path, || {
                    self.transport.send(&self.base_url, path, method, None)
                })
                .await
        } else {
            self.transport
                .send(&self.base_url, path, method, prepared)
                .await
        };

        match result {
            Ok(raw) => Ok(unwrap_body_envelope(raw)),
            Err(err) => {
                let err = err.unwrap_error_envelope();
                if err.is_offline() {
                    warn!(%method, path, status = err.status, "transport unreachable");
                    self.reporter.on_offline(&err);
                } else if !suppress_error_reporting {
                    warn!(%method, path, status = err.status, "transport call failed");
                    self.reporter.on_error(&err);
                }
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Identifier, RelationshipObject, ResourceObject};
    use serde_json::json;

    #[test]
    fn prepare_body_scrubs_nulls_and_strips_empty_relationships() {
        let mut obj = ResourceObject {
            resource_type: "widget".into(),
            id: "1".into(),
            ..Default::default()
        };
        obj.attributes.insert("name".into(), Value::Null);
        obj.attributes
            .insert("meta".into(), json!({"flag": null, "n": 3}));
        obj.relationships
            .insert("tags".into(), RelationshipObject::many(vec![]));
        obj.relationships.insert(
            "author".into(),
            RelationshipObject::one(Identifier::new("person", "7")),
        );
        obj.relationships
            .insert("cover".into(), RelationshipObject::empty());

        let prepared = prepare_body(&Document::single(obj));
        let value = serde_json::to_value(prepared).unwrap();

        assert_eq!(value["data"]["attributes"]["name"], json!(""));
        assert_eq!(value["data"]["attributes"]["meta"], json!({"flag": "", "n": 3}));
        let relationships = value["data"]["relationships"].as_object().unwrap();
        assert_eq!(relationships.len(), 1);
        assert!(relationships.contains_key("author"));
    }

    #[test]
    fn body_envelope_is_unwrapped() {
        let wrapped = json!({"body": {"data": {"type": "widget", "id": "1"}}});
        assert_eq!(
            unwrap_body_envelope(wrapped),
            json!({"data": {"type": "widget", "id": "1"}})
        );

        let bare = json!({"data": {"type": "widget", "id": "1"}});
        assert_eq!(unwrap_body_envelope(bare.clone()), bare);
    }
}

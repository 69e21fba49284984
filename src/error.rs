//! # Engine Errors
//!
//! This module defines the common error types used throughout the engine.
//! By centralizing error definitions, we ensure consistent error handling
//! across the codec, cache, and orchestration layers.
//!
//! Transport failures are split by `status`: a `status <= 0` means the remote
//! was never reached (offline, DNS, connection refused), while a positive
//! status is a genuine HTTP-level rejection carrying whatever payload the
//! server sent back.

use serde_json::Value;

/// A failed transport call, as rejected by the [`Transport`](crate::transport::Transport)
/// collaborator.
///
/// `payload` holds the server's error body, if any, already decoded from JSON.
/// Callers receive it as the rejection value of the operation they awaited.
#[derive(Debug, Clone, thiserror::Error)]
#[error("transport failure (status {status})")]
pub struct TransportError {
    pub status: i32,
    pub payload: Option<Value>,
}

impl TransportError {
    /// A connectivity failure: the request never reached the remote.
    pub fn offline() -> Self {
        Self {
            status: 0,
            payload: None,
        }
    }

    /// An HTTP-level failure with the given status and decoded body.
    pub fn http(status: i32, payload: Option<Value>) -> Self {
        Self { status, payload }
    }

    /// True when the failure is connectivity rather than a server rejection.
    pub fn is_offline(&self) -> bool {
        self.status <= 0
    }

    /// Unwraps an `{"error": ...}` envelope around the payload, if present.
    pub(crate) fn unwrap_error_envelope(mut self) -> Self {
        if let Some(Value::Object(map)) = &self.payload {
            if let Some(inner) = map.get("error") {
                self.payload = Some(inner.clone());
            }
        }
        self
    }

    /// Unwraps a `{"data": ...}` envelope around the payload, if present.
    ///
    /// Mutation flows report failures with the inner `data` value so callers
    /// see the server's error document directly.
    pub(crate) fn unwrap_data_envelope(mut self) -> Self {
        if let Some(Value::Object(map)) = &self.payload {
            if let Some(inner) = map.get("data") {
                self.payload = Some(inner.clone());
            }
        }
        self
    }
}

/// Errors that can occur within the engine itself.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A resource type was used before being registered with the
    /// [`SchemaRegistry`](crate::schema::SchemaRegistry).
    #[error("unknown resource type: {0}")]
    UnknownType(String),
    /// A wire document was missing required identity fields or could not be
    /// decoded. Fatal for that document only; the cache is not corrupted.
    #[error("malformed document: {0}")]
    MalformedDocument(String),
    /// A mutating call was requested while the target instance already had an
    /// operation in flight. The call is rejected, never queued.
    #[error("resource busy: {0}")]
    Busy(String),
    /// A handle or (type, id) pair did not resolve to a stored resource.
    #[error("resource not found: {0}")]
    NotFound(String),
    /// The transport collaborator rejected the call.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl EngineError {
    /// Applies [`TransportError::unwrap_data_envelope`] when the error is a
    /// transport rejection, leaving other variants untouched.
    pub(crate) fn unwrap_rejection(self) -> Self {
        match self {
            EngineError::Transport(err) => EngineError::Transport(err.unwrap_data_envelope()),
            other => other,
        }
    }
}

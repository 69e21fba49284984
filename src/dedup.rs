//! # Request Deduplication
//!
//! Ensures at most one in-flight read per request path. The first caller for
//! a path runs the producer; callers arriving while that call is outstanding
//! park on a oneshot channel and observe a clone of the exact same
//! resolution or rejection. Once the call settles the path is cleared, so the
//! next read re-executes the producer. Writes never pass through this layer.

use std::collections::HashMap;
use std::future::Future;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::TransportError;

type FetchResult = Result<Value, TransportError>;
type Waiter = oneshot::Sender<FetchResult>;

/// The pending-request table keyed by path.
#[derive(Default)]
pub struct RequestDeduper {
    pending: Mutex<HashMap<String, Vec<Waiter>>>,
}

impl RequestDeduper {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a fetch for `path` is outstanding.
    pub fn has_pending(&self, path: &str) -> bool {
        self.pending.lock().contains_key(path)
    }

    /// Runs `producer` for `path` unless a call for the same path is already
    /// in flight, in which case the caller shares that call's outcome.
    pub async fn deduped_get<F, Fut>(&self, path: &str, producer: F) -> FetchResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FetchResult>,
    {
        let waiter = {
            let mut pending = self.pending.lock();
            match pending.get_mut(path) {
                Some(waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Some(rx)
                }
                None => {
                    pending.insert(path.to_string(), Vec::new());
                    None
                }
            }
        };

        if let Some(rx) = waiter {
            debug!(path, "joining in-flight request");
            // The leader only drops its sender without settling when it was
            // cancelled mid-flight; report that as a connectivity failure.
            return rx.await.unwrap_or_else(|_| Err(TransportError::offline()));
        }

        let result = producer().await;

        let waiters = self.pending.lock().remove(path).unwrap_or_default();
        if !waiters.is_empty() {
            debug!(path, shared_with = waiters.len(), "request settled");
        }
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
        result
    }
}

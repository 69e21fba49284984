//! # Observability & Tracing
//!
//! Structured logging for the engine with the `tracing` crate. Requests,
//! deduplication joins, cache activity, and the non-fatal warnings (schema
//! mismatches, degraded collection responses) are all emitted as structured
//! events with `resource_type`/`path`/`id` fields.
//!
//! Verbosity is controlled through the `RUST_LOG` environment variable:
//! `RUST_LOG=jsonapi_engine=debug` shows every transport call and cache hit.

/// Initializes the tracing subscriber for binaries and examples embedding the
/// engine.
///
/// Uses environment-based filtering (`RUST_LOG`) and a compact format with
/// the module prefix hidden.
pub fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();
}

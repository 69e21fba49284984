//! # jsonapi-engine
//!
//! A client-side engine that maps a hypermedia document format
//! (type/id/attributes/relationships, with an `included` side-table) to and
//! from an in-memory graph of typed, related resources — with caching and
//! single-flight request deduplication.
//!
//! ## Architecture Overview
//!
//! The engine separates concerns into layers, leaves first:
//!
//! 1. **Schema Registry** ([`SchemaRegistry`]) — per-type relationship
//!    definitions and their cardinality (`has-one` vs `has-many`).
//! 2. **Resource Graph** ([`Resource`], [`Relationship`]) — the entities,
//!    stored in an arena and addressed by stable [`ResourceHandle`]s, so
//!    cyclic and shared graphs carry no ownership problems.
//! 3. **Document Codec** ([`codec`]) — serializes a resource plus its
//!    reachable relationships into a wire [`Document`] (cycle-safe via a
//!    visited set), and merges documents back into the graph, updating
//!    existing nodes in place.
//! 4. **Cache Store** ([`CacheStore`]) — resources by `(type, id)`,
//!    collections by request path, with creation-driven invalidation and an
//!    optional best-effort persisted tier.
//! 5. **Request Deduplication** ([`RequestDeduper`]) — at most one in-flight
//!    read per path; concurrent readers share the same outcome.
//! 6. **Engine** ([`Engine`]) — drives save/delete/custom-action flows,
//!    single-flighting mutations per resource instance and merging responses
//!    back through the cache.
//!
//! ## Concurrency Model
//!
//! Execution is cooperative: tasks interleave only at transport awaits, and
//! local graph mutation never suspends. Two writes on the same instance are
//! never interleaved because the second is rejected with
//! [`EngineError::Busy`] while the first is in flight; two reads of the same
//! path share one transport call.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use jsonapi_engine::{Cardinality, Engine, Method, MockTransport, SchemaRegistry};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut schemas = SchemaRegistry::new();
//!     schemas.register("article", &[("comments", Cardinality::HasMany)]);
//!     schemas.register("comment", &[]);
//!
//!     let transport = Arc::new(MockTransport::new());
//!     transport.expect(Method::Post, "article").return_json(json!({
//!         "data": {"type": "article", "id": "1", "attributes": {"title": "hello"}}
//!     }));
//!
//!     let engine = Engine::new(schemas, transport.clone(), "https://api.example.com/");
//!     let article = engine.create("article").unwrap();
//!     engine.set_attr(article, "title", json!("hello"));
//!     engine.save(article).await.unwrap();
//!
//!     let saved = engine.resource(article).unwrap();
//!     assert_eq!(saved.id, "1");
//!     assert!(!saved.is_new);
//!     transport.verify();
//! }
//! ```
//!
//! ## Testing
//!
//! [`MockTransport`] implements the same [`Transport`] contract as a real
//! HTTP adapter but operates entirely in-memory with queued expectations.
//! See the [`mock`] module for usage patterns.

pub mod cache;
pub mod codec;
pub mod dedup;
pub mod document;
pub mod engine;
pub mod error;
pub mod mock;
pub mod resource;
pub mod schema;
pub mod tracing;
pub mod transport;

// Re-export core types for convenience
pub use cache::{CacheStore, CollectionEntry, MemoryTier, NoPersist, PersistError, PersistTier};
pub use codec::{MergeOutcome, SerializeOptions, TransformRegistry};
pub use dedup::RequestDeduper;
pub use document::{
    Document, Identifier, IdentifierData, PrimaryData, RelationshipObject, ResourceObject,
};
pub use engine::{CustomCall, Engine};
pub use error::{EngineError, TransportError};
pub use mock::MockTransport;
pub use resource::{Flight, Relationship, Resource, ResourceHandle};
pub use schema::{Cardinality, Schema, SchemaRegistry};
pub use transport::{ErrorReporter, Method, NoopReporter, RequestLayer, Transport};

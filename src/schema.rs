//! # Schema Registry
//!
//! Per-type definitions describing declared relationships and their
//! cardinality. The registry is built once, before any resource operation,
//! and is immutable afterwards: the codec and the engine look types up by
//! name at serialization, deserialization, and mutation time.
//!
//! # Architecture Note
//! Cardinality is carried as an explicit tagged value ([`Cardinality`])
//! rather than inferred from the shape of the data at use sites. The codec
//! compares the declared cardinality against the observed relationship
//! variant and warns on mismatch instead of guessing.

use std::collections::HashMap;

use crate::error::EngineError;

/// Declared cardinality of a relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// Zero or one related resource.
    HasOne,
    /// An ordered set of related resources, keyed by id.
    HasMany,
}

/// The relationship definitions for a single resource type.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    relationships: HashMap<String, Cardinality>,
}

impl Schema {
    pub fn new(relationships: impl IntoIterator<Item = (String, Cardinality)>) -> Self {
        Self {
            relationships: relationships.into_iter().collect(),
        }
    }

    /// Declared cardinality for `alias`, or `None` when the relation is not
    /// part of the schema.
    pub fn cardinality(&self, alias: &str) -> Option<Cardinality> {
        self.relationships.get(alias).copied()
    }

    /// Iterates over every declared relation.
    pub fn relationships(&self) -> impl Iterator<Item = (&str, Cardinality)> {
        self.relationships.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// Process-wide table of per-type schemas.
///
/// Pure: registration only touches its own table, and lookups have no side
/// effects. Querying a type before registration fails with
/// [`EngineError::UnknownType`].
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    types: HashMap<String, Schema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `resource_type` with its relationship definitions.
    ///
    /// Re-registering a type replaces the previous definition; this is only
    /// expected during setup, never after resource operations have started.
    pub fn register(&mut self, resource_type: &str, relationships: &[(&str, Cardinality)]) {
        let schema = Schema::new(
            relationships
                .iter()
                .map(|(alias, cardinality)| (alias.to_string(), *cardinality)),
        );
        self.types.insert(resource_type.to_string(), schema);
    }

    pub fn lookup(&self, resource_type: &str) -> Result<&Schema, EngineError> {
        self.types
            .get(resource_type)
            .ok_or_else(|| EngineError::UnknownType(resource_type.to_string()))
    }

    pub fn contains(&self, resource_type: &str) -> bool {
        self.types.contains_key(resource_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_before_registration_fails() {
        let registry = SchemaRegistry::new();
        let err = registry.lookup("widget").unwrap_err();
        assert!(matches!(err, EngineError::UnknownType(t) if t == "widget"));
    }

    #[test]
    fn registered_types_expose_cardinality() {
        let mut registry = SchemaRegistry::new();
        registry.register(
            "article",
            &[
                ("comments", Cardinality::HasMany),
                ("author", Cardinality::HasOne),
            ],
        );

        let schema = registry.lookup("article").unwrap();
        assert_eq!(schema.cardinality("comments"), Some(Cardinality::HasMany));
        assert_eq!(schema.cardinality("author"), Some(Cardinality::HasOne));
        assert_eq!(schema.cardinality("tags"), None);
    }
}

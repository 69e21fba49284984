//! # Wire Document Types
//!
//! Serde types for the hypermedia payload format: a primary `data` section
//! (one resource object or many) plus an optional `included` side-table of
//! resource objects transmitted to satisfy relationship references.
//!
//! The shape distinctions the engine cares about are carried by untagged
//! enums: [`PrimaryData`] tells single from collection responses, and
//! [`IdentifierData`] tells a to-one identifier from an identifier array from
//! the empty `{}` marker, so downstream code pattern-matches instead of
//! probing JSON shapes at runtime.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A `{type, id}` pointer at a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub id: String,
}

impl Identifier {
    pub fn new(resource_type: &str, id: &str) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            id: id.to_string(),
        }
    }
}

/// The `data` value of a relationship object.
///
/// Variant order matters for untagged deserialization: arrays become `Many`,
/// objects carrying both identity fields become `One`, and anything else
/// (the `{}` marker, `null`) falls through to `Empty`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdentifierData {
    Many(Vec<Identifier>),
    One(Identifier),
    Empty(Value),
}

impl IdentifierData {
    pub fn empty() -> Self {
        IdentifierData::Empty(Value::Object(Map::new()))
    }

    pub fn is_empty(&self) -> bool {
        match self {
            IdentifierData::Many(ids) => ids.is_empty(),
            IdentifierData::One(_) => false,
            IdentifierData::Empty(_) => true,
        }
    }
}

impl Default for IdentifierData {
    fn default() -> Self {
        Self::empty()
    }
}

/// A relationship entry of a resource object.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RelationshipObject {
    #[serde(default)]
    pub data: IdentifierData,
}

impl RelationshipObject {
    pub fn one(identifier: Identifier) -> Self {
        Self {
            data: IdentifierData::One(identifier),
        }
    }

    pub fn many(identifiers: Vec<Identifier>) -> Self {
        Self {
            data: IdentifierData::Many(identifiers),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

/// One record of a wire document.
///
/// `type` is required by the merge path; it deserializes with a default so
/// that its absence can be reported as a malformed document rather than a
/// decode failure of the whole payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceObject {
    #[serde(rename = "type", default)]
    pub resource_type: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub relationships: BTreeMap<String, RelationshipObject>,
}

/// The primary `data` section: a single resource object or a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimaryData {
    Many(Vec<ResourceObject>),
    One(ResourceObject),
}

impl PrimaryData {
    /// Every resource object in the section, singular or plural.
    pub fn objects(&self) -> impl Iterator<Item = &ResourceObject> {
        match self {
            PrimaryData::One(obj) => std::slice::from_ref(obj).iter(),
            PrimaryData::Many(objs) => objs.iter(),
        }
    }
}

/// A complete request or response payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub data: PrimaryData,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub included: Vec<ResourceObject>,
}

impl Document {
    pub fn single(data: ResourceObject) -> Self {
        Self {
            data: PrimaryData::One(data),
            included: Vec::new(),
        }
    }

    pub fn collection(data: Vec<ResourceObject>) -> Self {
        Self {
            data: PrimaryData::Many(data),
            included: Vec::new(),
        }
    }

    /// All resource objects in the document: primary data first, then the
    /// included side-table.
    pub fn objects(&self) -> impl Iterator<Item = &ResourceObject> {
        self.data.objects().chain(self.included.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn relationship_data_shapes_deserialize() {
        let many: RelationshipObject =
            serde_json::from_value(json!({"data": [{"type": "tag", "id": "1"}]})).unwrap();
        assert_eq!(
            many.data,
            IdentifierData::Many(vec![Identifier::new("tag", "1")])
        );

        let one: RelationshipObject =
            serde_json::from_value(json!({"data": {"type": "tag", "id": "1"}})).unwrap();
        assert_eq!(one.data, IdentifierData::One(Identifier::new("tag", "1")));

        let empty: RelationshipObject = serde_json::from_value(json!({"data": {}})).unwrap();
        assert!(empty.data.is_empty());

        let null: RelationshipObject = serde_json::from_value(json!({"data": null})).unwrap();
        assert!(null.data.is_empty());
    }

    #[test]
    fn empty_to_one_serializes_as_empty_object() {
        let rel = RelationshipObject::empty();
        assert_eq!(serde_json::to_value(&rel).unwrap(), json!({"data": {}}));
    }

    #[test]
    fn primary_data_tells_single_from_collection() {
        let single: Document =
            serde_json::from_value(json!({"data": {"type": "widget", "id": "1"}})).unwrap();
        assert!(matches!(single.data, PrimaryData::One(_)));

        let collection: Document =
            serde_json::from_value(json!({"data": [{"type": "widget", "id": "1"}]})).unwrap();
        assert!(matches!(collection.data, PrimaryData::Many(_)));
    }

    #[test]
    fn missing_type_decodes_as_empty_string() {
        let doc: Document = serde_json::from_value(json!({"data": {"id": "1"}})).unwrap();
        match &doc.data {
            PrimaryData::One(obj) => assert!(obj.resource_type.is_empty()),
            PrimaryData::Many(_) => panic!("expected single"),
        }
    }
}

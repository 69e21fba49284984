//! # Resource & Relationship Graph Model
//!
//! Resources live in an arena owned by the [`CacheStore`](crate::cache::CacheStore);
//! relationships hold [`ResourceHandle`]s into that arena instead of owning
//! references. The same resource may therefore be reachable from any number
//! of relationships and cache entries at once, cyclic graphs cost nothing,
//! and an in-place update is observed by every holder of the handle.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Value};

use crate::schema::{Cardinality, Schema};

/// Stable arena address of a resource. Handles never change, even when a
/// resource is assigned its server id on first save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceHandle(pub(crate) u64);

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Transient per-instance state guarding concurrent access.
///
/// At most one non-idle operation is accepted per instance; a mutating call
/// arriving while the instance is `Loading` or `Saving` is rejected with
/// [`EngineError::Busy`](crate::error::EngineError::Busy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flight {
    #[default]
    Idle,
    Loading,
    Saving,
}

/// A typed association from one resource to zero/one or many others.
///
/// `Many` preserves insertion order and never holds two entries with the same
/// key. Entries are keyed by the target's id, or by a synthetic `new_<n>` id
/// when the target has not been saved yet.
#[derive(Debug, Clone, PartialEq)]
pub enum Relationship {
    One(Option<ResourceHandle>),
    Many(Vec<(String, ResourceHandle)>),
}

impl Relationship {
    /// An empty relationship of the given declared cardinality.
    pub fn empty(cardinality: Cardinality) -> Self {
        match cardinality {
            Cardinality::HasOne => Relationship::One(None),
            Cardinality::HasMany => Relationship::Many(Vec::new()),
        }
    }

    /// The cardinality this value actually has, as opposed to what the schema
    /// declares for its alias.
    pub fn observed_cardinality(&self) -> Cardinality {
        match self {
            Relationship::One(_) => Cardinality::HasOne,
            Relationship::Many(_) => Cardinality::HasMany,
        }
    }

    /// Inserts `handle` under `key` in a `Many` relationship. An existing
    /// entry with the same key is overwritten in place, keeping its position;
    /// new keys append. On a `One` relationship the slot is overwritten.
    pub fn insert(&mut self, key: &str, handle: ResourceHandle) {
        match self {
            Relationship::One(slot) => *slot = Some(handle),
            Relationship::Many(entries) => {
                if let Some(entry) = entries.iter_mut().find(|(k, _)| k == key) {
                    entry.1 = handle;
                } else {
                    entries.push((key.to_string(), handle));
                }
            }
        }
    }

    /// Removes the entry with the given id. `Many`: false when the id is not
    /// present. `One`: unconditionally clears the slot, whatever id is given.
    pub fn remove(&mut self, id: &str) -> bool {
        match self {
            Relationship::One(slot) => {
                *slot = None;
                true
            }
            Relationship::Many(entries) => {
                let before = entries.len();
                entries.retain(|(k, _)| k != id);
                entries.len() != before
            }
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        match self {
            Relationship::One(_) => false,
            Relationship::Many(entries) => entries.iter().any(|(k, _)| k == id),
        }
    }

    /// Every handle referenced by this relationship, in insertion order.
    pub fn handles(&self) -> Vec<ResourceHandle> {
        match self {
            Relationship::One(slot) => slot.iter().copied().collect(),
            Relationship::Many(entries) => entries.iter().map(|(_, h)| *h).collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Relationship::One(slot) => usize::from(slot.is_some()),
            Relationship::Many(entries) => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A typed, identified entity mirroring one record in a wire document.
///
/// `id` is empty until the first successful creation response assigns it;
/// once assigned it never changes. `path` overrides the default
/// `type/id` addressing for resources reached through another resource's
/// relationship endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub resource_type: String,
    pub id: String,
    pub attributes: Map<String, Value>,
    pub relationships: BTreeMap<String, Relationship>,
    pub is_new: bool,
    pub flight: Flight,
    pub path: Option<String>,
}

impl Resource {
    /// A fresh unsaved resource: empty id, `is_new = true`.
    pub fn new(resource_type: &str) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            id: String::new(),
            attributes: Map::new(),
            relationships: BTreeMap::new(),
            is_new: true,
            flight: Flight::Idle,
            path: None,
        }
    }

    /// A resource reconstructed from a wire document: id pre-populated,
    /// `is_new = false`.
    pub fn from_wire(resource_type: &str, id: &str) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            id: id.to_string(),
            attributes: Map::new(),
            relationships: BTreeMap::new(),
            is_new: false,
            flight: Flight::Idle,
            path: None,
        }
    }

    pub fn has_id(&self) -> bool {
        !self.id.is_empty()
    }

    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn set_attr(&mut self, name: &str, value: Value) {
        self.attributes.insert(name.to_string(), value);
    }

    /// Rebuilds the relationship table as empty slots matching the schema.
    /// Used when a resource is reset back to its unsaved state.
    pub fn seed_relationships(&mut self, schema: &Schema) {
        self.relationships = schema
            .relationships()
            .map(|(alias, cardinality)| (alias.to_string(), Relationship::empty(cardinality)))
            .collect();
    }

    /// Default request path for this resource: the explicit `path` override
    /// when present, `type/id` once saved, else the type's collection path.
    pub fn request_path(&self) -> String {
        if let Some(path) = &self.path {
            return path.clone();
        }
        if self.has_id() {
            format!("{}/{}", self.resource_type, self.id)
        } else {
            self.resource_type.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(n: u64) -> ResourceHandle {
        ResourceHandle(n)
    }

    #[test]
    fn many_preserves_insertion_order_and_key_uniqueness() {
        let mut rel = Relationship::empty(Cardinality::HasMany);
        rel.insert("a", h(1));
        rel.insert("b", h(2));
        rel.insert("a", h(3)); // overwrite keeps position

        assert_eq!(rel.handles(), vec![h(3), h(2)]);
        assert_eq!(rel.len(), 2);
    }

    #[test]
    fn many_remove_reports_missing_ids() {
        let mut rel = Relationship::empty(Cardinality::HasMany);
        rel.insert("a", h(1));

        assert!(!rel.remove("b"));
        assert_eq!(rel.len(), 1);
        assert!(rel.remove("a"));
        assert!(rel.is_empty());
    }

    #[test]
    fn one_clears_unconditionally() {
        let mut rel = Relationship::One(Some(h(7)));
        assert!(rel.remove("whatever"));
        assert_eq!(rel, Relationship::One(None));
    }

    #[test]
    fn request_path_prefers_override_then_id() {
        let mut resource = Resource::new("widget");
        assert_eq!(resource.request_path(), "widget");

        resource.id = "9".into();
        assert_eq!(resource.request_path(), "widget/9");

        resource.path = Some("orders/1/relationships/widget/9".into());
        assert_eq!(resource.request_path(), "orders/1/relationships/widget/9");
    }
}

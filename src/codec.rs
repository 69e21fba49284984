//! # Document Codec
//!
//! Converts between the in-memory resource graph and wire documents.
//!
//! Serialization walks a resource plus its reachable relationships into a
//! document, threading a visited set through the whole call so that each
//! distinct resource lands in the `included` side-table at most once — this
//! is what makes cyclic and diamond-shaped graphs safe to serialize.
//!
//! Merging upserts every resource object of a document into the cache store
//! by `(type, id)`, updating existing nodes in place so that every handle
//! held elsewhere in the graph observes the update, and resolves relationship
//! identifiers against the pool built during the same call — a resource
//! included once satisfies every pointer to it, including re-entrant ones.
//!
//! # Architecture Note
//! Declared-versus-observed cardinality conflicts are never fatal: the codec
//! emits the shape the data actually has and raises a `tracing::warn!` event
//! (the schema-mismatch warning), so a partially wrong schema degrades
//! instead of corrupting state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::cache::CacheStore;
use crate::document::{
    Document, Identifier, IdentifierData, PrimaryData, RelationshipObject, ResourceObject,
};
use crate::error::EngineError;
use crate::resource::{Relationship, Resource, ResourceHandle};
use crate::schema::{Cardinality, SchemaRegistry};

/// A per-type hook applied to a shallow copy of the attributes just before
/// emission. The source resource's attributes are never mutated.
pub type AttributeTransform = Arc<dyn Fn(&mut Map<String, Value>) + Send + Sync>;

/// Registered outbound attribute transforms, keyed by resource type.
#[derive(Clone, Default)]
pub struct TransformRegistry {
    transforms: HashMap<String, AttributeTransform>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        resource_type: &str,
        transform: impl Fn(&mut Map<String, Value>) + Send + Sync + 'static,
    ) {
        self.transforms
            .insert(resource_type.to_string(), Arc::new(transform));
    }

    fn apply(&self, resource_type: &str, attributes: &mut Map<String, Value>) {
        if let Some(transform) = self.transforms.get(resource_type) {
            transform(attributes);
        }
    }
}

/// Options controlling serialization.
#[derive(Debug, Clone, Default)]
pub struct SerializeOptions {
    /// Relation names whose targets are expanded into `included`.
    pub include: HashSet<String>,
}

impl SerializeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn include(mut self, alias: &str) -> Self {
        self.include.insert(alias.to_string());
        self
    }
}

/// The result of merging a document: what the server actually sent.
///
/// Callers pattern-match instead of probing shapes: a save normally yields
/// `Single`, but a server may answer with a collection, which is surfaced as
/// a recognized, non-authoritative outcome rather than discarded.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    Single(ResourceHandle),
    Collection(Vec<ResourceHandle>),
}

/// Serializes `handle` (plus reachable relationships) into a wire document.
///
/// Pure: reads the store and the registries, owns its visited set for the
/// call, mutates nothing.
pub fn serialize(
    store: &CacheStore,
    schemas: &SchemaRegistry,
    transforms: &TransformRegistry,
    handle: ResourceHandle,
    options: &SerializeOptions,
) -> Result<Document, EngineError> {
    let mut visited: HashSet<ResourceHandle> = HashSet::new();
    visited.insert(handle);
    let mut included = Vec::new();
    let data = build_object(
        store,
        schemas,
        transforms,
        handle,
        Some(options),
        &mut visited,
        &mut included,
    )?;
    Ok(Document {
        data: PrimaryData::One(data),
        included,
    })
}

/// Builds one resource object. When `options` is `Some`, relations named in
/// its include set are expanded into `included`; expanded resources are
/// serialized with `options = None` so expansion is one level deep, while
/// `visited` threads through the entire call for cycle and diamond safety.
fn build_object(
    store: &CacheStore,
    schemas: &SchemaRegistry,
    transforms: &TransformRegistry,
    handle: ResourceHandle,
    options: Option<&SerializeOptions>,
    visited: &mut HashSet<ResourceHandle>,
    included: &mut Vec<ResourceObject>,
) -> Result<ResourceObject, EngineError> {
    let resource = store
        .get(handle)
        .ok_or_else(|| EngineError::NotFound(format!("resource {handle} is not in the store")))?;
    let schema = schemas.lookup(&resource.resource_type)?;

    let mut object = ResourceObject {
        resource_type: resource.resource_type.clone(),
        id: resource.id.clone(),
        attributes: resource.attributes.clone(),
        relationships: Default::default(),
    };
    transforms.apply(&resource.resource_type, &mut object.attributes);

    for (alias, relationship) in &resource.relationships {
        let declared = schema.cardinality(alias);
        if let Some(declared) = declared {
            if declared != relationship.observed_cardinality() {
                warn!(
                    resource_type = %resource.resource_type,
                    alias,
                    ?declared,
                    "relationship shape does not match its declared cardinality"
                );
            }
        } else {
            debug!(
                resource_type = %resource.resource_type,
                alias,
                "serializing relationship not present in the schema"
            );
        }

        // Emit the shape the relationship actually has.
        let data = match relationship {
            Relationship::Many(entries) => {
                let identifiers = entries
                    .iter()
                    .filter_map(|(_, target)| store.get(*target))
                    .map(|target| Identifier::new(&target.resource_type, &target.id))
                    .collect();
                IdentifierData::Many(identifiers)
            }
            Relationship::One(Some(target)) => match store.get(*target) {
                Some(target) if target.has_id() => {
                    IdentifierData::One(Identifier::new(&target.resource_type, &target.id))
                }
                _ => IdentifierData::empty(),
            },
            Relationship::One(None) => IdentifierData::empty(),
        };
        object
            .relationships
            .insert(alias.clone(), RelationshipObject { data });

        let expand = options
            .map(|opts| opts.include.contains(alias))
            .unwrap_or(false);
        if expand {
            for target in relationship.handles() {
                if store.get(target).is_some() && visited.insert(target) {
                    let expanded =
                        build_object(store, schemas, transforms, target, None, visited, included)?;
                    included.push(expanded);
                }
            }
        }
    }

    Ok(object)
}

/// Merges a wire document into the store, upserting every resource object in
/// `data` and `included` by `(type, id)` and resolving relationship
/// identifiers to handles.
///
/// A document containing a resource object without a `type`, or with a type
/// that was never registered, fails before anything is written, leaving the
/// store untouched.
pub fn merge(
    store: &mut CacheStore,
    schemas: &SchemaRegistry,
    document: &Document,
) -> Result<MergeOutcome, EngineError> {
    // Validate first so a malformed document never corrupts the store.
    for object in document.objects() {
        if object.resource_type.is_empty() {
            return Err(EngineError::MalformedDocument(
                "resource object without a type".into(),
            ));
        }
        schemas.lookup(&object.resource_type)?;
    }

    // Pass 1: upsert identities and attributes, building the per-call pool.
    let mut pool: HashMap<(String, String), ResourceHandle> = HashMap::new();
    let mut handles: Vec<ResourceHandle> = Vec::new();
    for object in document.objects() {
        handles.push(upsert(store, &mut pool, object));
    }

    // Pass 2: resolve relationship identifiers now that every node of this
    // document exists. Handles already held elsewhere keep observing the
    // nodes we updated in place.
    for (object, &handle) in document.objects().zip(handles.iter()) {
        resolve_relationships(store, schemas, &mut pool, object, handle)?;
    }
    for &handle in &handles {
        store.mirror(handle);
    }

    let primary_count = document.data.objects().count();
    handles.truncate(primary_count);
    match document.data {
        PrimaryData::One(_) => Ok(MergeOutcome::Single(handles[0])),
        PrimaryData::Many(_) => Ok(MergeOutcome::Collection(handles)),
    }
}

/// Finds or creates the node for `object` and overwrites its attributes.
fn upsert(
    store: &mut CacheStore,
    pool: &mut HashMap<(String, String), ResourceHandle>,
    object: &ResourceObject,
) -> ResourceHandle {
    let key = (object.resource_type.clone(), object.id.clone());
    let handle = if object.id.is_empty() {
        // No identity to merge into; every such object is a fresh node.
        store.insert(Resource::new(&object.resource_type))
    } else if let Some(&h) = pool.get(&key) {
        h
    } else if let Some(h) = store.get_resource(&object.resource_type, &object.id) {
        h
    } else {
        store.insert(Resource::from_wire(&object.resource_type, &object.id))
    };

    if let Some(resource) = store.get_mut(handle) {
        resource.attributes = object.attributes.clone();
        if !object.id.is_empty() {
            resource.is_new = false;
        }
    }
    if !object.id.is_empty() {
        pool.insert(key, handle);
    }
    handle
}

/// Rewrites the relationships named by `object` on its node. Aliases absent
/// from the document are left as they were.
fn resolve_relationships(
    store: &mut CacheStore,
    schemas: &SchemaRegistry,
    pool: &mut HashMap<(String, String), ResourceHandle>,
    object: &ResourceObject,
    handle: ResourceHandle,
) -> Result<(), EngineError> {
    if object.relationships.is_empty() {
        return Ok(());
    }
    let schema = schemas.lookup(&object.resource_type)?.clone();

    let mut resolved: Vec<(String, Relationship)> = Vec::new();
    for (alias, relationship_object) in &object.relationships {
        let declared = schema.cardinality(alias);
        let relationship = match &relationship_object.data {
            IdentifierData::Many(identifiers) => {
                if declared == Some(Cardinality::HasOne) {
                    warn!(
                        resource_type = %object.resource_type,
                        alias,
                        "incoming collection for a relationship declared has-one"
                    );
                }
                let entries = identifiers
                    .iter()
                    .map(|ident| (ident.id.clone(), resolve_identifier(store, pool, ident)))
                    .collect();
                Relationship::Many(entries)
            }
            IdentifierData::One(identifier) => {
                if declared == Some(Cardinality::HasMany) {
                    warn!(
                        resource_type = %object.resource_type,
                        alias,
                        "incoming single identifier for a relationship declared has-many"
                    );
                }
                Relationship::One(Some(resolve_identifier(store, pool, identifier)))
            }
            IdentifierData::Empty(_) => {
                Relationship::empty(declared.unwrap_or(Cardinality::HasOne))
            }
        };
        resolved.push((alias.clone(), relationship));
    }

    if let Some(resource) = store.get_mut(handle) {
        for (alias, relationship) in resolved {
            resource.relationships.insert(alias, relationship);
        }
    }
    Ok(())
}

/// Resolves an identifier to its node, creating a stub for identifiers that
/// point at resources this document did not carry and the store has never
/// seen. The stub keeps the graph connected; a later fetch fills it in.
fn resolve_identifier(
    store: &mut CacheStore,
    pool: &mut HashMap<(String, String), ResourceHandle>,
    identifier: &Identifier,
) -> ResourceHandle {
    let key = (identifier.resource_type.clone(), identifier.id.clone());
    if let Some(&h) = pool.get(&key) {
        return h;
    }
    if let Some(h) = store.get_resource(&identifier.resource_type, &identifier.id) {
        pool.insert(key, h);
        return h;
    }
    debug!(
        resource_type = %identifier.resource_type,
        id = %identifier.id,
        "identifier points at a resource not yet loaded; creating a stub"
    );
    let h = store.insert(Resource::from_wire(
        &identifier.resource_type,
        &identifier.id,
    ));
    pool.insert(key, h);
    h
}

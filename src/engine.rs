//! # Engine
//!
//! The orchestrator driving reads and mutations over the resource graph.
//! Reads pass through the deduplicated request layer and merge their
//! responses into the cache; mutations are single-flighted per resource
//! instance, serialized by the codec, and merged back on success.
//!
//! # Concurrency Note
//! Execution is cooperative: the only suspension points are transport
//! awaits. The cache mutex is held across synchronous sections only, never
//! across an await, so interleaved tasks can never observe a half-applied
//! local mutation. A mutating call on an instance that is already `Saving`
//! or `Loading` is rejected immediately with [`EngineError::Busy`] — it is
//! never queued and never silently dropped.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::CacheStore;
use crate::codec::{self, MergeOutcome, SerializeOptions, TransformRegistry};
use crate::document::{Document, PrimaryData};
use crate::error::EngineError;
use crate::resource::{Flight, Relationship, Resource, ResourceHandle};
use crate::schema::{Cardinality, SchemaRegistry};
use crate::transport::{ErrorReporter, Method, RequestLayer, Transport};

/// Parameters of a custom action call against a resource.
///
/// `body` defaults to the resource's full serialized view; `postfix_path`
/// appends an action suffix to the resource's own path; `full_path` replaces
/// the computed path entirely.
#[derive(Default)]
pub struct CustomCall {
    pub method: Option<Method>,
    pub body: Option<Document>,
    pub postfix_path: Option<String>,
    pub full_path: Option<String>,
}

impl CustomCall {
    pub fn action(postfix: &str) -> Self {
        Self {
            postfix_path: Some(postfix.to_string()),
            ..Default::default()
        }
    }
}

/// The client-side resource engine.
///
/// Holds the schema registry, the injectable cache store, and the request
/// layer wrapping the transport collaborator. All graph mutation goes through
/// methods on this type.
pub struct Engine {
    schemas: SchemaRegistry,
    store: Arc<Mutex<CacheStore>>,
    requests: RequestLayer,
    transforms: TransformRegistry,
    default_include: HashSet<String>,
}

impl Engine {
    pub fn new(
        schemas: SchemaRegistry,
        transport: Arc<dyn Transport>,
        base_url: impl Into<String>,
    ) -> Self {
        Self::with_store(schemas, transport, base_url, CacheStore::new())
    }

    /// Builds an engine around an explicit store, e.g. one backed by a
    /// persisted tier.
    pub fn with_store(
        schemas: SchemaRegistry,
        transport: Arc<dyn Transport>,
        base_url: impl Into<String>,
        store: CacheStore,
    ) -> Self {
        Self {
            schemas,
            store: Arc::new(Mutex::new(store)),
            requests: RequestLayer::new(transport, base_url),
            transforms: TransformRegistry::new(),
            default_include: HashSet::new(),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.requests.set_reporter(reporter);
        self
    }

    /// Relation names expanded into `included` on every save.
    pub fn with_default_include(mut self, aliases: &[&str]) -> Self {
        self.default_include = aliases.iter().map(|a| a.to_string()).collect();
        self
    }

    /// Registers an outbound attribute transform for a resource type.
    pub fn register_transform(
        &mut self,
        resource_type: &str,
        transform: impl Fn(&mut serde_json::Map<String, Value>) + Send + Sync + 'static,
    ) {
        self.transforms.register(resource_type, transform);
    }

    /// The shared cache store, for inspection and test isolation.
    pub fn store(&self) -> Arc<Mutex<CacheStore>> {
        self.store.clone()
    }

    /// A snapshot of a stored resource.
    pub fn resource(&self, handle: ResourceHandle) -> Option<Resource> {
        self.store.lock().get(handle).cloned()
    }

    /// Wire lookup by `(type, id)`.
    pub fn lookup(&self, resource_type: &str, id: &str) -> Option<ResourceHandle> {
        self.store.lock().get_resource(resource_type, id)
    }

    // ------------------------------------------------------------------
    // Local graph mutation (never suspends)
    // ------------------------------------------------------------------

    /// Creates a fresh unsaved resource with empty relationship slots seeded
    /// from the schema, registered in the store.
    pub fn create(&self, resource_type: &str) -> Result<ResourceHandle, EngineError> {
        let schema = self.schemas.lookup(resource_type)?.clone();
        let mut resource = Resource::new(resource_type);
        resource.seed_relationships(&schema);
        Ok(self.store.lock().insert(resource))
    }

    pub fn set_attr(&self, handle: ResourceHandle, name: &str, value: Value) -> bool {
        let mut store = self.store.lock();
        match store.get_mut(handle) {
            Some(resource) => {
                resource.set_attr(name, value);
                true
            }
            None => false,
        }
    }

    /// Resets a resource to its unsaved state: id and attributes cleared,
    /// relationships re-seeded empty from the schema, `is_new` set.
    pub fn reset(&self, handle: ResourceHandle) -> Result<(), EngineError> {
        let resource_type = self
            .resource(handle)
            .ok_or_else(|| EngineError::NotFound(handle.to_string()))?
            .resource_type;
        let schema = self.schemas.lookup(&resource_type)?.clone();

        let mut store = self.store.lock();
        store.clear_identity(handle);
        if let Some(resource) = store.get_mut(handle) {
            resource.attributes.clear();
            resource.seed_relationships(&schema);
        }
        Ok(())
    }

    /// Links `target` under `parent`, keyed by the target's id — or by a
    /// synthetic `new_<n>` id when the target is unsaved, so it can be
    /// tracked as a map key before being persisted. Stamps the target's
    /// nested relationship path. The alias defaults to the target's type.
    pub fn add_relationship(
        &self,
        parent: ResourceHandle,
        target: ResourceHandle,
        alias: Option<&str>,
    ) -> Result<(), EngineError> {
        let mut store = self.store.lock();
        let (target_type, target_id) = {
            let target = store
                .get(target)
                .ok_or_else(|| EngineError::NotFound(target.to_string()))?;
            (target.resource_type.clone(), target.id.clone())
        };
        let (parent_type, parent_base) = {
            let parent = store
                .get(parent)
                .ok_or_else(|| EngineError::NotFound(parent.to_string()))?;
            (parent.resource_type.clone(), parent_base_path(parent))
        };
        let alias = alias.unwrap_or(&target_type).to_string();
        let declared = self.schemas.lookup(&parent_type)?.cardinality(&alias);

        let key = if target_id.is_empty() {
            synthetic_id()
        } else {
            target_id.clone()
        };
        let nested_path = format!("{parent_base}/relationships/{target_type}/{target_id}");
        if let Some(target) = store.get_mut(target) {
            target.path = Some(nested_path);
        }

        if let Some(parent) = store.get_mut(parent) {
            let relationship = parent
                .relationships
                .entry(alias.clone())
                .or_insert_with(|| {
                    Relationship::empty(declared.unwrap_or(Cardinality::HasOne))
                });
            coerce_cardinality(relationship, declared, &parent_type, &alias);
            relationship.insert(&key, target);
        }
        Ok(())
    }

    /// Replaces a has-many relationship wholesale: entries absent from
    /// `targets` are removed, new entries appended, retained entries kept in
    /// place. A full-replace diff, not an additive merge.
    pub fn add_relationships(
        &self,
        parent: ResourceHandle,
        targets: &[ResourceHandle],
        alias: &str,
    ) -> Result<(), EngineError> {
        let mut store = self.store.lock();
        let (parent_type, parent_base) = {
            let parent = store
                .get(parent)
                .ok_or_else(|| EngineError::NotFound(parent.to_string()))?;
            (parent.resource_type.clone(), parent_base_path(parent))
        };
        let declared = self.schemas.lookup(&parent_type)?.cardinality(alias);

        let mut incoming: Vec<(String, ResourceHandle)> = Vec::with_capacity(targets.len());
        for &target in targets {
            let (target_type, target_id) = {
                let target = store
                    .get(target)
                    .ok_or_else(|| EngineError::NotFound(target.to_string()))?;
                (target.resource_type.clone(), target.id.clone())
            };
            let key = if target_id.is_empty() {
                synthetic_id()
            } else {
                target_id.clone()
            };
            let nested_path = format!("{parent_base}/relationships/{target_type}/{target_id}");
            if let Some(target) = store.get_mut(target) {
                target.path = Some(nested_path);
            }
            incoming.push((key, target));
        }

        if let Some(parent) = store.get_mut(parent) {
            let relationship = parent
                .relationships
                .entry(alias.to_string())
                .or_insert_with(|| Relationship::empty(Cardinality::HasMany));
            coerce_cardinality(
                relationship,
                declared.or(Some(Cardinality::HasMany)),
                &parent_type,
                alias,
            );
            if let Relationship::Many(entries) = relationship {
                let keep: HashSet<&str> = incoming.iter().map(|(k, _)| k.as_str()).collect();
                entries.retain(|(k, _)| keep.contains(k.as_str()));
            }
            for (key, handle) in incoming {
                relationship.insert(&key, handle);
            }
        }
        Ok(())
    }

    /// Unlinks the given id from a relationship. Returns `false` when the
    /// alias is unknown or a has-many map does not contain the id; a has-one
    /// slot is cleared unconditionally, whatever id is given.
    pub fn remove_relationship(&self, parent: ResourceHandle, alias: &str, id: &str) -> bool {
        let mut store = self.store.lock();
        let Some(parent) = store.get_mut(parent) else {
            return false;
        };
        match parent.relationships.get_mut(alias) {
            Some(relationship) => relationship.remove(id),
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Transport-crossing operations (suspend at the transport await)
    // ------------------------------------------------------------------

    /// Fetches a single resource by `(type, id)` and merges it into the
    /// graph. A cached instance is marked `Loading` for the duration, so
    /// mutating calls against it are rejected while the fetch is in flight.
    pub async fn fetch(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<ResourceHandle, EngineError> {
        self.schemas.lookup(resource_type)?;
        let path = format!("{resource_type}/{id}");

        let guarded = {
            let mut store = self.store.lock();
            match store.get_resource(resource_type, id) {
                Some(handle) => {
                    let resource = store.get_mut(handle);
                    match resource {
                        Some(r) if r.flight == Flight::Idle => {
                            r.flight = Flight::Loading;
                            Some(handle)
                        }
                        _ => None,
                    }
                }
                None => None,
            }
        };

        let result = self.fetch_inner(&path).await;

        if let Some(handle) = guarded {
            self.end_flight(handle);
        }
        result
    }

    async fn fetch_inner(&self, path: &str) -> Result<ResourceHandle, EngineError> {
        let document = self.requests.get(path).await?;
        let mut store = self.store.lock();
        match codec::merge(&mut store, &self.schemas, &document)? {
            MergeOutcome::Single(handle) => Ok(handle),
            MergeOutcome::Collection(handles) => {
                warn!(path, "collection response where a single resource was expected");
                handles.into_iter().next().ok_or_else(|| {
                    EngineError::MalformedDocument(format!(
                        "empty collection response for {path}"
                    ))
                })
            }
        }
    }

    /// Fetches the collection behind `path`. A fresh cached entry is served
    /// without touching the transport; a missing or deprecated entry
    /// re-fetches through the deduplicated read layer and caches the result.
    pub async fn fetch_collection(
        &self,
        path: &str,
    ) -> Result<Vec<ResourceHandle>, EngineError> {
        {
            let store = self.store.lock();
            if let Some(entry) = store.collection(path) {
                if !entry.stale {
                    debug!(path, "collection served from cache");
                    return Ok(entry.keys.clone());
                }
            }
        }

        let document = self.requests.get(path).await?;
        let mut store = self.store.lock();
        let keys = match codec::merge(&mut store, &self.schemas, &document)? {
            MergeOutcome::Collection(handles) => handles,
            MergeOutcome::Single(handle) => vec![handle],
        };
        store.set_collection(path, keys.clone());
        Ok(keys)
    }

    /// Saves a resource: serializes it (with the engine's default include
    /// set), writes it to its path, and merges the response. A first save
    /// assigns the server id exactly once and deprecates the collection cache
    /// for the creation path, since the collection's membership is now stale.
    ///
    /// A collection response to a save is surfaced as
    /// [`MergeOutcome::Collection`] with a warning — a recognized but
    /// non-authoritative outcome the caller must resolve.
    pub async fn save(&self, handle: ResourceHandle) -> Result<MergeOutcome, EngineError> {
        self.begin_flight(handle, Flight::Saving)?;
        let result = self.save_inner(handle).await;
        self.end_flight(handle);
        result.map_err(EngineError::unwrap_rejection)
    }

    async fn save_inner(&self, handle: ResourceHandle) -> Result<MergeOutcome, EngineError> {
        let (document, path, resource_type, had_id) = {
            let store = self.store.lock();
            let resource = store
                .get(handle)
                .ok_or_else(|| EngineError::NotFound(handle.to_string()))?;
            let options = SerializeOptions {
                include: self.default_include.clone(),
            };
            let document =
                codec::serialize(&store, &self.schemas, &self.transforms, handle, &options)?;
            (
                document,
                resource.request_path(),
                resource.resource_type.clone(),
                resource.has_id(),
            )
        };

        let response = self
            .requests
            .send(Method::Post, &path, Some(&document), false)
            .await?;

        let mut store = self.store.lock();
        if !had_id {
            // A creation makes the collection under this path stale.
            store.deprecate_collection(&path);
            if let PrimaryData::One(object) = &response.data {
                if object.resource_type == resource_type && !object.id.is_empty() {
                    store.assign_id(handle, &object.id);
                }
            }
        }

        let outcome = codec::merge(&mut store, &self.schemas, &response)?;
        match &outcome {
            MergeOutcome::Single(merged) => {
                let id = store.get(*merged).map(|r| r.id.clone()).unwrap_or_default();
                info!(resource_type = %resource_type, %id, path, "saved");
            }
            MergeOutcome::Collection(handles) => {
                warn!(
                    resource_type = %resource_type,
                    path,
                    count = handles.len(),
                    "server returned a collection for a save; surfacing it as-is"
                );
            }
        }
        Ok(outcome)
    }

    /// Deletes a resource and removes it from the store on success.
    pub async fn delete(&self, handle: ResourceHandle) -> Result<(), EngineError> {
        self.begin_flight(handle, Flight::Saving)?;
        let result = self.delete_inner(handle).await;
        self.end_flight(handle);
        result.map_err(EngineError::unwrap_rejection)
    }

    async fn delete_inner(&self, handle: ResourceHandle) -> Result<(), EngineError> {
        let (path, resource_type, id) = {
            let store = self.store.lock();
            let resource = store
                .get(handle)
                .ok_or_else(|| EngineError::NotFound(handle.to_string()))?;
            (
                resource.request_path(),
                resource.resource_type.clone(),
                resource.id.clone(),
            )
        };

        self.requests
            .execute(Method::Delete, &path, None, false)
            .await?;

        self.store.lock().remove(handle);
        info!(resource_type = %resource_type, %id, "deleted");
        Ok(())
    }

    /// `POST <path>/archive` with the resource's serialized view as body.
    pub async fn archive(&self, handle: ResourceHandle) -> Result<Document, EngineError> {
        self.custom_call(handle, CustomCall::action("archive")).await
    }

    /// `POST <path>/clone` with the resource's serialized view as body.
    pub async fn clone_resource(&self, handle: ResourceHandle) -> Result<Document, EngineError> {
        self.custom_call(handle, CustomCall::action("clone")).await
    }

    /// A custom action against a resource's own path, under the same
    /// single-flight discipline as [`save`](Self::save). The response
    /// document is returned without being merged; callers decide what it
    /// means.
    pub async fn custom_call(
        &self,
        handle: ResourceHandle,
        call: CustomCall,
    ) -> Result<Document, EngineError> {
        self.begin_flight(handle, Flight::Saving)?;
        let result = self.custom_call_inner(handle, call).await;
        self.end_flight(handle);
        result.map_err(EngineError::unwrap_rejection)
    }

    async fn custom_call_inner(
        &self,
        handle: ResourceHandle,
        call: CustomCall,
    ) -> Result<Document, EngineError> {
        let (body, path) = {
            let store = self.store.lock();
            let resource = store
                .get(handle)
                .ok_or_else(|| EngineError::NotFound(handle.to_string()))?;
            let body = match call.body {
                Some(body) => body,
                None => codec::serialize(
                    &store,
                    &self.schemas,
                    &self.transforms,
                    handle,
                    &SerializeOptions::new(),
                )?,
            };
            let path = match call.full_path {
                Some(full) => full,
                None => {
                    let mut path = resource.request_path();
                    if let Some(postfix) = &call.postfix_path {
                        path = format!("{path}/{postfix}");
                    }
                    path
                }
            };
            (body, path)
        };

        self.requests
            .send(call.method.unwrap_or(Method::Post), &path, Some(&body), false)
            .await
    }

    // ------------------------------------------------------------------

    /// Accepts a transient state on an idle instance, rejecting with `Busy`
    /// when another operation is already in flight.
    fn begin_flight(&self, handle: ResourceHandle, flight: Flight) -> Result<(), EngineError> {
        let mut store = self.store.lock();
        let resource = store
            .get_mut(handle)
            .ok_or_else(|| EngineError::NotFound(handle.to_string()))?;
        if resource.flight != Flight::Idle {
            debug!(
                resource_type = %resource.resource_type,
                id = %resource.id,
                state = ?resource.flight,
                "rejecting call on busy instance"
            );
            return Err(EngineError::Busy(format!(
                "{}:{}",
                resource.resource_type,
                if resource.id.is_empty() { "(unsaved)" } else { resource.id.as_str() }
            )));
        }
        resource.flight = flight;
        Ok(())
    }

    fn end_flight(&self, handle: ResourceHandle) {
        if let Some(resource) = self.store.lock().get_mut(handle) {
            resource.flight = Flight::Idle;
        }
    }
}

/// The parent's addressing base for nested relationship paths.
fn parent_base_path(parent: &Resource) -> String {
    parent
        .path
        .clone()
        .unwrap_or_else(|| format!("{}/{}", parent.resource_type, parent.id))
}

/// Temporary map key for a resource that has not been persisted yet.
fn synthetic_id() -> String {
    format!("new_{}", rand::thread_rng().gen_range(0..100_000))
}

/// Rewrites a relationship slot whose variant disagrees with the declared
/// cardinality. Existing entries carry over where the shapes allow.
fn coerce_cardinality(
    relationship: &mut Relationship,
    declared: Option<Cardinality>,
    parent_type: &str,
    alias: &str,
) {
    let Some(declared) = declared else {
        return;
    };
    if relationship.observed_cardinality() == declared {
        return;
    }
    warn!(
        resource_type = %parent_type,
        alias,
        ?declared,
        "relationship variant disagrees with schema; coercing"
    );
    *relationship = match declared {
        Cardinality::HasMany => {
            let entries = match relationship {
                Relationship::One(Some(h)) => vec![(String::new(), *h)],
                _ => Vec::new(),
            };
            Relationship::Many(entries)
        }
        Cardinality::HasOne => {
            let slot = relationship.handles().into_iter().next();
            Relationship::One(slot)
        }
    };
}

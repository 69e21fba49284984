//! # Cache Store
//!
//! Keyed lookup of resources and resource collections. The in-memory tier is
//! the arena every resource lives in and is always authoritative; an optional
//! persisted tier mirrors it best-effort, and a failure to mirror never
//! affects the in-memory flow.
//!
//! # Architecture Note
//! The store is an explicit, injectable object held by the engine rather than
//! ambient global state, so tests get isolation from a fresh store per test.
//! Resources are addressed by stable [`ResourceHandle`]s; a secondary
//! `(type, id)` index serves wire lookups and is extended exactly once per
//! resource, when the first successful creation response assigns its id.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::document::Identifier;
use crate::resource::{Resource, ResourceHandle};

/// A failure in the persisted tier. Logged and swallowed by the store.
#[derive(Debug, Clone, thiserror::Error)]
#[error("persist tier failure: {0}")]
pub struct PersistError(pub String);

/// Best-effort secondary cache tier mirroring the in-memory arena.
///
/// Implementations mirror individual resources by `(type, id)` and collection
/// membership by request path. Errors are reported to the caller, which logs
/// and continues; correctness never depends on this tier.
pub trait PersistTier: Send + Sync {
    fn put_resource(&self, resource_type: &str, id: &str, attributes: &Value)
        -> Result<(), PersistError>;
    fn get_resource(&self, resource_type: &str, id: &str) -> Result<Option<Value>, PersistError>;
    fn put_collection(&self, path: &str, members: &[Identifier]) -> Result<(), PersistError>;
    fn drop_collection(&self, path: &str) -> Result<(), PersistError>;
}

/// The default tier: persists nothing.
#[derive(Debug, Default)]
pub struct NoPersist;

impl PersistTier for NoPersist {
    fn put_resource(&self, _: &str, _: &str, _: &Value) -> Result<(), PersistError> {
        Ok(())
    }

    fn get_resource(&self, _: &str, _: &str) -> Result<Option<Value>, PersistError> {
        Ok(None)
    }

    fn put_collection(&self, _: &str, _: &[Identifier]) -> Result<(), PersistError> {
        Ok(())
    }

    fn drop_collection(&self, _: &str) -> Result<(), PersistError> {
        Ok(())
    }
}

/// An in-memory persisted tier, useful in tests to observe mirroring.
#[derive(Debug, Default)]
pub struct MemoryTier {
    resources: Mutex<HashMap<(String, String), Value>>,
    collections: Mutex<HashMap<String, Vec<Identifier>>>,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resource_count(&self) -> usize {
        self.resources.lock().len()
    }

    pub fn has_collection(&self, path: &str) -> bool {
        self.collections.lock().contains_key(path)
    }
}

impl PersistTier for MemoryTier {
    fn put_resource(
        &self,
        resource_type: &str,
        id: &str,
        attributes: &Value,
    ) -> Result<(), PersistError> {
        self.resources
            .lock()
            .insert((resource_type.to_string(), id.to_string()), attributes.clone());
        Ok(())
    }

    fn get_resource(&self, resource_type: &str, id: &str) -> Result<Option<Value>, PersistError> {
        Ok(self
            .resources
            .lock()
            .get(&(resource_type.to_string(), id.to_string()))
            .cloned())
    }

    fn put_collection(&self, path: &str, members: &[Identifier]) -> Result<(), PersistError> {
        self.collections
            .lock()
            .insert(path.to_string(), members.to_vec());
        Ok(())
    }

    fn drop_collection(&self, path: &str) -> Result<(), PersistError> {
        self.collections.lock().remove(path);
        Ok(())
    }
}

/// A cached collection result for a request path.
///
/// `stale` marks the entry as deprecated: the membership may have changed
/// (for example a creation occurred against the path), so the next read must
/// re-fetch instead of serving the cached keys.
#[derive(Debug, Clone, Default)]
pub struct CollectionEntry {
    pub keys: Vec<ResourceHandle>,
    pub stale: bool,
}

/// The resource arena plus the path-keyed collection cache.
pub struct CacheStore {
    resources: HashMap<ResourceHandle, Resource>,
    index: HashMap<(String, String), ResourceHandle>,
    collections: HashMap<String, CollectionEntry>,
    next_handle: u64,
    persist: Arc<dyn PersistTier>,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore {
    pub fn new() -> Self {
        Self::with_persist(Arc::new(NoPersist))
    }

    pub fn with_persist(persist: Arc<dyn PersistTier>) -> Self {
        Self {
            resources: HashMap::new(),
            index: HashMap::new(),
            collections: HashMap::new(),
            next_handle: 1,
            persist,
        }
    }

    /// Registers a resource in the arena and returns its handle. Resources
    /// that already carry an id are indexed for wire lookups and mirrored.
    pub fn insert(&mut self, resource: Resource) -> ResourceHandle {
        let handle = ResourceHandle(self.next_handle);
        self.next_handle += 1;
        if resource.has_id() {
            self.index.insert(
                (resource.resource_type.clone(), resource.id.clone()),
                handle,
            );
        }
        self.resources.insert(handle, resource);
        self.mirror(handle);
        handle
    }

    pub fn get(&self, handle: ResourceHandle) -> Option<&Resource> {
        self.resources.get(&handle)
    }

    pub fn get_mut(&mut self, handle: ResourceHandle) -> Option<&mut Resource> {
        self.resources.get_mut(&handle)
    }

    /// Wire lookup by `(type, id)`.
    pub fn get_resource(&self, resource_type: &str, id: &str) -> Option<ResourceHandle> {
        self.index
            .get(&(resource_type.to_string(), id.to_string()))
            .copied()
    }

    /// Assigns `id` to an unsaved resource and indexes it. Ids are immutable
    /// once assigned: a second assignment is ignored.
    pub fn assign_id(&mut self, handle: ResourceHandle, id: &str) -> bool {
        let Some(resource) = self.resources.get_mut(&handle) else {
            return false;
        };
        if resource.has_id() || id.is_empty() {
            return false;
        }
        resource.id = id.to_string();
        resource.is_new = false;
        let key = (resource.resource_type.clone(), id.to_string());
        self.index.insert(key, handle);
        self.mirror(handle);
        true
    }

    /// Removes a resource from the arena and its index entry. Relationship
    /// entries elsewhere may still hold the handle; they resolve to nothing
    /// from now on.
    pub fn remove(&mut self, handle: ResourceHandle) -> Option<Resource> {
        let resource = self.resources.remove(&handle)?;
        if resource.has_id() {
            self.index
                .remove(&(resource.resource_type.clone(), resource.id.clone()));
        }
        Some(resource)
    }

    /// Removes a resource by wire identity.
    pub fn remove_resource(&mut self, resource_type: &str, id: &str) -> Option<Resource> {
        let handle = self.get_resource(resource_type, id)?;
        self.remove(handle)
    }

    /// Clears a resource's wire identity, dropping its index entry. Used when
    /// a resource is reset back to its unsaved state.
    pub(crate) fn clear_identity(&mut self, handle: ResourceHandle) {
        if let Some(resource) = self.resources.get_mut(&handle) {
            if resource.has_id() {
                self.index
                    .remove(&(resource.resource_type.clone(), resource.id.clone()));
                resource.id.clear();
            }
            resource.is_new = true;
        }
    }

    /// Mirrors a resource into the persisted tier; failures are logged and
    /// ignored. Unsaved resources are not mirrored.
    pub(crate) fn mirror(&self, handle: ResourceHandle) {
        let Some(resource) = self.resources.get(&handle) else {
            return;
        };
        if !resource.has_id() {
            return;
        }
        if let Err(err) = self.persist.put_resource(
            &resource.resource_type,
            &resource.id,
            &Value::Object(resource.attributes.clone()),
        ) {
            debug!(
                resource_type = %resource.resource_type,
                id = %resource.id,
                error = %err,
                "persist tier put failed"
            );
        }
    }

    pub fn collection(&self, path: &str) -> Option<&CollectionEntry> {
        self.collections.get(path)
    }

    /// Returns the cached collection for `path`, creating a stale placeholder
    /// when none exists yet. A fresh placeholder is stale by definition: it
    /// holds no membership and must be filled by a fetch.
    pub fn get_or_create_collection(&mut self, path: &str) -> &mut CollectionEntry {
        self.collections
            .entry(path.to_string())
            .or_insert_with(|| CollectionEntry {
                keys: Vec::new(),
                stale: true,
            })
    }

    /// Stores a fresh collection result for `path` and mirrors its membership.
    pub fn set_collection(&mut self, path: &str, keys: Vec<ResourceHandle>) {
        let members: Vec<Identifier> = keys
            .iter()
            .filter_map(|h| self.resources.get(h))
            .map(|r| Identifier::new(&r.resource_type, &r.id))
            .collect();
        let entry = self.get_or_create_collection(path);
        entry.keys = keys;
        entry.stale = false;
        if let Err(err) = self.persist.put_collection(path, &members) {
            debug!(path, error = %err, "persist tier put_collection failed");
        }
    }

    /// Marks the cached collection for `path` stale so the next read
    /// re-fetches. A path with no cached collection is left untouched in
    /// memory, but the persisted mirror is dropped either way.
    pub fn deprecate_collection(&mut self, path: &str) {
        if let Some(entry) = self.collections.get_mut(path) {
            entry.stale = true;
        }
        if let Err(err) = self.persist.drop_collection(path) {
            debug!(path, error = %err, "persist tier drop_collection failed");
        }
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }
}

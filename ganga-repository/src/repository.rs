//! The repository contract shared by every storage backend.

use crate::RepositoryResult;
use ganga_schema::{IndexCache, ObjectRef, PluginRegistry, RegistryHook, Schema, Value};
use ganga_types::{ObjectId, SessionName};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Weak};

/// Name of the attribute that mirrors a root object's repository id.
pub const ID_ATTRIBUTE: &str = "id";

/// Storage of the root objects of one registry.
///
/// A repository owns the in-memory objects it has handed out: bodies are
/// loaded lazily, changed objects are flushed explicitly, and every
/// mutating call assumes the caller coordinates locking through
/// [`GangaRepository::lock`].
pub trait GangaRepository: Send {
    /// Registry name, for diagnostics.
    fn name(&self) -> &str;

    /// Opens the repository and reads its index. Objects are bound to
    /// `hook` so that they can request lazy loads and write locks.
    fn startup(&mut self, hook: Option<Weak<dyn RegistryHook>>) -> RepositoryResult<()>;

    fn is_started(&self) -> bool;

    /// Reconciles memory with storage and returns the ids that changed.
    fn update_index(&mut self) -> RepositoryResult<Vec<ObjectId>>;

    /// Registers new objects under fresh ids, or under `force_ids` which the
    /// caller must already hold locked.
    fn add(
        &mut self,
        objs: &[ObjectRef],
        force_ids: Option<&[ObjectId]>,
    ) -> RepositoryResult<Vec<ObjectId>>;

    /// Writes the given objects.
    fn flush(&mut self, ids: &[ObjectId]) -> RepositoryResult<()>;

    /// Reads the bodies of the given objects.
    fn load(&mut self, ids: &[ObjectId]) -> RepositoryResult<()>;

    /// Removes the given objects from memory and storage.
    fn delete(&mut self, ids: &[ObjectId]) -> RepositoryResult<()>;

    /// Takes write locks; returns the ids now held.
    fn lock(&mut self, ids: &[ObjectId]) -> Vec<ObjectId>;

    /// Releases write locks; returns the ids released.
    fn unlock(&mut self, ids: &[ObjectId]) -> Vec<ObjectId>;

    /// Persists indexes and releases the session. Flushing is the
    /// registry's job.
    fn shutdown(&mut self) -> RepositoryResult<()>;

    /// Deletes everything, the id counter included, and starts afresh.
    fn clean(&mut self) -> RepositoryResult<()>;

    /// Session currently holding the lock on `id`.
    fn get_lock_session(&self, id: ObjectId) -> Option<SessionName>;

    /// Other live sessions sharing this repository.
    fn get_other_sessions(&self) -> Vec<SessionName>;

    /// Forcibly clears locks of dead sessions.
    fn reap_locks(&mut self) -> bool;

    /// The in-memory object for `id`, loaded or not.
    fn object(&self, id: ObjectId) -> Option<ObjectRef>;

    /// Ids of every accessible object, ascending.
    fn ids(&self) -> Vec<ObjectId>;

    /// Ids whose records could not be read in this session.
    fn incomplete_ids(&self) -> Vec<ObjectId>;

    /// Whether the body of `id` is in memory.
    fn is_loaded(&self, id: ObjectId) -> bool {
        self.object(id).is_some_and(|obj| obj.is_loaded())
    }
}

/// In-memory side of a repository: the id → object map, the ids that
/// failed to load, and the registry new objects are bound to.
#[derive(Default)]
pub(crate) struct ObjectTable {
    objects: BTreeMap<ObjectId, ObjectRef>,
    incomplete: BTreeSet<ObjectId>,
    hook: Option<Weak<dyn RegistryHook>>,
}

impl ObjectTable {
    pub(crate) fn set_hook(&mut self, hook: Option<Weak<dyn RegistryHook>>) {
        self.hook = hook;
    }

    pub(crate) fn hook(&self) -> Option<Weak<dyn RegistryHook>> {
        self.hook.clone()
    }

    pub(crate) fn get(&self, id: ObjectId) -> Option<ObjectRef> {
        self.objects.get(&id).cloned()
    }

    pub(crate) fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    pub(crate) fn ids(&self) -> Vec<ObjectId> {
        self.objects.keys().copied().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.objects.len()
    }

    pub(crate) fn is_incomplete(&self, id: ObjectId) -> bool {
        self.incomplete.contains(&id)
    }

    pub(crate) fn incomplete_ids(&self) -> Vec<ObjectId> {
        self.incomplete.iter().copied().collect()
    }

    /// Binds `obj` to `id` and to the registry.
    pub(crate) fn insert(&mut self, id: ObjectId, obj: ObjectRef) {
        self.incomplete.remove(&id);
        set_id(&obj, id);
        if let Some(hook) = &self.hook {
            obj.attach_registry(hook.clone(), id);
        }
        if let Some(previous) = self.objects.insert(id, obj.clone()) {
            if !previous.ptr_eq(&obj) {
                previous.detach_registry();
            }
        }
    }

    /// Adds an unloaded placeholder carrying only its index cache.
    pub(crate) fn insert_placeholder(
        &mut self,
        id: ObjectId,
        schema: Arc<Schema>,
        plugins: &Arc<PluginRegistry>,
        cache: IndexCache,
    ) -> ObjectRef {
        let obj = ObjectRef::unloaded(schema, Arc::clone(plugins), cache);
        self.insert(id, obj.clone());
        obj
    }

    pub(crate) fn remove(&mut self, id: ObjectId) -> Option<ObjectRef> {
        self.incomplete.remove(&id);
        let obj = self.objects.remove(&id)?;
        obj.detach_registry();
        Some(obj)
    }

    /// Records a failed load; the object leaves the accessible set.
    pub(crate) fn mark_incomplete(&mut self, id: ObjectId) {
        if let Some(obj) = self.objects.remove(&id) {
            obj.detach_registry();
        }
        self.incomplete.insert(id);
    }

    pub(crate) fn clear(&mut self) {
        for obj in self.objects.values() {
            obj.detach_registry();
        }
        self.objects.clear();
        self.incomplete.clear();
    }
}

/// Mirrors `id` into the object's `id` attribute, if its class has one.
///
/// Placeholders get it in their index cache so that reading the id never
/// forces a load.
pub(crate) fn set_id(obj: &ObjectRef, id: ObjectId) {
    if !obj.schema().has_attribute(ID_ATTRIBUTE) {
        return;
    }
    let value = Value::Int(i64::try_from(id.get()).unwrap_or(i64::MAX));
    if obj.is_loaded() {
        obj.set_raw_attribute(ID_ATTRIBUTE, value);
    } else {
        let mut cache = obj.index_cache().unwrap_or_default();
        cache.insert(ID_ATTRIBUTE.to_string(), value);
        obj.set_index_cache(Some(cache));
    }
}

//! Object nodes.
//!
//! Every persistable entity is a [`GangaObject`] behind an [`ObjectRef`]
//! handle. The handle enforces the attribute contract on every access:
//!
//! - reads fall back to the index cache while the body is not loaded, and
//!   otherwise ask the owning registry for read access first;
//! - writes run the item's checkset and filter hooks, ask the registry for
//!   write access, validate and clone the value, store it, and mark the
//!   object and its parent chain dirty.
//!
//! Locks are taken one node at a time and never held across a call into a
//! hook, a visitor or another node.

use crate::{
    Item, PluginRegistry, RegistryHook, Schema, SchemaError, SchemaResult, Value, Visitor,
};
use ganga_types::ObjectId;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

/// Cheap attribute summary available without loading an object's body.
pub type IndexCache = BTreeMap<String, Value>;

/// Attribute storage of a loaded object.
pub type DataMap = BTreeMap<String, Value>;

type ProxySlot = Weak<dyn Any + Send + Sync>;

/// State of one node in the object tree.
struct GangaObject {
    schema: Arc<Schema>,
    plugins: Arc<PluginRegistry>,
    /// `None` while only the index has been read.
    data: Option<DataMap>,
    index_cache: Option<IndexCache>,
    parent: Option<Weak<RwLock<GangaObject>>>,
    dirty: bool,
    registry: Option<Weak<dyn RegistryHook>>,
    registry_id: Option<ObjectId>,
    proxy: Option<ProxySlot>,
    readonly: bool,
}

/// Shared handle to an object node.
#[derive(Clone)]
pub struct ObjectRef(Arc<RwLock<GangaObject>>);

/// Non-owning handle, used for parent links.
#[derive(Clone, Default)]
pub struct WeakObjectRef(Weak<RwLock<GangaObject>>);

impl WeakObjectRef {
    #[must_use]
    pub fn upgrade(&self) -> Option<ObjectRef> {
        self.0.upgrade().map(ObjectRef)
    }
}

impl ObjectRef {
    fn from_parts(schema: Arc<Schema>, plugins: Arc<PluginRegistry>, data: Option<DataMap>) -> Self {
        Self(Arc::new(RwLock::new(GangaObject {
            schema,
            plugins,
            data,
            index_cache: None,
            parent: None,
            dirty: false,
            registry: None,
            registry_id: None,
            proxy: None,
            readonly: false,
        })))
    }

    /// Creates an instance with every attribute set to its default.
    pub fn new(schema: Arc<Schema>, plugins: Arc<PluginRegistry>) -> SchemaResult<Self> {
        let mut data = DataMap::new();
        for (name, item) in schema.items() {
            data.insert(name.to_string(), plugins.default_value(item)?);
        }
        let obj = Self::from_parts(schema, plugins, Some(data));
        obj.fix_parents();
        Ok(obj)
    }

    /// Creates an instance with an empty data mapping, to be filled by a loader.
    #[must_use]
    pub fn blank(schema: Arc<Schema>, plugins: Arc<PluginRegistry>) -> Self {
        Self::from_parts(schema, plugins, Some(DataMap::new()))
    }

    /// Creates a placeholder whose body has not been loaded.
    #[must_use]
    pub fn unloaded(schema: Arc<Schema>, plugins: Arc<PluginRegistry>, cache: IndexCache) -> Self {
        let obj = Self::from_parts(schema, plugins, None);
        obj.write().index_cache = Some(cache);
        obj
    }

    fn read(&self) -> RwLockReadGuard<'_, GangaObject> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, GangaObject> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ================================================================
    // Identity
    // ================================================================

    #[must_use]
    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakObjectRef {
        WeakObjectRef(Arc::downgrade(&self.0))
    }

    #[must_use]
    pub fn schema(&self) -> Arc<Schema> {
        Arc::clone(&self.read().schema)
    }

    #[must_use]
    pub fn plugins(&self) -> Arc<PluginRegistry> {
        Arc::clone(&self.read().plugins)
    }

    #[must_use]
    pub fn class_name(&self) -> String {
        self.read().schema.name().to_string()
    }

    #[must_use]
    pub fn category(&self) -> String {
        self.read().schema.category().to_string()
    }

    /// Whether this is the placeholder class used for unreadable records.
    #[must_use]
    pub fn is_empty_placeholder(&self) -> bool {
        PluginRegistry::is_empty_class(&self.read().schema)
    }

    // ================================================================
    // Raw state (no hooks, no validation)
    // ================================================================

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.read().data.is_some()
    }

    /// Copy of the data mapping, `None` when the body is not loaded.
    #[must_use]
    pub fn data_snapshot(&self) -> Option<DataMap> {
        self.read().data.clone()
    }

    /// Stored value of `name`, without triggering a load.
    #[must_use]
    pub fn raw_attribute(&self, name: &str) -> Option<Value> {
        self.read().data.as_ref().and_then(|d| d.get(name).cloned())
    }

    /// Whether the data mapping holds `name` explicitly.
    #[must_use]
    pub fn has_raw_attribute(&self, name: &str) -> bool {
        self.read().data.as_ref().is_some_and(|d| d.contains_key(name))
    }

    /// Stores a value directly and adopts any child objects it holds.
    ///
    /// Used by loaders and repositories, which bypass write access.
    pub fn set_raw_attribute(&self, name: &str, value: Value) {
        let children = value.child_objects();
        self.write()
            .data
            .get_or_insert_with(DataMap::new)
            .insert(name.to_string(), value);
        for child in children {
            child.set_parent(Some(self));
        }
    }

    /// Removes a value from the data mapping.
    pub fn remove_raw_attribute(&self, name: &str) -> Option<Value> {
        self.write().data.as_mut().and_then(|d| d.remove(name))
    }

    /// Replaces the whole body and adopts its children.
    pub fn replace_data(&self, data: DataMap) {
        self.write().data = Some(data);
        self.fix_parents();
    }

    /// Turns this handle into an instance of another class holding `data`.
    ///
    /// Used when a placeholder was built from an index naming the wrong class.
    pub fn replace_body(&self, schema: Arc<Schema>, data: DataMap) {
        {
            let mut inner = self.write();
            inner.schema = schema;
            inner.data = Some(data);
        }
        self.fix_parents();
    }

    /// Drops the body; reads fall back to the index cache again.
    pub fn unload(&self) {
        self.write().data = None;
    }

    #[must_use]
    pub fn index_cache(&self) -> Option<IndexCache> {
        self.read().index_cache.clone()
    }

    pub fn set_index_cache(&self, cache: Option<IndexCache>) {
        self.write().index_cache = cache;
    }

    /// Child objects held directly in the data mapping.
    #[must_use]
    pub fn children(&self) -> Vec<ObjectRef> {
        self.read()
            .data
            .as_ref()
            .map(|d| d.values().flat_map(Value::child_objects).collect())
            .unwrap_or_default()
    }

    /// Points every direct child back at this node.
    pub fn fix_parents(&self) {
        for child in self.children() {
            child.set_parent(Some(self));
        }
    }

    // ================================================================
    // Tree
    // ================================================================

    #[must_use]
    pub fn parent(&self) -> Option<ObjectRef> {
        self.read()
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(ObjectRef)
    }

    pub fn set_parent(&self, parent: Option<&ObjectRef>) {
        self.write().parent = parent.map(|p| Arc::downgrade(&p.0));
    }

    /// Topmost ancestor (self when there is no parent).
    #[must_use]
    pub fn root(&self) -> ObjectRef {
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    // ================================================================
    // Registry binding
    // ================================================================

    /// Binds a root object to its owning registry under `id`.
    pub fn attach_registry(&self, hook: Weak<dyn RegistryHook>, id: ObjectId) {
        let mut guard = self.write();
        guard.registry = Some(hook);
        guard.registry_id = Some(id);
    }

    pub fn detach_registry(&self) {
        let mut guard = self.write();
        guard.registry = None;
        guard.registry_id = None;
    }

    #[must_use]
    pub fn registry(&self) -> Option<Arc<dyn RegistryHook>> {
        self.read().registry.as_ref().and_then(Weak::upgrade)
    }

    #[must_use]
    pub fn registry_id(&self) -> Option<ObjectId> {
        self.read().registry_id
    }

    #[must_use]
    pub fn is_readonly(&self) -> bool {
        self.read().readonly
    }

    pub fn set_readonly(&self, readonly: bool) {
        self.write().readonly = readonly;
    }

    // ================================================================
    // Dirty tracking
    // ================================================================

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.read().dirty
    }

    /// Marks this node and its ancestors dirty and notifies the registry.
    pub fn set_dirty(&self) {
        self.write().dirty = true;
        match self.parent() {
            Some(parent) => parent.set_dirty(),
            None => {
                if let Some(hook) = self.registry() {
                    hook.mark_dirty(self);
                }
            }
        }
    }

    /// Clears the dirty flag on this node and every descendant.
    pub fn set_flushed(&self) {
        self.write().dirty = false;
        for child in self.children() {
            child.set_flushed();
        }
    }

    // ================================================================
    // Proxy slot
    // ================================================================

    /// Returns the live proxy bound to this object, creating it with `make`
    /// if there is none. The object only keeps a weak reference.
    pub fn proxy_or_insert_with(
        &self,
        make: impl FnOnce() -> Arc<dyn Any + Send + Sync>,
    ) -> Arc<dyn Any + Send + Sync> {
        let mut guard = self.write();
        if let Some(existing) = guard.proxy.as_ref().and_then(Weak::upgrade) {
            return existing;
        }
        let fresh = make();
        guard.proxy = Some(Arc::downgrade(&fresh));
        fresh
    }

    // ================================================================
    // Attribute access
    // ================================================================

    /// Makes the body available, asking the root's registry to load it.
    pub fn ensure_loaded(&self) -> SchemaResult<()> {
        if self.is_loaded() {
            return Ok(());
        }
        let root = self.root();
        if let Some(hook) = root.registry() {
            hook.read_access(&root)?;
        }
        if self.is_loaded() {
            Ok(())
        } else {
            Err(SchemaError::NotLoaded(self.class_name()))
        }
    }

    /// Reads an attribute.
    ///
    /// While the body is not loaded an index-cache entry is returned if one
    /// exists; otherwise the body is loaded first.
    pub fn get_attribute(&self, name: &str) -> SchemaResult<Value> {
        let schema = self.schema();
        let item = schema
            .item(name)
            .ok_or_else(|| unknown_attribute(&schema, name))?;
        {
            let guard = self.read();
            match &guard.data {
                Some(data) => {
                    if let Some(value) = data.get(name) {
                        return Ok(value.clone());
                    }
                }
                None => {
                    if let Some(value) = guard.index_cache.as_ref().and_then(|c| c.get(name)) {
                        return Ok(value.clone());
                    }
                }
            }
        }
        self.ensure_loaded()?;
        match self.raw_attribute(name) {
            Some(value) => Ok(value),
            None => self.plugins().default_value(item),
        }
    }

    /// Assigns an attribute through the full write path.
    pub fn set_attribute(&self, name: &str, value: impl Into<Value>) -> SchemaResult<()> {
        let value = value.into();
        let schema = self.schema();
        let item = schema
            .item(name)
            .ok_or_else(|| unknown_attribute(&schema, name))?;

        let root = self.root();
        if root.is_readonly() && !item.is_changeable_when_readonly() {
            return Err(SchemaError::ReadOnly {
                class: root.class_name(),
                attribute: name.to_string(),
            });
        }

        if let Some(check) = item.checkset_hook() {
            check(self, &value).map_err(|message| hook_error(name, message))?;
        }
        let value = match item.filter_hook() {
            Some(filter) => filter(self, value).map_err(|message| hook_error(name, message))?,
            None => value,
        };

        if let Some(hook) = root.registry() {
            hook.write_access(&root)?;
        }

        let value = self.prepare_value(name, item, value)?;
        let children = value.child_objects();
        {
            let mut guard = self.write();
            let class = guard.schema.name().to_string();
            let data = guard.data.as_mut().ok_or(SchemaError::NotLoaded(class))?;
            data.insert(name.to_string(), value);
        }
        for child in children {
            child.set_parent(Some(self));
        }
        self.set_dirty();
        Ok(())
    }

    fn prepare_value(&self, name: &str, item: &Item, value: Value) -> SchemaResult<Value> {
        let Some(category) = item.category() else {
            return item.check_simple(name, value);
        };
        if value.is_none() {
            return if item.is_optional() {
                Ok(Value::None)
            } else {
                Err(SchemaError::NoneNotAllowed(name.to_string()))
            };
        }
        match item.coerce_sequence(name, value)? {
            Value::List(items) if item.is_sequence() => items
                .into_iter()
                .map(|v| clone_component(name, category, v))
                .collect::<SchemaResult<Vec<_>>>()
                .map(Value::List),
            other => clone_component(name, category, other),
        }
    }

    /// Copies every copyable attribute from `src`; the rest are reset to defaults.
    pub fn copy_from(&self, src: &ObjectRef) -> SchemaResult<()> {
        if self.ptr_eq(src) {
            return Ok(());
        }
        let schema = self.schema();
        let src_schema = src.schema();
        if !schema.same_class(&src_schema) {
            return Err(SchemaError::ClassMismatch {
                expected: schema.name().to_string(),
                found: src_schema.name().to_string(),
            });
        }
        src.ensure_loaded()?;
        let plugins = self.plugins();
        for (name, item) in schema.items() {
            let value = if item.is_copyable() {
                src.get_attribute(name)?
            } else {
                plugins.default_value(item)?
            };
            self.set_attribute(name, value)?;
        }
        Ok(())
    }

    /// Deep copy, detached from parent and registry.
    ///
    /// Non-copyable attributes are reset to their defaults; component values
    /// are cloned recursively.
    pub fn deep_clone(&self) -> SchemaResult<ObjectRef> {
        self.ensure_loaded()?;
        let (schema, plugins, data) = {
            let guard = self.read();
            (
                Arc::clone(&guard.schema),
                Arc::clone(&guard.plugins),
                guard.data.clone().unwrap_or_default(),
            )
        };
        let mut copied = DataMap::new();
        for (name, item) in schema.items() {
            let value = if item.is_copyable() {
                match data.get(name) {
                    Some(value) => deep_copy_value(value)?,
                    None => continue,
                }
            } else {
                plugins.default_value(item)?
            };
            copied.insert(name.to_string(), value);
        }
        let clone = Self::from_parts(schema, plugins, Some(copied));
        clone.fix_parents();
        Ok(clone)
    }

    /// Walks the node depth-first, see [`Visitor`].
    pub fn accept(&self, visitor: &mut dyn Visitor) -> SchemaResult<()> {
        self.ensure_loaded()?;
        let schema = self.schema();
        visitor.node_begin(self, &schema)?;
        for (name, item) in schema.simple_items().filter(|(_, i)| i.is_visitable()) {
            let value = self.get_attribute(name)?;
            visitor.simple_attribute(self, name, &value, item.is_sequence())?;
        }
        for (name, item) in schema.shared_items().filter(|(_, i)| i.is_visitable()) {
            let value = self.get_attribute(name)?;
            visitor.shared_attribute(self, name, &value, item.is_sequence())?;
        }
        for (name, item) in schema.component_items().filter(|(_, i)| i.is_visitable()) {
            let value = self.get_attribute(name)?;
            visitor.component_attribute(self, name, &value, item.is_sequence())?;
        }
        visitor.node_end(self, &schema)
    }

    /// Same class and equal values for every comparable attribute.
    #[must_use]
    pub fn structural_eq(&self, other: &ObjectRef) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        let schema = self.schema();
        if !schema.same_class(&other.schema()) {
            return false;
        }
        schema
            .items()
            .filter(|(_, item)| item.is_comparable())
            .all(|(name, _)| {
                matches!(
                    (self.get_attribute(name), other.get_attribute(name)),
                    (Ok(a), Ok(b)) if a == b
                )
            })
    }
}

fn unknown_attribute(schema: &Schema, name: &str) -> SchemaError {
    SchemaError::UnknownAttribute {
        class: schema.name().to_string(),
        name: name.to_string(),
    }
}

fn hook_error(name: &str, message: String) -> SchemaError {
    SchemaError::Hook {
        attribute: name.to_string(),
        message,
    }
}

fn clone_component(name: &str, category: &str, value: Value) -> SchemaResult<Value> {
    match value {
        Value::Object(obj) => {
            let found = obj.category();
            if found != category {
                return Err(SchemaError::CategoryMismatch {
                    attribute: name.to_string(),
                    expected: category.to_string(),
                    found,
                });
            }
            Ok(Value::Object(obj.deep_clone()?))
        }
        Value::None => Err(SchemaError::NoneNotAllowed(name.to_string())),
        other => Err(SchemaError::TypeMismatch {
            attribute: name.to_string(),
            expected: format!("component of category '{category}'"),
            found: other.value_type(),
        }),
    }
}

fn deep_copy_value(value: &Value) -> SchemaResult<Value> {
    match value {
        Value::Object(obj) => Ok(Value::Object(obj.deep_clone()?)),
        Value::List(items) => items
            .iter()
            .map(deep_copy_value)
            .collect::<SchemaResult<Vec<_>>>()
            .map(Value::List),
        Value::Dict(map) => map
            .iter()
            .map(|(k, v)| Ok((k.clone(), deep_copy_value(v)?)))
            .collect::<SchemaResult<BTreeMap<_, _>>>()
            .map(Value::Dict),
        other => Ok(other.clone()),
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.structural_eq(other)
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_read() {
            Ok(guard) => write!(
                f,
                "ObjectRef({}.{}{})",
                guard.schema.category(),
                guard.schema.name(),
                if guard.data.is_some() { "" } else { ", unloaded" }
            ),
            Err(_) => f.write_str("ObjectRef(<locked>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Item, Version};

    fn plugins() -> Arc<PluginRegistry> {
        let plugins = PluginRegistry::new();
        plugins.register(
            Schema::new("leaves", "Leaf", Version::new(1, 0)).with_item("n", Item::simple(0i64)),
        );
        plugins.register(
            Schema::new("trees", "Tree", Version::new(1, 0))
                .with_item("leaf", Item::component("leaves", "Leaf")),
        );
        plugins
    }

    #[test]
    fn root_walks_parent_chain() {
        let plugins = plugins();
        let tree = plugins.instantiate("trees", "Tree").unwrap();
        let leaf = tree.raw_attribute("leaf").unwrap();
        let leaf = leaf.as_object().unwrap();
        assert!(leaf.root().ptr_eq(&tree));
        assert!(tree.root().ptr_eq(&tree));
    }

    #[test]
    fn parent_link_is_weak() {
        let plugins = plugins();
        let tree = plugins.instantiate("trees", "Tree").unwrap();
        let leaf = tree.raw_attribute("leaf").unwrap().as_object().unwrap().clone();
        drop(tree);
        assert!(leaf.parent().is_none());
    }

    #[test]
    fn proxy_slot_is_reused_while_alive() {
        let plugins = plugins();
        let leaf = plugins.instantiate("leaves", "Leaf").unwrap();
        let first = leaf.proxy_or_insert_with(|| Arc::new(1u8));
        let second = leaf.proxy_or_insert_with(|| Arc::new(2u8));
        assert!(Arc::ptr_eq(&first, &second));
        drop(first);
        drop(second);
        let third = leaf.proxy_or_insert_with(|| Arc::new(3u8));
        assert_eq!(third.downcast_ref::<u8>(), Some(&3));
    }
}

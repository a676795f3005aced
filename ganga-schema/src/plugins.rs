//! Class resolution table.
//!
//! Replaces a process-global plugin lookup: one [`PluginRegistry`] is built
//! at startup and handed to every repository, loader and proxy that needs to
//! turn a `(category, name)` pair into a schema.

use crate::{Item, ItemKind, ObjectRef, Schema, SchemaError, SchemaResult, Value, Version};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// Category of internal bookkeeping classes.
pub const INTERNAL_CATEGORY: &str = "internal";

/// Placeholder class used for records that could not be reconstructed.
pub const EMPTY_OBJECT_NAME: &str = "EmptyGangaObject";

/// Maps `(category, name)` to registered class schemas.
#[derive(Debug)]
pub struct PluginRegistry {
    classes: RwLock<HashMap<(String, String), Arc<Schema>>>,
    empty: Arc<Schema>,
}

impl PluginRegistry {
    /// Creates a registry containing only the internal placeholder class.
    #[must_use]
    pub fn new() -> Arc<Self> {
        let empty = Arc::new(Schema::new(
            INTERNAL_CATEGORY,
            EMPTY_OBJECT_NAME,
            Version::new(0, 0),
        ));
        let mut classes = HashMap::new();
        classes.insert(
            (INTERNAL_CATEGORY.to_string(), EMPTY_OBJECT_NAME.to_string()),
            Arc::clone(&empty),
        );
        Arc::new(Self {
            classes: RwLock::new(classes),
            empty,
        })
    }

    /// Registers a class, replacing any previous definition of the same pair.
    pub fn register(&self, schema: Schema) -> Arc<Schema> {
        let schema = Arc::new(schema);
        debug!(category = %schema.category(), name = %schema.name(), version = %schema.version(), "registering plugin");
        self.classes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                (schema.category().to_string(), schema.name().to_string()),
                Arc::clone(&schema),
            );
        schema
    }

    pub fn find(&self, category: &str, name: &str) -> SchemaResult<Arc<Schema>> {
        self.classes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(category.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| SchemaError::PluginNotFound {
                category: category.to_string(),
                name: name.to_string(),
            })
    }

    #[must_use]
    pub fn contains(&self, category: &str, name: &str) -> bool {
        self.find(category, name).is_ok()
    }

    /// Names registered under a category, sorted.
    #[must_use]
    pub fn names_in(&self, category: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .classes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .filter(|(c, _)| c == category)
            .map(|(_, n)| n.clone())
            .collect();
        names.sort();
        names
    }

    /// Schema of the placeholder class.
    #[must_use]
    pub fn empty_schema(&self) -> Arc<Schema> {
        Arc::clone(&self.empty)
    }

    /// Whether `schema` is the placeholder class.
    #[must_use]
    pub fn is_empty_class(schema: &Schema) -> bool {
        schema.category() == INTERNAL_CATEGORY && schema.name() == EMPTY_OBJECT_NAME
    }

    /// Creates a fully defaulted instance of a registered class.
    pub fn instantiate(self: &Arc<Self>, category: &str, name: &str) -> SchemaResult<ObjectRef> {
        let schema = self.find(category, name)?;
        ObjectRef::new(schema, Arc::clone(self))
    }

    /// Creates an instance of the placeholder class.
    #[must_use]
    pub fn empty_object(self: &Arc<Self>) -> ObjectRef {
        ObjectRef::blank(self.empty_schema(), Arc::clone(self))
    }

    /// Materializes the declared default of `item`.
    ///
    /// Component defaults name a plugin of the item's category; each call
    /// returns a fresh instance so two objects never share a default child.
    pub fn default_value(self: &Arc<Self>, item: &Item) -> SchemaResult<Value> {
        match item.kind() {
            ItemKind::Component { category } => self.materialize(category, item.defvalue()),
            ItemKind::Simple | ItemKind::Shared => Ok(item.defvalue().clone()),
        }
    }

    fn materialize(self: &Arc<Self>, category: &str, value: &Value) -> SchemaResult<Value> {
        match value {
            Value::Str(name) => Ok(Value::Object(self.instantiate(category, name)?)),
            Value::Object(obj) => Ok(Value::Object(obj.deep_clone()?)),
            Value::List(items) => items
                .iter()
                .map(|v| self.materialize(category, v))
                .collect::<SchemaResult<Vec<_>>>()
                .map(Value::List),
            other => Ok(other.clone()),
        }
    }
}

//! Schema-driven object model for Ganga.
//!
//! Defines the typed, versioned, ownership-tracked objects that the proxy,
//! streamer and repository layers operate on:
//! - [`Schema`] / [`Item`]: ordered attribute declarations with defaults,
//!   type lists, flags and validation hooks
//! - [`Version`]: `(major, minor)` schema versions and their compatibility rule
//! - [`PluginRegistry`]: the `(category, name) → class` resolution table
//! - [`ObjectRef`]: a node in the object tree: lazy reads, validated writes,
//!   dirty tracking, deep copies and visitor traversal
//! - [`RegistryHook`]: the callbacks a root object makes into its owning registry
//!
//! Nothing here touches the filesystem.

mod error;
mod hook;
mod item;
mod object;
mod plugins;
mod schema;
mod value;
mod version;
mod visitor;

pub use error::{SchemaError, SchemaResult};
pub use hook::RegistryHook;
pub use item::{CheckSet, Filter, Item, ItemKind};
pub use object::{DataMap, IndexCache, ObjectRef, WeakObjectRef};
pub use plugins::{PluginRegistry, EMPTY_OBJECT_NAME, INTERNAL_CATEGORY};
pub use schema::Schema;
pub use value::{Value, ValueType};
pub use version::{ParseVersionError, Version};
pub use visitor::Visitor;

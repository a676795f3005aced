use crate::{ObjectRef, SchemaResult};

/// Callbacks from an object to the registry that owns its root.
///
/// Implementations must not call back into attribute setters of `root`:
/// they run while the setter is in progress.
pub trait RegistryHook: Send + Sync {
    /// Registry name, for diagnostics.
    fn name(&self) -> &str;

    /// Makes the body of `root` available (lazy load).
    fn read_access(&self, root: &ObjectRef) -> SchemaResult<()>;

    /// Acquires the write lock for `root` and loads it if needed.
    fn write_access(&self, root: &ObjectRef) -> SchemaResult<()>;

    /// Records that `root` has unflushed changes.
    fn mark_dirty(&self, root: &ObjectRef);
}

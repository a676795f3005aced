use crate::{ObjectRef, Schema, SchemaResult, Value};

/// Depth-first traversal callbacks driven by [`ObjectRef::accept`].
///
/// Attributes are visited simple first, then shared, then components, each
/// group in declaration order. Visitors recurse into components themselves
/// by calling `accept` on the child.
pub trait Visitor {
    fn node_begin(&mut self, node: &ObjectRef, schema: &Schema) -> SchemaResult<()>;

    fn node_end(&mut self, node: &ObjectRef, schema: &Schema) -> SchemaResult<()>;

    fn simple_attribute(
        &mut self,
        node: &ObjectRef,
        name: &str,
        value: &Value,
        sequence: bool,
    ) -> SchemaResult<()>;

    fn shared_attribute(
        &mut self,
        node: &ObjectRef,
        name: &str,
        value: &Value,
        sequence: bool,
    ) -> SchemaResult<()> {
        self.simple_attribute(node, name, value, sequence)
    }

    fn component_attribute(
        &mut self,
        node: &ObjectRef,
        name: &str,
        value: &Value,
        sequence: bool,
    ) -> SchemaResult<()>;
}

//! Human-readable rendering of an object tree.

use crate::literal::to_literal;
use ganga_schema::{ObjectRef, Schema, SchemaResult, Value, Visitor};

const INDENT: &str = "   ";

/// Renders `Class (\n   attr = value ,\n   ... )` with nested components.
pub struct TreePrinter {
    out: String,
    level: usize,
    show_hidden: bool,
    /// Whether the current node already printed an attribute line.
    started: Vec<bool>,
}

impl TreePrinter {
    #[must_use]
    pub fn new(show_hidden: bool) -> Self {
        Self {
            out: String::new(),
            level: 0,
            show_hidden,
            started: Vec::new(),
        }
    }

    /// Renders `obj` and returns the text.
    pub fn render(mut self, obj: &ObjectRef) -> SchemaResult<String> {
        obj.accept(&mut self)?;
        Ok(self.out)
    }

    fn visible(&self, schema: &Schema, name: &str) -> bool {
        self.show_hidden || schema.item(name).is_none_or(|i| !i.is_hidden())
    }

    fn begin_line(&mut self, name: &str) {
        if let Some(started) = self.started.last_mut() {
            if *started {
                self.out.push_str(" ,");
            }
            *started = true;
        }
        self.out.push('\n');
        for _ in 0..self.level {
            self.out.push_str(INDENT);
        }
        self.out.push_str(name);
        self.out.push_str(" = ");
    }

    fn write_component(&mut self, value: &Value) -> SchemaResult<()> {
        match value {
            Value::Object(child) => child.accept(self),
            Value::List(items) => {
                self.out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    self.write_component(item)?;
                }
                self.out.push(']');
                Ok(())
            }
            other => {
                self.out.push_str(&to_literal(other).unwrap_or_default());
                Ok(())
            }
        }
    }
}

impl Visitor for TreePrinter {
    fn node_begin(&mut self, _node: &ObjectRef, schema: &Schema) -> SchemaResult<()> {
        self.out.push_str(schema.name());
        self.out.push_str(" (");
        self.level += 1;
        self.started.push(false);
        Ok(())
    }

    fn node_end(&mut self, _node: &ObjectRef, _schema: &Schema) -> SchemaResult<()> {
        self.level -= 1;
        self.started.pop();
        self.out.push_str(" )");
        Ok(())
    }

    fn simple_attribute(
        &mut self,
        node: &ObjectRef,
        name: &str,
        value: &Value,
        _sequence: bool,
    ) -> SchemaResult<()> {
        if !self.visible(&node.schema(), name) {
            return Ok(());
        }
        self.begin_line(name);
        self.out.push_str(&to_literal(value).unwrap_or_default());
        Ok(())
    }

    fn component_attribute(
        &mut self,
        node: &ObjectRef,
        name: &str,
        value: &Value,
        _sequence: bool,
    ) -> SchemaResult<()> {
        if !self.visible(&node.schema(), name) {
            return Ok(());
        }
        self.begin_line(name);
        self.write_component(value)
    }
}

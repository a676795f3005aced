//! Object tree → XML record.

use crate::literal::to_literal;
use crate::StreamResult;
use ganga_schema::{ObjectRef, Schema, SchemaError, SchemaResult, Value, ValueType, Visitor};
use quick_xml::escape::{escape, partial_escape};
use std::io::Write;

/// Renders one object tree as a `<root>` record.
///
/// `selection` names a top-level attribute to leave out, used when a
/// sub-split collection is stored in separate files.
pub struct VStreamer {
    out: String,
    level: usize,
    selection: String,
}

impl VStreamer {
    #[must_use]
    pub fn new(selection: &str) -> Self {
        Self {
            out: String::new(),
            level: 0,
            selection: selection.to_string(),
        }
    }

    /// Consumes the streamer and returns the rendered record.
    pub fn stream(mut self, obj: &ObjectRef) -> StreamResult<String> {
        self.out.push_str("<root>\n");
        obj.accept(&mut self)?;
        self.out.push_str("</root>\n");
        Ok(self.out)
    }

    fn line(&mut self, indent: usize, text: &str) {
        for _ in 0..indent {
            self.out.push(' ');
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn show_attribute(&self, schema: &Schema, name: &str) -> bool {
        let transient = schema.item(name).is_some_and(|i| i.is_transient());
        !transient && (self.level > 1 || name != self.selection)
    }

    fn value_element(name: &str, value: &Value) -> SchemaResult<String> {
        let literal = to_literal(value).ok_or_else(|| SchemaError::TypeMismatch {
            attribute: name.to_string(),
            expected: "a plain value".to_string(),
            found: ValueType::Object,
        })?;
        Ok(format!("<value>{}</value>", partial_escape(literal.as_str())))
    }

    fn accept_optional(&mut self, name: &str, value: &Value) -> SchemaResult<()> {
        match value {
            Value::None => {
                let indent = self.level + 1;
                self.line(indent, "<value>None</value>");
                Ok(())
            }
            Value::Object(child) => child.accept(self),
            other => Err(SchemaError::TypeMismatch {
                attribute: name.to_string(),
                expected: "a component".to_string(),
                found: other.value_type(),
            }),
        }
    }
}

impl Visitor for VStreamer {
    fn node_begin(&mut self, _node: &ObjectRef, schema: &Schema) -> SchemaResult<()> {
        self.level += 1;
        let tag = format!(
            "<class name=\"{}\" version=\"{}\" category=\"{}\">",
            escape(schema.name()),
            schema.version(),
            escape(schema.category())
        );
        self.line(self.level, &tag);
        Ok(())
    }

    fn node_end(&mut self, _node: &ObjectRef, _schema: &Schema) -> SchemaResult<()> {
        self.line(self.level, "</class>");
        self.level -= 1;
        Ok(())
    }

    fn simple_attribute(
        &mut self,
        node: &ObjectRef,
        name: &str,
        value: &Value,
        sequence: bool,
    ) -> SchemaResult<()> {
        if !self.show_attribute(&node.schema(), name) {
            return Ok(());
        }
        let indent = self.level + 1;
        let open = format!("<attribute name=\"{}\">", escape(name));
        match value {
            Value::List(items) if sequence => {
                self.line(indent, &open);
                self.line(indent + 1, "<sequence>");
                for item in items {
                    let element = Self::value_element(name, item)?;
                    self.line(indent + 2, &element);
                }
                self.line(indent + 1, "</sequence>");
                self.line(indent, "</attribute>");
            }
            _ => {
                let element = Self::value_element(name, value)?;
                self.line(indent, &format!("{open}{element}</attribute>"));
            }
        }
        Ok(())
    }

    fn component_attribute(
        &mut self,
        node: &ObjectRef,
        name: &str,
        value: &Value,
        sequence: bool,
    ) -> SchemaResult<()> {
        if !self.show_attribute(&node.schema(), name) {
            return Ok(());
        }
        let indent = self.level + 1;
        self.line(indent, &format!("<attribute name=\"{}\">", escape(name)));
        match value {
            Value::List(items) if sequence => {
                self.line(indent + 1, "<sequence>");
                self.level += 2;
                for item in items {
                    self.accept_optional(name, item)?;
                }
                self.level -= 2;
                self.line(indent + 1, "</sequence>");
            }
            _ => {
                self.level += 1;
                self.accept_optional(name, value)?;
                self.level -= 1;
            }
        }
        self.line(indent, "</attribute>");
        Ok(())
    }
}

/// Renders `obj` as a record string, leaving out the top-level `exclude` attribute.
pub fn to_string(obj: &ObjectRef, exclude: &str) -> StreamResult<String> {
    VStreamer::new(exclude).stream(obj)
}

/// Renders `obj` fully before writing anything to `out`.
pub fn to_writer<W: Write>(obj: &ObjectRef, exclude: &str, mut out: W) -> StreamResult<()> {
    let record = to_string(obj, exclude)?;
    out.write_all(record.as_bytes())?;
    out.flush()?;
    Ok(())
}

//! XML record → object tree.
//!
//! A single pass over the pull-parser events drives an explicit stack
//! machine. Unknown classes and incompatible schema versions are contained:
//! the offending `<class>` element becomes a placeholder object, its whole
//! subtree is skipped, and an error is recorded while the rest of the
//! record is still recovered.

use crate::literal::parse_literal;
use crate::{StreamError, StreamResult};
use ganga_schema::{ObjectRef, PluginRegistry, Value, Version};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::io::Read;
use std::sync::Arc;
use tracing::debug;

/// Result of a parse: the rebuilt object plus any contained errors.
#[derive(Debug)]
pub struct Loaded {
    pub object: ObjectRef,
    pub errors: Vec<StreamError>,
}

enum Slot {
    Object(ObjectRef),
    Name(String),
    Value(Value),
}

impl Slot {
    fn into_value(self) -> StreamResult<Value> {
        match self {
            Slot::Object(obj) => Ok(Value::Object(obj)),
            Slot::Value(value) => Ok(value),
            Slot::Name(name) => Err(StreamError::Structure(format!(
                "attribute '{name}' has no value"
            ))),
        }
    }
}

/// Stack machine rebuilding one object tree.
pub struct Loader {
    plugins: Arc<PluginRegistry>,
    stack: Option<Vec<Slot>>,
    ignore_count: usize,
    errors: Vec<StreamError>,
    value_construct: Option<String>,
    sequence_start: Vec<usize>,
    open_classes: usize,
    seen_top_level: bool,
}

impl Loader {
    #[must_use]
    pub fn new(plugins: Arc<PluginRegistry>) -> Self {
        Self {
            plugins,
            stack: None,
            ignore_count: 0,
            errors: Vec::new(),
            value_construct: None,
            sequence_start: Vec::new(),
            open_classes: 0,
            seen_top_level: false,
        }
    }

    /// Parses a complete record.
    pub fn parse(mut self, xml: &str) -> StreamResult<Loaded> {
        let mut reader = Reader::from_str(xml);
        loop {
            let event = reader.read_event().map_err(|e| {
                StreamError::Xml(format!("{e} at byte {}", reader.buffer_position()))
            })?;
            match event {
                Event::Start(e) => self.start_element(&e)?,
                Event::Empty(e) => {
                    self.start_element(&e)?;
                    self.end_element(e.name().as_ref())?;
                }
                Event::End(e) => self.end_element(e.name().as_ref())?,
                Event::Text(t) => {
                    if let Some(buf) = self.value_construct.as_mut() {
                        let text = t.unescape().map_err(|e| StreamError::Xml(e.to_string()))?;
                        buf.push_str(&text);
                    }
                }
                Event::CData(c) => {
                    if let Some(buf) = self.value_construct.as_mut() {
                        buf.push_str(&String::from_utf8_lossy(&c));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }
        self.finish()
    }

    fn stack(&mut self) -> StreamResult<&mut Vec<Slot>> {
        self.stack
            .as_mut()
            .ok_or_else(|| StreamError::Structure("missing <root> element".into()))
    }

    fn start_element(&mut self, e: &BytesStart<'_>) -> StreamResult<()> {
        if self.ignore_count > 0 {
            self.ignore_count += 1;
            return Ok(());
        }
        match e.name().as_ref() {
            b"root" => {
                if self.stack.is_some() {
                    return Err(StreamError::Structure("duplicated <root> element".into()));
                }
                self.stack = Some(Vec::new());
            }
            b"class" => {
                self.stack()?;
                if self.open_classes == 0 {
                    if self.seen_top_level {
                        return Err(StreamError::Structure(
                            "multiple objects inside <root> element".into(),
                        ));
                    }
                    self.seen_top_level = true;
                }
                self.open_classes += 1;
                let category = required_attr(e, "category")?;
                let name = required_attr(e, "name")?;
                let version = required_attr(e, "version")?;
                let obj = self.resolve_class(&category, &name, &version)?;
                self.stack()?.push(Slot::Object(obj));
            }
            b"attribute" => {
                let name = required_attr(e, "name")?;
                self.stack()?.push(Slot::Name(name));
            }
            b"value" => {
                self.stack()?;
                self.value_construct = Some(String::new());
            }
            b"sequence" => {
                let depth = self.stack()?.len();
                self.sequence_start.push(depth);
            }
            other => {
                debug!(element = %String::from_utf8_lossy(other), "ignoring unknown element");
            }
        }
        Ok(())
    }

    fn resolve_class(
        &mut self,
        category: &str,
        name: &str,
        version: &str,
    ) -> StreamResult<ObjectRef> {
        let stored: Version = version
            .parse()
            .map_err(|e| StreamError::Structure(format!("{e}")))?;
        let schema = match self.plugins.find(category, name) {
            Ok(schema) => schema,
            Err(_) => {
                self.errors.push(StreamError::UnknownClass {
                    category: category.to_string(),
                    name: name.to_string(),
                });
                self.ignore_count = 1;
                return Ok(self.plugins.empty_object());
            }
        };
        if !schema.version().is_compatible(&stored) {
            self.errors.push(StreamError::SchemaVersion {
                name: name.to_string(),
                stored,
                current: schema.version(),
            });
            self.ignore_count = 1;
            return Ok(self.plugins.empty_object());
        }
        Ok(ObjectRef::blank(schema, Arc::clone(&self.plugins)))
    }

    fn end_element(&mut self, name: &[u8]) -> StreamResult<()> {
        if self.ignore_count > 0 {
            self.ignore_count -= 1;
            if self.ignore_count == 0 {
                // closing tag of the placeholder's own <class>
                self.open_classes = self.open_classes.saturating_sub(1);
            }
            return Ok(());
        }
        match name {
            b"attribute" => {
                let stack = self.stack()?;
                let value = pop(stack)?.into_value()?;
                let Slot::Name(aname) = pop(stack)? else {
                    return Err(StreamError::Structure("attribute without a name".into()));
                };
                let Some(Slot::Object(obj)) = stack.last() else {
                    return Err(StreamError::Structure(format!(
                        "attribute '{aname}' outside of a class"
                    )));
                };
                obj.set_raw_attribute(&aname, value);
            }
            b"value" => {
                let text = self.value_construct.take().unwrap_or_default();
                let value = parse_literal(&text)?;
                self.stack()?.push(Slot::Value(value));
            }
            b"sequence" => {
                let start = self
                    .sequence_start
                    .pop()
                    .ok_or_else(|| StreamError::Structure("unbalanced </sequence>".into()))?;
                let stack = self.stack()?;
                if start > stack.len() {
                    return Err(StreamError::Structure("corrupt <sequence> block".into()));
                }
                let items = stack
                    .drain(start..)
                    .map(Slot::into_value)
                    .collect::<StreamResult<Vec<_>>>()?;
                stack.push(Slot::Value(Value::List(items)));
            }
            b"class" => {
                self.open_classes = self.open_classes.saturating_sub(1);
                let Some(Slot::Object(obj)) = self.stack()?.last() else {
                    return Err(StreamError::Structure("</class> without an object".into()));
                };
                complete_object(obj)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn finish(mut self) -> StreamResult<Loaded> {
        let stack = self.stack()?;
        if stack.len() != 1 {
            return Err(StreamError::Structure(format!(
                "expected exactly one object inside <root>, found {} stack entries",
                stack.len()
            )));
        }
        let Some(Slot::Object(object)) = stack.pop() else {
            return Err(StreamError::Structure("<root> does not contain a class".into()));
        };
        Ok(Loaded {
            object,
            errors: self.errors,
        })
    }
}

fn pop(stack: &mut Vec<Slot>) -> StreamResult<Slot> {
    stack
        .pop()
        .ok_or_else(|| StreamError::Structure("unexpected end of element".into()))
}

fn required_attr(e: &BytesStart<'_>, key: &str) -> StreamResult<String> {
    let attr = e
        .try_get_attribute(key)
        .map_err(|err| StreamError::Xml(err.to_string()))?
        .ok_or_else(|| {
            StreamError::Structure(format!(
                "<{}> without '{key}' attribute",
                String::from_utf8_lossy(e.name().as_ref())
            ))
        })?;
    let value = attr
        .unescape_value()
        .map_err(|err| StreamError::Xml(err.to_string()))?;
    Ok(value.into_owned())
}

/// Fills defaults for attributes the record omitted and adopts children.
fn complete_object(obj: &ObjectRef) -> StreamResult<()> {
    let schema = obj.schema();
    let plugins = obj.plugins();
    for (name, item) in schema.items() {
        if obj.has_raw_attribute(name) {
            continue;
        }
        if !item.loads_default() {
            return Err(StreamError::Incomplete {
                class: schema.name().to_string(),
                attribute: name.to_string(),
            });
        }
        obj.set_raw_attribute(name, plugins.default_value(item)?);
    }
    obj.fix_parents();
    Ok(())
}

/// Parses a record from a string.
pub fn from_str(plugins: &Arc<PluginRegistry>, xml: &str) -> StreamResult<Loaded> {
    Loader::new(Arc::clone(plugins)).parse(xml)
}

/// Parses a record from a reader.
pub fn from_reader<R: Read>(plugins: &Arc<PluginRegistry>, mut input: R) -> StreamResult<Loaded> {
    let mut xml = String::new();
    input.read_to_string(&mut xml)?;
    from_str(plugins, &xml)
}

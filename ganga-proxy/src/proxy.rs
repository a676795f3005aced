use crate::{GpiValue, ProxyError, ProxyResult};
use ganga_schema::{Item, ObjectRef, Value};
use ganga_streamer::TreePrinter;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

struct ProxyShell {
    object: ObjectRef,
}

/// User-facing handle to an object.
///
/// There is at most one live proxy per object: [`Proxy::wrap`] hands out
/// the existing one while anything still holds it. The object keeps only a
/// weak reference to its proxy, the proxy keeps the object alive.
#[derive(Clone)]
pub struct Proxy(Arc<ProxyShell>);

impl Proxy {
    /// Returns the proxy bound to `object`, creating it if needed.
    #[must_use]
    pub fn wrap(object: &ObjectRef) -> Self {
        let slot = object.proxy_or_insert_with(|| {
            let shell: Arc<dyn Any + Send + Sync> = Arc::new(ProxyShell {
                object: object.clone(),
            });
            shell
        });
        match slot.downcast::<ProxyShell>() {
            Ok(shell) => Self(shell),
            // slot held by something else; hand out an unshared proxy
            Err(_) => Self(Arc::new(ProxyShell {
                object: object.clone(),
            })),
        }
    }

    /// The wrapped implementation object.
    #[must_use]
    pub fn implementation(&self) -> &ObjectRef {
        &self.0.object
    }

    #[must_use]
    pub fn class_name(&self) -> String {
        self.0.object.class_name()
    }

    #[must_use]
    pub fn category(&self) -> String {
        self.0.object.category()
    }

    /// Whether both handles wrap the same object.
    #[must_use]
    pub fn ptr_eq(&self, other: &Proxy) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Visible attribute names in declaration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.0
            .object
            .schema()
            .items()
            .filter(|(_, item)| !item.is_hidden())
            .map(|(name, _)| name.to_string())
            .collect()
    }

    /// Reads a visible attribute; component values come back wrapped.
    pub fn get(&self, name: &str) -> ProxyResult<GpiValue> {
        self.visible_item(name)?;
        let value = self.0.object.get_attribute(name)?;
        Ok(GpiValue::from_value(value))
    }

    /// Assigns a visible, unprotected attribute.
    ///
    /// A string assigned to a component attribute names the plugin to
    /// construct, so `job.set("backend", "Local")` builds a `Local` backend.
    pub fn set(&self, name: &str, value: impl Into<GpiValue>) -> ProxyResult<()> {
        let item = self.visible_item(name)?;
        if item.is_protected() {
            return Err(ProxyError::ProtectedAttribute {
                class: self.class_name(),
                name: name.to_string(),
            });
        }
        let value = self.resolve(&item, value.into())?;
        self.0.object.set_attribute(name, value)?;
        Ok(())
    }

    /// Structural copy wrapped in a fresh proxy.
    pub fn copy(&self) -> ProxyResult<Proxy> {
        let clone = self.0.object.deep_clone()?;
        Ok(Proxy::wrap(&clone))
    }

    fn visible_item(&self, name: &str) -> ProxyResult<Item> {
        let schema = self.0.object.schema();
        match schema.item(name) {
            Some(item) if !item.is_hidden() => Ok(item.clone()),
            _ => Err(ProxyError::UnknownAttribute {
                class: schema.name().to_string(),
                name: name.to_string(),
            }),
        }
    }

    fn resolve(&self, item: &Item, value: GpiValue) -> ProxyResult<Value> {
        let Some(category) = item.category() else {
            return Ok(value.into_value());
        };
        let plugins = self.0.object.plugins();
        let shortcut = |v: GpiValue| -> ProxyResult<Value> {
            match v {
                GpiValue::Str(plugin) => Ok(Value::Object(plugins.instantiate(category, &plugin)?)),
                other => Ok(other.into_value()),
            }
        };
        match value {
            GpiValue::List(items) => items
                .into_iter()
                .map(shortcut)
                .collect::<ProxyResult<Vec<_>>>()
                .map(Value::List),
            other => shortcut(other),
        }
    }
}

impl PartialEq for Proxy {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.0.object == other.0.object
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Proxy").field(&self.0.object).finish()
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match TreePrinter::new(false).render(&self.0.object) {
            Ok(text) => f.write_str(&text),
            Err(e) => write!(f, "{} (<unavailable: {e}>)", self.class_name()),
        }
    }
}

use crate::{GpiValue, Proxy, ProxyError, ProxyResult};
use ganga_schema::{ObjectRef, PluginRegistry, Schema};
use std::sync::Arc;
use tracing::warn;

/// User-facing constructor for one registered plugin class.
#[derive(Debug, Clone)]
pub struct GpiClass {
    plugins: Arc<PluginRegistry>,
    schema: Arc<Schema>,
}

impl GpiClass {
    pub fn new(plugins: &Arc<PluginRegistry>, category: &str, name: &str) -> ProxyResult<Self> {
        Ok(Self {
            plugins: Arc::clone(plugins),
            schema: plugins.find(category, name)?,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.schema.name()
    }

    #[must_use]
    pub fn category(&self) -> &str {
        self.schema.category()
    }

    /// New instance with every attribute at its default.
    pub fn create(&self) -> ProxyResult<Proxy> {
        let object = ObjectRef::new(Arc::clone(&self.schema), Arc::clone(&self.plugins))?;
        Ok(Proxy::wrap(&object))
    }

    /// New instance, optionally copied from `source`, then with `kwargs`
    /// assigned through the normal proxy write path.
    ///
    /// Unknown keywords are logged and ignored; protected ones are refused.
    pub fn construct<'a>(
        &self,
        source: Option<&Proxy>,
        kwargs: impl IntoIterator<Item = (&'a str, GpiValue)>,
    ) -> ProxyResult<Proxy> {
        let proxy = self.create()?;
        if let Some(source) = source {
            proxy.implementation().copy_from(source.implementation())?;
        }
        for (name, value) in kwargs {
            match proxy.set(name, value) {
                Err(ProxyError::UnknownAttribute { class, name }) => {
                    warn!(%class, attribute = %name, "ignoring unknown constructor keyword");
                }
                other => other?,
            }
        }
        Ok(proxy)
    }
}

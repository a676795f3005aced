use crate::Proxy;
use ganga_schema::Value;
use std::collections::BTreeMap;

/// Attribute value as user code sees it: objects only ever appear wrapped.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum GpiValue {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<GpiValue>),
    Dict(BTreeMap<String, GpiValue>),
    Object(Proxy),
}

impl GpiValue {
    /// Wraps every object reference in `value`.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::None => Self::None,
            Value::Bool(b) => Self::Bool(b),
            Value::Int(i) => Self::Int(i),
            Value::Float(f) => Self::Float(f),
            Value::Str(s) => Self::Str(s),
            Value::List(items) => Self::List(items.into_iter().map(Self::from_value).collect()),
            Value::Dict(map) => Self::Dict(
                map.into_iter()
                    .map(|(k, v)| (k, Self::from_value(v)))
                    .collect(),
            ),
            Value::Object(obj) => Self::Object(Proxy::wrap(&obj)),
        }
    }

    /// Unwraps every proxy back to its implementation object.
    #[must_use]
    pub fn into_value(self) -> Value {
        match self {
            Self::None => Value::None,
            Self::Bool(b) => Value::Bool(b),
            Self::Int(i) => Value::Int(i),
            Self::Float(f) => Value::Float(f),
            Self::Str(s) => Value::Str(s),
            Self::List(items) => Value::List(items.into_iter().map(Self::into_value).collect()),
            Self::Dict(map) => {
                Value::Dict(map.into_iter().map(|(k, v)| (k, v.into_value())).collect())
            }
            Self::Object(proxy) => Value::Object(proxy.implementation().clone()),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_proxy(&self) -> Option<&Proxy> {
        match self {
            Self::Object(proxy) => Some(proxy),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[GpiValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }
}

impl From<bool> for GpiValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for GpiValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for GpiValue {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for GpiValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for GpiValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for GpiValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<Proxy> for GpiValue {
    fn from(proxy: Proxy) -> Self {
        Self::Object(proxy)
    }
}

impl From<&Proxy> for GpiValue {
    fn from(proxy: &Proxy) -> Self {
        Self::Object(proxy.clone())
    }
}

impl<T: Into<GpiValue>> From<Vec<T>> for GpiValue {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<GpiValue>> From<Option<T>> for GpiValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::None, Into::into)
    }
}

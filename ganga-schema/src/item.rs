//! Attribute metadata.
//!
//! An [`Item`] describes one schema attribute: its kind (simple, shared or
//! component), default value, allowed types, and the flags that control
//! visibility, copying, comparison and mutability. Items are built with
//! chained setters:
//!
//! ```ignore
//! Item::simple(0i64).protected().doc("job id")
//! Item::component("applications", "Executable")
//! Item::simple(Vec::<Value>::new()).sequence().typelist([ValueType::Str])
//! ```

use crate::{ObjectRef, SchemaError, SchemaResult, Value, ValueType};
use std::fmt;
use std::sync::Arc;

/// Pre-commit validation hook. `Err(message)` rejects the assignment.
pub type CheckSet = Arc<dyn Fn(&ObjectRef, &Value) -> Result<(), String> + Send + Sync>;

/// Normalization hook run after checkset; returns the value to store.
pub type Filter = Arc<dyn Fn(&ObjectRef, Value) -> Result<Value, String> + Send + Sync>;

/// What kind of attribute an item is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemKind {
    /// Plain value held by the object.
    Simple,
    /// Plain value shared by reference between copies.
    Shared,
    /// Child object (or list of child objects) of the given plugin category.
    Component { category: String },
}

/// Metadata for one schema attribute.
#[derive(Clone)]
pub struct Item {
    kind: ItemKind,
    defvalue: Value,
    doc: String,
    typelist: Option<Vec<ValueType>>,
    transient: bool,
    protected: bool,
    hidden: bool,
    sequence: bool,
    strict_sequence: bool,
    optional: bool,
    visitable: bool,
    comparable: bool,
    copyable: Option<bool>,
    load_default: bool,
    changeable_when_readonly: bool,
    checkset: Option<CheckSet>,
    filter: Option<Filter>,
}

impl Item {
    fn with_kind(kind: ItemKind, defvalue: Value) -> Self {
        Self {
            kind,
            defvalue,
            doc: String::new(),
            typelist: None,
            transient: false,
            protected: false,
            hidden: false,
            sequence: false,
            strict_sequence: true,
            optional: false,
            visitable: true,
            comparable: true,
            copyable: None,
            load_default: true,
            changeable_when_readonly: false,
            checkset: None,
            filter: None,
        }
    }

    /// A simple attribute with the given default.
    pub fn simple(defvalue: impl Into<Value>) -> Self {
        Self::with_kind(ItemKind::Simple, defvalue.into())
    }

    /// A shared attribute with the given default.
    pub fn shared(defvalue: impl Into<Value>) -> Self {
        Self::with_kind(ItemKind::Shared, defvalue.into())
    }

    /// A component attribute whose default is a fresh instance of plugin `default`.
    pub fn component(category: &str, default: &str) -> Self {
        Self::with_kind(
            ItemKind::Component {
                category: category.to_string(),
            },
            Value::Str(default.to_string()),
        )
    }

    /// An optional component attribute that defaults to `None`.
    pub fn optional_component(category: &str) -> Self {
        Self::with_kind(
            ItemKind::Component {
                category: category.to_string(),
            },
            Value::None,
        )
        .optional()
    }

    /// A sequence of components, empty by default.
    pub fn component_list(category: &str) -> Self {
        Self::with_kind(
            ItemKind::Component {
                category: category.to_string(),
            },
            Value::List(Vec::new()),
        )
        .sequence()
    }

    // ── builder setters ──────────────────────────────────────────

    #[must_use]
    pub fn doc(mut self, doc: &str) -> Self {
        self.doc = doc.to_string();
        self
    }

    /// Restricts the accepted value types (element types for sequences).
    #[must_use]
    pub fn typelist(mut self, types: impl IntoIterator<Item = ValueType>) -> Self {
        self.typelist = Some(types.into_iter().collect());
        self
    }

    /// Never serialized.
    #[must_use]
    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    /// Readable but not writable through the proxy; not copyable unless stated.
    #[must_use]
    pub fn protected(mut self) -> Self {
        self.protected = true;
        self
    }

    /// Excluded from the user-visible namespace.
    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// List-valued attribute. Scalars are rejected unless [`Item::lenient_sequence`].
    #[must_use]
    pub fn sequence(mut self) -> Self {
        self.sequence = true;
        self
    }

    /// Sequence that wraps an assigned scalar into a one-element list.
    #[must_use]
    pub fn lenient_sequence(mut self) -> Self {
        self.sequence = true;
        self.strict_sequence = false;
        self
    }

    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    #[must_use]
    pub fn not_visitable(mut self) -> Self {
        self.visitable = false;
        self
    }

    #[must_use]
    pub fn not_comparable(mut self) -> Self {
        self.comparable = false;
        self
    }

    #[must_use]
    pub fn copyable(mut self, copyable: bool) -> Self {
        self.copyable = Some(copyable);
        self
    }

    /// Must be present in a stored record; the loader fails instead of defaulting it.
    #[must_use]
    pub fn no_load_default(mut self) -> Self {
        self.load_default = false;
        self
    }

    /// Writable even when the owning object is read-only.
    #[must_use]
    pub fn changeable_when_readonly(mut self) -> Self {
        self.changeable_when_readonly = true;
        self
    }

    #[must_use]
    pub fn checkset(
        mut self,
        hook: impl Fn(&ObjectRef, &Value) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.checkset = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn filter(
        mut self,
        hook: impl Fn(&ObjectRef, Value) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        self.filter = Some(Arc::new(hook));
        self
    }

    // ── accessors ────────────────────────────────────────────────

    #[must_use]
    pub fn kind(&self) -> &ItemKind {
        &self.kind
    }

    #[must_use]
    pub fn is_component(&self) -> bool {
        matches!(self.kind, ItemKind::Component { .. })
    }

    /// Plugin category for component items.
    #[must_use]
    pub fn category(&self) -> Option<&str> {
        match &self.kind {
            ItemKind::Component { category } => Some(category),
            _ => None,
        }
    }

    #[must_use]
    pub fn defvalue(&self) -> &Value {
        &self.defvalue
    }

    #[must_use]
    pub fn doc_str(&self) -> &str {
        &self.doc
    }

    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.transient
    }

    #[must_use]
    pub fn is_protected(&self) -> bool {
        self.protected
    }

    #[must_use]
    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    #[must_use]
    pub fn is_sequence(&self) -> bool {
        self.sequence
    }

    #[must_use]
    pub fn is_strict_sequence(&self) -> bool {
        self.sequence && self.strict_sequence
    }

    #[must_use]
    pub fn is_optional(&self) -> bool {
        self.optional
    }

    #[must_use]
    pub fn is_visitable(&self) -> bool {
        self.visitable
    }

    #[must_use]
    pub fn is_comparable(&self) -> bool {
        self.comparable
    }

    /// Copyable defaults to `!protected`.
    #[must_use]
    pub fn is_copyable(&self) -> bool {
        self.copyable.unwrap_or(!self.protected)
    }

    #[must_use]
    pub fn loads_default(&self) -> bool {
        self.load_default
    }

    #[must_use]
    pub fn is_changeable_when_readonly(&self) -> bool {
        self.changeable_when_readonly
    }

    pub(crate) fn checkset_hook(&self) -> Option<&CheckSet> {
        self.checkset.as_ref()
    }

    pub(crate) fn filter_hook(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    /// Allowed types for a simple value (list elements for sequences).
    ///
    /// `None` means unconstrained. Without an explicit type list the type of
    /// the default decides; a `None` default accepts anything.
    #[must_use]
    pub fn allowed_types(&self) -> Option<Vec<ValueType>> {
        if let Some(types) = &self.typelist {
            return Some(types.clone());
        }
        if self.sequence {
            return None;
        }
        match self.defvalue.value_type() {
            ValueType::None | ValueType::Object => None,
            other => Some(vec![other]),
        }
    }

    /// Validates and normalizes a plain (non-component) value for `name`.
    pub(crate) fn check_simple(&self, name: &str, value: Value) -> SchemaResult<Value> {
        if value.is_none() {
            return if self.accepts_none() {
                Ok(value)
            } else {
                Err(SchemaError::NoneNotAllowed(name.to_string()))
            };
        }
        if !value.is_plain() {
            return Err(SchemaError::TypeMismatch {
                attribute: name.to_string(),
                expected: "a plain value".to_string(),
                found: ValueType::Object,
            });
        }
        let value = self.coerce_sequence(name, value)?;
        let allowed = self.allowed_types();
        match (value, self.sequence) {
            (Value::List(items), true) => {
                let items = items
                    .into_iter()
                    .map(|v| check_type(name, allowed.as_deref(), v))
                    .collect::<SchemaResult<Vec<_>>>()?;
                Ok(Value::List(items))
            }
            (value, _) => check_type(name, allowed.as_deref(), value),
        }
    }

    /// Wraps a scalar into a list for lenient sequences; rejects it for strict ones.
    pub(crate) fn coerce_sequence(&self, name: &str, value: Value) -> SchemaResult<Value> {
        if !self.sequence || matches!(value, Value::List(_)) {
            return Ok(value);
        }
        if self.strict_sequence {
            return Err(SchemaError::StrictSequence(name.to_string()));
        }
        Ok(Value::List(vec![value]))
    }

    pub(crate) fn accepts_none(&self) -> bool {
        self.optional
            || self.defvalue.is_none()
            || self
                .typelist
                .as_ref()
                .is_some_and(|t| t.contains(&ValueType::None))
    }
}

/// Largest integer magnitude every `f64` below it represents exactly.
const MAX_EXACT_FLOAT_INT: u64 = 1 << 53;

fn check_type(name: &str, allowed: Option<&[ValueType]>, value: Value) -> SchemaResult<Value> {
    let Some(allowed) = allowed else {
        return Ok(value);
    };
    let found = value.value_type();
    if allowed.contains(&found) {
        return Ok(value);
    }
    match value {
        // widening is exact only up to 2^53; larger integers are refused
        Value::Int(i) if allowed.contains(&ValueType::Float) && i.unsigned_abs() <= MAX_EXACT_FLOAT_INT => {
            Ok(Value::Float(i as f64))
        }
        _ => Err(SchemaError::TypeMismatch {
            attribute: name.to_string(),
            expected: allowed
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" or "),
            found,
        }),
    }
}

impl fmt::Debug for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Item")
            .field("kind", &self.kind)
            .field("defvalue", &self.defvalue)
            .field("sequence", &self.sequence)
            .field("protected", &self.protected)
            .field("hidden", &self.hidden)
            .field("transient", &self.transient)
            .field("optional", &self.optional)
            .field("has_checkset", &self.checkset.is_some())
            .field("has_filter", &self.filter.is_some())
            .finish_non_exhaustive()
    }
}

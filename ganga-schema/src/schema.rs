use crate::{Item, ItemKind, Version};

/// Declares a plugin class: its identity, version and ordered attribute items.
#[derive(Debug, Clone)]
pub struct Schema {
    name: String,
    category: String,
    version: Version,
    items: Vec<(String, Item)>,
}

impl Schema {
    #[must_use]
    pub fn new(category: &str, name: &str, version: Version) -> Self {
        Self {
            name: name.to_string(),
            category: category.to_string(),
            version,
            items: Vec::new(),
        }
    }

    /// Adds (or replaces) an attribute, keeping declaration order.
    #[must_use]
    pub fn with_item(mut self, name: &str, item: Item) -> Self {
        self.declare(name, item);
        self
    }

    pub fn declare(&mut self, name: &str, item: Item) {
        match self.items.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = item,
            None => self.items.push((name.to_string(), item)),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn category(&self) -> &str {
        &self.category
    }

    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    #[must_use]
    pub fn item(&self, name: &str) -> Option<&Item> {
        self.items.iter().find(|(n, _)| n == name).map(|(_, i)| i)
    }

    #[must_use]
    pub fn has_attribute(&self, name: &str) -> bool {
        self.item(name).is_some()
    }

    /// All items in declaration order.
    pub fn items(&self) -> impl Iterator<Item = (&str, &Item)> {
        self.items.iter().map(|(n, i)| (n.as_str(), i))
    }

    pub fn simple_items(&self) -> impl Iterator<Item = (&str, &Item)> {
        self.items()
            .filter(|(_, i)| matches!(i.kind(), ItemKind::Simple))
    }

    pub fn shared_items(&self) -> impl Iterator<Item = (&str, &Item)> {
        self.items()
            .filter(|(_, i)| matches!(i.kind(), ItemKind::Shared))
    }

    pub fn component_items(&self) -> impl Iterator<Item = (&str, &Item)> {
        self.items().filter(|(_, i)| i.is_component())
    }

    /// Same class identity (name and category), regardless of version.
    #[must_use]
    pub fn same_class(&self, other: &Schema) -> bool {
        self.name == other.name && self.category == other.category
    }
}

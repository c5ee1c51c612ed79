use std::collections::HashMap;

/// Stores are cached under name and slug together.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreKey {
    pub name: String,
    pub slug: String,
}

/// Categories are scoped by their parent, so the key carries the parent scope and depth.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CategoryKey {
    pub slug: String,
    pub level: u32,
    pub parent_key: String,
}

/// Run-scoped lookup from natural key to record id. Only a lookup aid: entries are added
/// for records known to be committed, and the database stays authoritative.
#[derive(Debug, Default)]
pub struct IdentityCache {
    pub(crate) stores: HashMap<StoreKey, String>,
    pub(crate) categories: HashMap<CategoryKey, String>,
    pub(crate) manufacturers: HashMap<String, String>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.stores.len() + self.categories.len() + self.manufacturers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.stores.clear();
        self.categories.clear();
        self.manufacturers.clear();
    }
}

//! In-memory collection registry
//!
//! The registry is an ordinary owned value: the daemon builds one at start
//! up and hands an `Arc` of it to the collection service and the sync
//! engine. Lookups never take a lock visible to readers.

use std::sync::Arc;

use dashmap::DashMap;

use super::definition::CollectionDefinition;

/// Registered collections keyed by name
#[derive(Debug, Default)]
pub struct CollectionRegistry {
    collections: DashMap<String, Arc<CollectionDefinition>>,
}

impl CollectionRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Definition by name
    pub fn get(&self, name: &str) -> Option<Arc<CollectionDefinition>> {
        self.collections.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Register or replace a definition, returning the previous one
    pub fn insert(&self, definition: CollectionDefinition) -> Option<Arc<CollectionDefinition>> {
        self.collections
            .insert(definition.name.clone(), Arc::new(definition))
    }

    /// Register only if the name is free; `false` when already taken
    pub fn try_insert(&self, definition: CollectionDefinition) -> bool {
        match self.collections.entry(definition.name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::new(definition));
                true
            }
        }
    }

    /// Evict a definition
    pub fn remove(&self, name: &str) -> Option<Arc<CollectionDefinition>> {
        self.collections.remove(name).map(|(_, def)| def)
    }

    /// Whether a collection is registered
    pub fn contains(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }

    /// All definitions sorted by name
    pub fn list(&self) -> Vec<Arc<CollectionDefinition>> {
        let mut all: Vec<_> = self
            .collections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Registered names sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Index backing a collection, or the collection name when unknown
    pub fn index_name(&self, collection: &str) -> String {
        self.get(collection)
            .map(|def| def.index_name.clone())
            .unwrap_or_else(|| collection.to_string())
    }

    /// Number of registered collections
    pub fn len(&self) -> usize {
        self.collections.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::field::{FieldDefinition, FieldType};
    use std::thread;

    fn def(name: &str) -> CollectionDefinition {
        CollectionDefinition::new(name, vec![FieldDefinition::new("v", FieldType::Long)])
    }

    #[test]
    fn test_insert_get_remove() {
        let registry = CollectionRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.insert(def("orders")).is_none());
        assert!(registry.contains("orders"));
        assert_eq!(registry.get("orders").unwrap().table_name, "orders");

        let removed = registry.remove("orders").unwrap();
        assert_eq!(removed.name, "orders");
        assert!(registry.get("orders").is_none());
        assert!(registry.remove("orders").is_none());
    }

    #[test]
    fn test_try_insert_rejects_duplicates() {
        let registry = CollectionRegistry::new();
        assert!(registry.try_insert(def("a")));
        assert!(!registry.try_insert(def("a")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_list_sorted() {
        let registry = CollectionRegistry::new();
        for name in ["zeta", "alpha", "mid"] {
            registry.insert(def(name));
        }
        let names: Vec<String> = registry.list().iter().map(|d| d.name.clone()).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
        assert_eq!(registry.names(), names);
    }

    #[test]
    fn test_index_name_fallback() {
        let registry = CollectionRegistry::new();
        registry.insert(def("orders").with_index_name("orders_v2"));
        assert_eq!(registry.index_name("orders"), "orders_v2");
        assert_eq!(registry.index_name("ghost"), "ghost");
    }

    #[test]
    fn test_concurrent_registration() {
        let registry = Arc::new(CollectionRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.try_insert(def(&format!("c{}", i % 4))))
            })
            .collect();
        let won = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(won, 4);
        assert_eq!(registry.len(), 4);
    }
}

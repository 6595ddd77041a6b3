//! In-memory schema registry.
//!
//! The registry is the authoritative runtime mirror of collection schemas,
//! consulted on every request. Entries are `Arc`-shared so the read path
//! never blocks writers; mutation happens only after successful DDL or
//! from the startup consistency controller.

use std::sync::Arc;

use dashmap::DashMap;

use crate::collection::CollectionSchema;

/// Concurrent map of collection name to schema entry.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    entries: DashMap<String, Arc<CollectionSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    /// Fetches a collection entry. The returned `Arc` stays valid even if
    /// the entry is concurrently replaced or deleted.
    pub fn get(&self, name: &str) -> Option<Arc<CollectionSchema>> {
        self.entries.get(name).map(|e| Arc::clone(e.value()))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// All entries, sorted by collection name.
    pub fn list(&self) -> Vec<Arc<CollectionSchema>> {
        let mut all: Vec<_> = self
            .entries
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// All collection names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.entries.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Inserts or replaces an entry.
    pub fn set(&self, schema: CollectionSchema) {
        self.entries.insert(schema.name.clone(), Arc::new(schema));
    }

    /// Removes an entry; returns true if it existed.
    pub fn delete(&self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

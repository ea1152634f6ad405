//! Local entity store
//!
//! Holds this view's copy of every visible post. Pure data: no I/O, and a
//! missing item is never an error.

mod pending;

pub use pending::{PendingIntent, PendingOperation, PendingSlot, PendingTable};

use std::collections::HashMap;

use crate::model::{ContentItem, ItemPatch};

/// In-memory keyed collection of content items owned by one view
#[derive(Debug, Default)]
pub struct EntityStore {
    items: HashMap<String, ContentItem>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&ContentItem> {
        self.items.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut ContentItem> {
        self.items.get_mut(id)
    }

    /// Shallow-merge `patch` into the item, inserting it if absent
    pub fn upsert(&mut self, id: &str, patch: ItemPatch) -> &ContentItem {
        let item = self
            .items
            .entry(id.to_string())
            .or_insert_with(|| ContentItem::new(id));
        item.merge(patch);
        item
    }

    /// Insert or overwrite a whole item
    pub fn put(&mut self, item: ContentItem) {
        self.items.insert(item.id.clone(), item);
    }

    pub fn remove(&mut self, id: &str) -> Option<ContentItem> {
        self.items.remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.items.keys().map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

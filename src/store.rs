//! The primary index: an ordered map from sort-key strings to items.
//!
//! Ordering is lexicographic byte comparison. A query in `begins-with`
//! mode truncates comparison to the search key's length, which lets a
//! partially templated sort key (`user#${id}` with `${id}` unresolved)
//! act as a range scan without a secondary index.

use crate::item::StoredItem;
use std::collections::BTreeMap;
use std::ops::Bound;

/// Maximum sort-key length in bytes.
pub const MAX_KEY: usize = 1024;

/// Maximum serialized item size in bytes.
pub const MAX_ITEM: usize = 256 * 1024;

#[derive(Debug, Default)]
pub(crate) struct ItemStore {
    items: BTreeMap<String, StoredItem>,
}

impl ItemStore {
    pub fn new() -> Self {
        Self {
            items: BTreeMap::new(),
        }
    }

    /// Insert an item, replacing any previous item with the same key.
    pub fn insert(&mut self, item: StoredItem) -> Option<StoredItem> {
        self.items.insert(item.key.clone(), item)
    }

    pub fn remove(&mut self, key: &str) -> Option<StoredItem> {
        self.items.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&StoredItem> {
        self.items.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut StoredItem> {
        self.items.get_mut(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.items.contains_key(key)
    }

    /// Key of the first item whose key starts with `prefix`.
    pub fn first_with_prefix(&self, prefix: &str) -> Option<&str> {
        self.items
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .next()
            .map(|(k, _)| k.as_str())
            .filter(|k| k.starts_with(prefix))
    }

    /// Key of the item strictly after `key` in index order.
    pub fn next_key(&self, key: &str) -> Option<String> {
        self.items
            .range::<str, _>((Bound::Excluded(key), Bound::Unbounded))
            .next()
            .map(|(k, _)| k.clone())
    }

    /// First key in index order.
    pub fn first_key(&self) -> Option<String> {
        self.items.keys().next().cloned()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate all items in key order.
    pub fn iter(&self) -> impl Iterator<Item = &StoredItem> {
        self.items.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut StoredItem> {
        self.items.values_mut()
    }

    /// Keys in index order; used by scans that mutate while iterating.
    pub fn keys(&self) -> Vec<String> {
        self.items.keys().cloned().collect()
    }
}

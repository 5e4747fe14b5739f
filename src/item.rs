//! Item types: the public read view and the stored form.
//!
//! The store keeps each item either parsed or as its serialized JSON
//! string (the cold form). Reads promote cold items on demand; `compact`
//! demotes everything back to cold strings to shrink the heap.

use crate::clock;
use crate::error::{DbError, Result};
use serde_json::Value;

/// A record returned from the database: its sort key and JSON document.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    key: String,
    json: Value,
}

impl Item {
    pub(crate) fn new(key: String, json: Value) -> Self {
        Self { key, json }
    }

    /// The item's sort key. Doubles as the pagination cursor.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The JSON document.
    pub fn json(&self) -> &Value {
        &self.json
    }

    /// Consume the item, returning its document.
    pub fn into_json(self) -> Value {
        self.json
    }

    /// A top-level field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.json.get(name)
    }

    /// A top-level field as a string slice.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.json.get(name).and_then(Value::as_str)
    }

    /// A top-level field as a number.
    pub fn field_number(&self, name: &str) -> Option<f64> {
        self.json.get(name).and_then(Value::as_f64)
    }

    /// A top-level field as a boolean.
    pub fn field_bool(&self, name: &str) -> Option<bool> {
        self.json.get(name).and_then(Value::as_bool)
    }

    /// A top-level date field as epoch milliseconds.
    pub fn field_date(&self, name: &str) -> Option<u64> {
        self.field_str(name).and_then(clock::parse_iso)
    }
}

#[derive(Debug, Clone)]
pub(crate) enum StoredValue {
    Parsed(Value),
    Cold(String),
}

/// An item as held by the primary index.
#[derive(Debug, Clone)]
pub(crate) struct StoredItem {
    pub key: String,
    value: StoredValue,
    /// An un-persisted change is pending for this item.
    pub delayed: bool,
}

impl StoredItem {
    pub fn new(key: String, json: Value) -> Self {
        Self {
            key,
            value: StoredValue::Parsed(json),
            delayed: false,
        }
    }

    pub fn cold(key: String, text: String) -> Self {
        Self {
            key,
            value: StoredValue::Cold(text),
            delayed: false,
        }
    }

    /// The parsed document, promoting the cold form if necessary.
    pub fn json(&mut self) -> Result<&Value> {
        self.promote()?;
        match &self.value {
            StoredValue::Parsed(v) => Ok(v),
            StoredValue::Cold(_) => unreachable!("promoted above"),
        }
    }

    /// Mutable access to the parsed document.
    pub fn json_mut(&mut self) -> Result<&mut Value> {
        self.promote()?;
        match &mut self.value {
            StoredValue::Parsed(v) => Ok(v),
            StoredValue::Cold(_) => unreachable!("promoted above"),
        }
    }

    /// Replace the document.
    pub fn set_json(&mut self, json: Value) {
        self.value = StoredValue::Parsed(json);
    }

    /// Serialized form, for the journal and snapshot.
    pub fn serialized(&self) -> Result<String> {
        match &self.value {
            StoredValue::Parsed(v) => serde_json::to_string(v)
                .map_err(|e| DbError::BadState(format!("unserializable item {}: {e}", self.key))),
            StoredValue::Cold(text) => Ok(text.clone()),
        }
    }

    /// Demote to the cold form, dropping the parsed tree.
    pub fn compact(&mut self) {
        if let StoredValue::Parsed(v) = &self.value {
            if let Ok(text) = serde_json::to_string(v) {
                self.value = StoredValue::Cold(text);
            }
        }
    }

    /// A public read view of this item.
    pub fn to_item(&mut self) -> Result<Item> {
        Ok(Item::new(self.key.clone(), self.json()?.clone()))
    }

    fn promote(&mut self) -> Result<()> {
        if let StoredValue::Cold(text) = &self.value {
            let parsed: Value = serde_json::from_str(text).map_err(|e| {
                DbError::BadState(format!("corrupt stored item {}: {e}", self.key))
            })?;
            self.value = StoredValue::Parsed(parsed);
        }
        Ok(())
    }
}

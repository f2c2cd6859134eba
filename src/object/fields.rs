//! The open field bag backing every resource record.
//!
//! The remote schema is authoritative: any field name is acceptable for
//! storage, recognized or not. Insertion order is preserved so that
//! serialization is reproducible.

use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

use super::value::FieldValue;

/// Ordered, open key/value bag.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Fields {
    entries: IndexMap<String, FieldValue>,
}

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a field, failing with [`Error::KeyNotFound`] when absent.
    pub fn get(&self, name: &str) -> Result<&FieldValue> {
        self.entries
            .get(name)
            .ok_or_else(|| Error::key_not_found(name))
    }

    pub fn try_get(&self, name: &str) -> Option<&FieldValue> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Insert or overwrite. Overwriting keeps the field's original position.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.entries.insert(name.into(), value.into());
    }

    /// Merge all pairs from `other`; later pairs overwrite earlier ones.
    pub fn update(&mut self, other: Fields) {
        for (name, value) in other.entries {
            self.entries.insert(name, value);
        }
    }

    /// Insert only the pairs whose keys are not already present.
    /// Used by the lazy-fetch merge, where local edits take precedence.
    pub fn merge_missing(&mut self, other: Fields) {
        for (name, value) in other.entries {
            self.entries.entry(name).or_insert(value);
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        self.entries.shift_remove(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }

    pub fn to_json_map(&self) -> Map<String, Value> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect()
    }
}

impl From<Map<String, Value>> for Fields {
    fn from(map: Map<String, Value>) -> Self {
        let entries = map
            .into_iter()
            .map(|(k, v)| (k, FieldValue::from(v)))
            .collect();
        Self { entries }
    }
}

impl FromIterator<(String, FieldValue)> for Fields {
    fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Fields {
    type Item = (String, FieldValue);
    type IntoIter = indexmap::map::IntoIter<String, FieldValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl Serialize for Fields {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

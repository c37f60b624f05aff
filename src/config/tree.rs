// src/config/tree.rs

//! The configuration tree: an insertion-ordered mapping of top-level keys.
//!
//! Trees are layered global → dataset → parameter overlay → processing step.
//! Each layer is built with [`ConfigTree::overlay`], which returns a new tree
//! and leaves its inputs untouched, so two jobs built from the same dataset
//! never share anything mutable.

use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};

use crate::errors::{CycledagError, Result};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigTree {
    entries: Mapping,
}

impl ConfigTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_mapping(entries: Mapping) -> Self {
        Self { entries }
    }

    pub fn as_mapping(&self) -> &Mapping {
        &self.entries
    }

    pub fn into_mapping(self) -> Mapping {
        self.entries
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    /// Keys in declaration order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().filter_map(Value::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Set a key in place. Only used on trees a stage owns exclusively.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.entries.insert(Value::String(key.into()), value.into());
    }

    /// Return a copy with a single key replaced.
    pub fn with(&self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut next = self.clone();
        next.insert(key, value);
        next
    }

    /// Shallow merge: every top-level key of `layer` fully replaces the key in
    /// `self`; keys only present in `self` are inherited.
    pub fn overlay(&self, layer: &Mapping) -> Self {
        let mut entries = self.entries.clone();
        for (key, value) in layer {
            entries.insert(key.clone(), value.clone());
        }
        Self { entries }
    }

    /// Deserialize a typed view of this tree. Unknown keys are ignored by
    /// the target types.
    pub fn to_typed<T: DeserializeOwned>(&self) -> Result<T> {
        serde_yaml::from_value(Value::Mapping(self.entries.clone())).map_err(CycledagError::from)
    }
}

/// Coarse shape of a value, used to reject type-mismatched overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueShape {
    Null,
    Scalar,
    Sequence,
    Mapping,
}

impl ValueShape {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ValueShape::Null,
            Value::Sequence(_) => ValueShape::Sequence,
            Value::Mapping(_) => ValueShape::Mapping,
            Value::Tagged(tagged) => ValueShape::of(&tagged.value),
            _ => ValueShape::Scalar,
        }
    }

    /// A mapping may only be replaced by a mapping (or null) and vice versa.
    /// Scalars and sequences are interchangeable since pattern keys accept
    /// either a single string or a list.
    pub fn compatible_with(self, other: ValueShape) -> bool {
        match (self, other) {
            (ValueShape::Null, _) | (_, ValueShape::Null) => true,
            (ValueShape::Mapping, ValueShape::Mapping) => true,
            (ValueShape::Mapping, _) | (_, ValueShape::Mapping) => false,
            _ => true,
        }
    }
}

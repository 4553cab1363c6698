//! Value bags carried by persistent objects and query rows.
//!
//! Attributes are `serde_json::Value`s keyed by property name. Relationship
//! arcs hold identifiers, never object references; resolving an identifier to
//! an in-memory object is the owning context's job.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::object_id::ObjectId;

/// Attribute and relationship values of one object.
///
/// A to-many relationship that is absent from `to_many` has not been loaded
/// yet (it is a fault); an empty list means "loaded, no targets".
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectValues {
    pub attributes: BTreeMap<String, Value>,
    pub to_one: BTreeMap<String, Option<ObjectId>>,
    pub to_many: BTreeMap<String, Vec<ObjectId>>,
}

impl ObjectValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style attribute insert.
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Builder-style to-one insert.
    pub fn with_to_one(mut self, name: impl Into<String>, target: Option<ObjectId>) -> Self {
        self.to_one.insert(name.into(), target);
        self
    }

    /// Attribute value, `Value::Null` when unset.
    pub fn attribute(&self, name: &str) -> Value {
        self.attributes.get(name).cloned().unwrap_or(Value::Null)
    }

    /// Set an attribute, returning the previous value (`Null` when unset).
    /// Setting `Null` removes the entry.
    pub fn set_attribute(&mut self, name: &str, value: Value) -> Value {
        let previous = if value.is_null() {
            self.attributes.remove(name)
        } else {
            self.attributes.insert(name.to_string(), value)
        };
        previous.unwrap_or(Value::Null)
    }

    /// Point a to-one arc at `target`, returning the previous target.
    /// `None` removes the entry.
    pub fn set_to_one(&mut self, name: &str, target: Option<ObjectId>) -> Option<ObjectId> {
        match target {
            Some(target) => self.to_one.insert(name.to_string(), Some(target)).flatten(),
            None => self.to_one.remove(name).flatten(),
        }
    }

    /// Target of a to-one arc, `None` when unset.
    pub fn to_one_target(&self, name: &str) -> Option<&ObjectId> {
        self.to_one.get(name).and_then(Option::as_ref)
    }

    /// Targets of a to-many arc, `None` when not loaded.
    pub fn to_many_targets(&self, name: &str) -> Option<&[ObjectId]> {
        self.to_many.get(name).map(Vec::as_slice)
    }

    /// Returns `true` if `id` is referenced by any arc.
    pub fn references(&self, id: &ObjectId) -> bool {
        self.to_one.values().flatten().any(|target| target == id)
            || self.to_many.values().flatten().any(|target| target == id)
    }

    /// Replace every arc reference to `old` with `new`.
    pub fn replace_reference(&mut self, old: &ObjectId, new: &ObjectId) {
        for target in self.to_one.values_mut().flatten() {
            if target == old {
                *target = new.clone();
            }
        }
        for target in self.to_many.values_mut().flatten() {
            if target == old {
                *target = new.clone();
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.to_one.is_empty() && self.to_many.is_empty()
    }
}

/// An identified value bag, as produced by a query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataRow {
    pub id: ObjectId,
    pub values: ObjectValues,
}

impl DataRow {
    pub fn new(id: ObjectId, values: ObjectValues) -> Self {
        Self { id, values }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unset_attribute_reads_null() {
        let values = ObjectValues::new();
        assert_eq!(values.attribute("name"), Value::Null);
    }

    #[test]
    fn set_attribute_returns_previous() {
        let mut values = ObjectValues::new().with_attribute("name", "a");
        let old = values.set_attribute("name", json!("b"));
        assert_eq!(old, json!("a"));
        assert_eq!(values.attribute("name"), json!("b"));

        values.set_attribute("name", Value::Null);
        assert!(values.attributes.is_empty());
    }

    #[test]
    fn clearing_to_one_removes_entry() {
        let target = ObjectId::single("Artist", "ARTIST_ID", 1);
        let mut values = ObjectValues::new();
        assert_eq!(values.set_to_one("artist", Some(target.clone())), None);
        assert_eq!(values.set_to_one("artist", None), Some(target));
        assert!(values.to_one.is_empty());
    }

    #[test]
    fn unloaded_to_many_is_distinct_from_empty() {
        let mut values = ObjectValues::new();
        assert!(values.to_many_targets("paintings").is_none());
        values.to_many.insert("paintings".into(), Vec::new());
        assert_eq!(values.to_many_targets("paintings"), Some(&[][..]));
    }

    #[test]
    fn replace_reference_rewrites_all_arcs() {
        let old = ObjectId::temporary("Artist");
        let new = ObjectId::single("Artist", "ARTIST_ID", 1);
        let mut values = ObjectValues::new().with_to_one("artist", Some(old.clone()));
        values.to_many.insert("friends".into(), vec![old.clone()]);

        assert!(values.references(&old));
        values.replace_reference(&old, &new);
        assert!(!values.references(&old));
        assert_eq!(values.to_one_target("artist"), Some(&new));
        assert_eq!(values.to_many_targets("friends"), Some(&[new][..]));
    }
}

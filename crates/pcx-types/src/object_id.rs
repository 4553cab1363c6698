use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TypeError;

/// A single primary-key column value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyValue {
    Int(i64),
    Text(String),
}

impl KeyValue {
    /// Convert to a JSON value for storage in an attribute map.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Int(n) => Value::from(*n),
            Self::Text(s) => Value::from(s.as_str()),
        }
    }

    /// Convert from a JSON value. Only integers and strings can be keys.
    pub fn from_value(value: &Value) -> Result<Self, TypeError> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .ok_or_else(|| TypeError::InvalidKeyValue(n.to_string())),
            Value::String(s) => Ok(Self::Text(s.clone())),
            other => Err(TypeError::InvalidKeyValue(other.to_string())),
        }
    }
}

impl From<i64> for KeyValue {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<&str> for KeyValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for KeyValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s:?}"),
        }
    }
}

/// The key part of an [`ObjectId`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IdKey {
    /// Placeholder key for an object that has not been stored yet.
    Temporary(uuid::Uuid),
    /// Permanent key: primary-key column name to value. Usually one entry.
    Permanent(BTreeMap<String, KeyValue>),
}

/// Identifier of a persistent object within an entity namespace.
///
/// Equality, ordering and hashing consider only the entity name and the key.
/// The replacement map is scratch space filled in by whoever assigns the
/// permanent key (usually the terminal store during an insert); it never
/// affects identity.
#[derive(Clone, Serialize, Deserialize)]
pub struct ObjectId {
    entity: String,
    key: IdKey,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    replacement: BTreeMap<String, KeyValue>,
}

impl ObjectId {
    /// Create a new temporary identifier (UUID v7 key material).
    pub fn temporary(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            key: IdKey::Temporary(uuid::Uuid::now_v7()),
            replacement: BTreeMap::new(),
        }
    }

    /// Create a permanent identifier from a full key map.
    pub fn permanent(entity: impl Into<String>, key: BTreeMap<String, KeyValue>) -> Self {
        Self {
            entity: entity.into(),
            key: IdKey::Permanent(key),
            replacement: BTreeMap::new(),
        }
    }

    /// Create a permanent identifier with a single key column.
    pub fn single(
        entity: impl Into<String>,
        key_name: impl Into<String>,
        value: impl Into<KeyValue>,
    ) -> Self {
        let mut key = BTreeMap::new();
        key.insert(key_name.into(), value.into());
        Self::permanent(entity, key)
    }

    /// The entity namespace this identifier belongs to.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn key(&self) -> &IdKey {
        &self.key
    }

    /// Returns `true` until a permanent key has been assigned.
    pub fn is_temporary(&self) -> bool {
        matches!(self.key, IdKey::Temporary(_))
    }

    /// The permanent key map, or `None` for temporary identifiers.
    pub fn key_map(&self) -> Option<&BTreeMap<String, KeyValue>> {
        match &self.key {
            IdKey::Permanent(map) => Some(map),
            IdKey::Temporary(_) => None,
        }
    }

    /// Value of a single key column of a permanent identifier.
    pub fn key_value(&self, name: &str) -> Option<&KeyValue> {
        self.key_map().and_then(|map| map.get(name))
    }

    pub fn replacement_id_map(&self) -> &BTreeMap<String, KeyValue> {
        &self.replacement
    }

    pub fn replacement_id_map_mut(&mut self) -> &mut BTreeMap<String, KeyValue> {
        &mut self.replacement
    }

    /// Returns `true` if a replacement key has been attached.
    pub fn is_replacement_id_attached(&self) -> bool {
        !self.replacement.is_empty()
    }

    /// Build the permanent identifier described by the replacement map.
    ///
    /// For a permanent identifier the replacement entries override the
    /// matching key columns; for a temporary one they become the whole key.
    pub fn create_replacement_id(&self) -> Result<ObjectId, TypeError> {
        if self.replacement.is_empty() {
            return Err(TypeError::NoReplacementKey(self.clone()));
        }

        let key = match &self.key {
            IdKey::Permanent(existing) => {
                let mut merged = existing.clone();
                merged.extend(self.replacement.clone());
                merged
            }
            IdKey::Temporary(_) => self.replacement.clone(),
        };

        Ok(Self::permanent(self.entity.clone(), key))
    }
}

impl PartialEq for ObjectId {
    fn eq(&self, other: &Self) -> bool {
        self.entity == other.entity && self.key == other.key
    }
}

impl Eq for ObjectId {}

impl Hash for ObjectId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.entity.hash(state);
        self.key.hash(state);
    }
}

impl PartialOrd for ObjectId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ObjectId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.entity
            .cmp(&other.entity)
            .then_with(|| self.key.cmp(&other.key))
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({self})")
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            IdKey::Temporary(uuid) => {
                let simple = uuid.simple().to_string();
                write!(f, "<{}:temp:{}>", self.entity, &simple[simple.len() - 8..])
            }
            IdKey::Permanent(map) => {
                write!(f, "<{}", self.entity)?;
                let mut sep = ':';
                for (name, value) in map {
                    write!(f, "{sep}{name}={value}")?;
                    sep = ',';
                }
                write!(f, ">")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn temporary_ids_are_unique() {
        let a = ObjectId::temporary("Artist");
        let b = ObjectId::temporary("Artist");
        assert!(a.is_temporary());
        assert_ne!(a, b);
    }

    #[test]
    fn permanent_equality_uses_entity_and_key() {
        let a = ObjectId::single("Artist", "ARTIST_ID", 7);
        let b = ObjectId::single("Artist", "ARTIST_ID", 7);
        let c = ObjectId::single("Painting", "ARTIST_ID", 7);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(!a.is_temporary());
    }

    #[test]
    fn replacement_map_does_not_affect_identity() {
        let a = ObjectId::temporary("Artist");
        let mut b = a.clone();
        b.replacement_id_map_mut()
            .insert("ARTIST_ID".into(), KeyValue::Int(42));

        assert_eq!(a, b);
        let set: HashSet<ObjectId> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn create_replacement_id_from_temporary() {
        let mut id = ObjectId::temporary("Artist");
        assert!(!id.is_replacement_id_attached());
        id.replacement_id_map_mut()
            .insert("ARTIST_ID".into(), KeyValue::Int(42));

        let permanent = id.create_replacement_id().unwrap();
        assert!(!permanent.is_temporary());
        assert_eq!(permanent, ObjectId::single("Artist", "ARTIST_ID", 42));
    }

    #[test]
    fn create_replacement_id_requires_map() {
        let id = ObjectId::temporary("Artist");
        let err = id.create_replacement_id().unwrap_err();
        assert_eq!(err, TypeError::NoReplacementKey(id));
    }

    #[test]
    fn compound_key_replacement_overrides_columns() {
        let mut key = BTreeMap::new();
        key.insert("A".to_string(), KeyValue::Int(1));
        key.insert("B".to_string(), KeyValue::from("x"));
        let mut id = ObjectId::permanent("Link", key);
        id.replacement_id_map_mut().insert("B".into(), KeyValue::from("y"));

        let replaced = id.create_replacement_id().unwrap();
        assert_eq!(replaced.key_value("A"), Some(&KeyValue::Int(1)));
        assert_eq!(replaced.key_value("B"), Some(&KeyValue::from("y")));
    }

    #[test]
    fn display_format() {
        let id = ObjectId::single("Artist", "ARTIST_ID", 42);
        assert_eq!(id.to_string(), "<Artist:ARTIST_ID=42>");

        let temp = ObjectId::temporary("Artist");
        assert!(temp.to_string().starts_with("<Artist:temp:"));
    }

    #[test]
    fn key_value_json_conversion() {
        assert_eq!(KeyValue::from_value(&Value::from(5)).unwrap(), KeyValue::Int(5));
        assert_eq!(
            KeyValue::from_value(&Value::from("k")).unwrap(),
            KeyValue::from("k")
        );
        assert!(KeyValue::from_value(&Value::Bool(true)).is_err());
        assert_eq!(KeyValue::Int(9).to_value(), Value::from(9));
    }

    #[test]
    fn serde_roundtrip_keeps_replacement() {
        let mut id = ObjectId::temporary("Artist");
        id.replacement_id_map_mut()
            .insert("ARTIST_ID".into(), KeyValue::Int(3));
        let json = serde_json::to_string(&id).unwrap();
        let parsed: ObjectId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
        assert_eq!(parsed.replacement_id_map().len(), 1);
    }
}

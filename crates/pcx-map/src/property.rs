//! Generic property access over [`ObjectValues`].
//!
//! Contexts never inspect concrete entity types. Every read and write goes
//! through a [`Property`] looked up by name in the entity's class descriptor.

use serde_json::Value;

use pcx_types::{ObjectId, ObjectValues};

use crate::descriptor::{AttributeDescriptor, RelationshipDescriptor};

/// A property value as seen through an accessor.
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyValue {
    Attribute(Value),
    ToOne(Option<ObjectId>),
    /// `None` means the collection has not been loaded.
    ToMany(Option<Vec<ObjectId>>),
}

impl PropertyValue {
    pub fn as_attribute(&self) -> Option<&Value> {
        match self {
            Self::Attribute(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_to_one(&self) -> Option<&ObjectId> {
        match self {
            Self::ToOne(target) => target.as_ref(),
            _ => None,
        }
    }

    pub fn as_to_many(&self) -> Option<&[ObjectId]> {
        match self {
            Self::ToMany(targets) => targets.as_deref(),
            _ => None,
        }
    }
}

/// Read/write capability for one named property.
pub trait PropertyAccessor {
    fn name(&self) -> &str;

    fn read(&self, values: &ObjectValues) -> PropertyValue;

    /// Replace the property value. `old` is the value the caller last read.
    fn write(&self, values: &mut ObjectValues, old: &PropertyValue, new: PropertyValue);
}

#[derive(Clone, Debug)]
pub struct AttributeProperty {
    descriptor: AttributeDescriptor,
}

impl AttributeProperty {
    pub fn new(descriptor: AttributeDescriptor) -> Self {
        Self { descriptor }
    }

    pub fn descriptor(&self) -> &AttributeDescriptor {
        &self.descriptor
    }

    pub fn read_value(&self, values: &ObjectValues) -> Value {
        values.attribute(&self.descriptor.name)
    }

    pub fn write_value(&self, values: &mut ObjectValues, value: Value) -> Value {
        values.set_attribute(&self.descriptor.name, value)
    }
}

impl PropertyAccessor for AttributeProperty {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn read(&self, values: &ObjectValues) -> PropertyValue {
        PropertyValue::Attribute(self.read_value(values))
    }

    fn write(&self, values: &mut ObjectValues, _old: &PropertyValue, new: PropertyValue) {
        if let PropertyValue::Attribute(value) = new {
            self.write_value(values, value);
        }
    }
}

#[derive(Clone, Debug)]
pub struct ToOneProperty {
    descriptor: RelationshipDescriptor,
}

impl ToOneProperty {
    pub fn new(descriptor: RelationshipDescriptor) -> Self {
        Self { descriptor }
    }

    pub fn descriptor(&self) -> &RelationshipDescriptor {
        &self.descriptor
    }

    pub fn target(&self, values: &ObjectValues) -> Option<ObjectId> {
        values.to_one_target(&self.descriptor.name).cloned()
    }

    pub fn set_target(&self, values: &mut ObjectValues, target: Option<ObjectId>) -> Option<ObjectId> {
        values.set_to_one(&self.descriptor.name, target)
    }
}

impl PropertyAccessor for ToOneProperty {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn read(&self, values: &ObjectValues) -> PropertyValue {
        PropertyValue::ToOne(self.target(values))
    }

    fn write(&self, values: &mut ObjectValues, _old: &PropertyValue, new: PropertyValue) {
        if let PropertyValue::ToOne(target) = new {
            self.set_target(values, target);
        }
    }
}

#[derive(Clone, Debug)]
pub struct ToManyProperty {
    descriptor: RelationshipDescriptor,
}

impl ToManyProperty {
    pub fn new(descriptor: RelationshipDescriptor) -> Self {
        Self { descriptor }
    }

    pub fn descriptor(&self) -> &RelationshipDescriptor {
        &self.descriptor
    }

    pub fn is_loaded(&self, values: &ObjectValues) -> bool {
        values.to_many.contains_key(&self.descriptor.name)
    }

    pub fn targets(&self, values: &ObjectValues) -> Option<Vec<ObjectId>> {
        values.to_many_targets(&self.descriptor.name).map(<[ObjectId]>::to_vec)
    }

    /// Mark the collection as loaded with the given targets.
    pub fn load(&self, values: &mut ObjectValues, targets: Vec<ObjectId>) {
        values.to_many.insert(self.descriptor.name.clone(), targets);
    }

    /// Add `target` to a loaded collection. Returns `false` if the collection
    /// is not loaded or already holds the target.
    pub fn add_target(&self, values: &mut ObjectValues, target: &ObjectId) -> bool {
        match values.to_many.get_mut(&self.descriptor.name) {
            Some(list) if !list.contains(target) => {
                list.push(target.clone());
                true
            }
            _ => false,
        }
    }

    /// Remove `target` from a loaded collection. Returns `false` if it was
    /// not there.
    pub fn remove_target(&self, values: &mut ObjectValues, target: &ObjectId) -> bool {
        match values.to_many.get_mut(&self.descriptor.name) {
            Some(list) => {
                let before = list.len();
                list.retain(|t| t != target);
                list.len() != before
            }
            None => false,
        }
    }
}

impl PropertyAccessor for ToManyProperty {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn read(&self, values: &ObjectValues) -> PropertyValue {
        PropertyValue::ToMany(self.targets(values))
    }

    fn write(&self, values: &mut ObjectValues, _old: &PropertyValue, new: PropertyValue) {
        if let PropertyValue::ToMany(targets) = new {
            match targets {
                Some(targets) => self.load(values, targets),
                None => {
                    values.to_many.remove(&self.descriptor.name);
                }
            }
        }
    }
}

/// Dispatch over the three property kinds.
#[derive(Clone, Debug)]
pub enum Property {
    Attribute(AttributeProperty),
    ToOne(ToOneProperty),
    ToMany(ToManyProperty),
}

impl Property {
    pub fn relationship(&self) -> Option<&RelationshipDescriptor> {
        match self {
            Self::Attribute(_) => None,
            Self::ToOne(p) => Some(p.descriptor()),
            Self::ToMany(p) => Some(p.descriptor()),
        }
    }

    pub fn is_relationship(&self) -> bool {
        self.relationship().is_some()
    }
}

impl PropertyAccessor for Property {
    fn name(&self) -> &str {
        match self {
            Self::Attribute(p) => p.name(),
            Self::ToOne(p) => p.name(),
            Self::ToMany(p) => p.name(),
        }
    }

    fn read(&self, values: &ObjectValues) -> PropertyValue {
        match self {
            Self::Attribute(p) => p.read(values),
            Self::ToOne(p) => p.read(values),
            Self::ToMany(p) => p.read(values),
        }
    }

    fn write(&self, values: &mut ObjectValues, old: &PropertyValue, new: PropertyValue) {
        match self {
            Self::Attribute(p) => p.write(values, old, new),
            Self::ToOne(p) => p.write(values, old, new),
            Self::ToMany(p) => p.write(values, old, new),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn artist(n: i64) -> ObjectId {
        ObjectId::single("Artist", "ARTIST_ID", n)
    }

    #[test]
    fn attribute_read_write() {
        let property = Property::Attribute(AttributeProperty::new(AttributeDescriptor::new("name")));
        let mut values = ObjectValues::new();

        let old = property.read(&values);
        assert_eq!(old, PropertyValue::Attribute(Value::Null));
        property.write(&mut values, &old, PropertyValue::Attribute(json!("Monet")));
        assert_eq!(values.attribute("name"), json!("Monet"));
        assert!(!property.is_relationship());
    }

    #[test]
    fn to_one_read_write() {
        let property = Property::ToOne(ToOneProperty::new(RelationshipDescriptor::to_one(
            "artist", "Artist",
        )));
        let mut values = ObjectValues::new();

        property.write(&mut values, &PropertyValue::ToOne(None), PropertyValue::ToOne(Some(artist(1))));
        assert_eq!(property.read(&values).as_to_one(), Some(&artist(1)));
        assert_eq!(property.relationship().unwrap().target, "Artist");
    }

    #[test]
    fn to_many_requires_load() {
        let property = ToManyProperty::new(RelationshipDescriptor::to_many("friends", "Artist"));
        let mut values = ObjectValues::new();

        assert!(!property.is_loaded(&values));
        assert!(!property.add_target(&mut values, &artist(1)));
        assert_eq!(property.read(&values), PropertyValue::ToMany(None));

        property.load(&mut values, Vec::new());
        assert!(property.add_target(&mut values, &artist(1)));
        assert!(!property.add_target(&mut values, &artist(1)));
        assert_eq!(property.targets(&values), Some(vec![artist(1)]));

        assert!(property.remove_target(&mut values, &artist(1)));
        assert!(!property.remove_target(&mut values, &artist(1)));
    }
}

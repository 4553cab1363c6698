//! Per-entity property tables.

use std::collections::HashMap;
use std::sync::Arc;

use pcx_types::ObjectValues;

use crate::descriptor::{EntityDescriptor, RelationshipDescriptor};
use crate::error::{MapError, MapResult};
use crate::property::{AttributeProperty, Property, PropertyAccessor, ToManyProperty, ToOneProperty};

/// Callbacks for [`ClassDescriptor::visit_properties`]. Returning `false`
/// stops the walk.
pub trait PropertyVisitor {
    fn visit_attribute(&mut self, _property: &AttributeProperty) -> bool {
        true
    }

    fn visit_to_one(&mut self, _property: &ToOneProperty) -> bool {
        true
    }

    fn visit_to_many(&mut self, _property: &ToManyProperty) -> bool {
        true
    }
}

/// Name-to-accessor table for one entity.
#[derive(Debug)]
pub struct ClassDescriptor {
    entity: Arc<EntityDescriptor>,
    properties: Vec<Property>,
    index: HashMap<String, usize>,
}

impl ClassDescriptor {
    pub fn new(entity: Arc<EntityDescriptor>) -> Self {
        let properties: Vec<Property> = entity
            .attributes
            .iter()
            .cloned()
            .map(|a| Property::Attribute(AttributeProperty::new(a)))
            .chain(entity.relationships.iter().cloned().map(|r| {
                if r.to_many {
                    Property::ToMany(ToManyProperty::new(r))
                } else {
                    Property::ToOne(ToOneProperty::new(r))
                }
            }))
            .collect();

        let index = properties
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name().to_string(), i))
            .collect();

        Self {
            entity,
            properties,
            index,
        }
    }

    pub fn entity(&self) -> &EntityDescriptor {
        &self.entity
    }

    pub fn entity_name(&self) -> &str {
        &self.entity.name
    }

    /// Look up a property by name. Unknown names fail with the full list of
    /// declared names.
    pub fn property(&self, name: &str) -> MapResult<&Property> {
        self.index
            .get(name)
            .map(|&i| &self.properties[i])
            .ok_or_else(|| MapError::UnknownProperty {
                entity: self.entity.name.clone(),
                property: name.to_string(),
                available: self.property_names(),
            })
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn property_names(&self) -> Vec<String> {
        self.entity.property_names()
    }

    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    pub fn relationship(&self, name: &str) -> Option<&RelationshipDescriptor> {
        self.entity.relationship(name)
    }

    /// Copy attributes and to-one arcs from `source` into `target`. To-many
    /// collections are left alone; they are faulted separately.
    pub fn shallow_merge(&self, source: &ObjectValues, target: &mut ObjectValues) {
        for property in &self.properties {
            match property {
                Property::Attribute(p) => {
                    p.write_value(target, p.read_value(source));
                }
                Property::ToOne(p) => {
                    p.set_target(target, p.target(source));
                }
                Property::ToMany(_) => {}
            }
        }
    }

    /// Walk properties in declaration order.
    pub fn visit_properties<V: PropertyVisitor + ?Sized>(&self, visitor: &mut V) -> bool {
        for property in &self.properties {
            let keep_going = match property {
                Property::Attribute(p) => visitor.visit_attribute(p),
                Property::ToOne(p) => visitor.visit_to_one(p),
                Property::ToMany(p) => visitor.visit_to_many(p),
            };
            if !keep_going {
                return false;
            }
        }
        true
    }
}

//! Registry of entity descriptors.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::class::ClassDescriptor;
use crate::descriptor::EntityDescriptor;
use crate::error::{MapError, MapResult};

/// Entity lookup by name plus a lazily built class descriptor per entity.
///
/// Class descriptors are built once on first request and shared afterwards.
#[derive(Debug, Default)]
pub struct EntityResolver {
    entities: RwLock<BTreeMap<String, Arc<EntityDescriptor>>>,
    classes: RwLock<HashMap<String, Arc<ClassDescriptor>>>,
}

impl EntityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration. A later descriptor with the same name
    /// replaces the earlier one.
    pub fn with_entity(self, descriptor: EntityDescriptor) -> Self {
        self.classes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&descriptor.name);
        self.entities
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(descriptor.name.clone(), Arc::new(descriptor));
        self
    }

    /// Register a descriptor. Fails if the name is taken.
    pub fn register(&self, descriptor: EntityDescriptor) -> MapResult<()> {
        if descriptor.primary_key.is_empty() {
            return Err(MapError::MissingPrimaryKey(descriptor.name));
        }
        let mut entities = self.entities.write().unwrap_or_else(PoisonError::into_inner);
        if entities.contains_key(&descriptor.name) {
            return Err(MapError::DuplicateEntity(descriptor.name));
        }
        debug!(entity = %descriptor.name, "entity registered");
        entities.insert(descriptor.name.clone(), Arc::new(descriptor));
        Ok(())
    }

    pub fn entity(&self, name: &str) -> MapResult<Arc<EntityDescriptor>> {
        self.entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| MapError::UnknownEntity(name.to_string()))
    }

    pub fn entity_names(&self) -> Vec<String> {
        self.entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// The property table for `name`, built on first use.
    pub fn class_descriptor(&self, name: &str) -> MapResult<Arc<ClassDescriptor>> {
        if let Some(class) = self
            .classes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Ok(Arc::clone(class));
        }

        let entity = self.entity(name)?;
        let mut classes = self.classes.write().unwrap_or_else(PoisonError::into_inner);
        let class = classes
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(ClassDescriptor::new(entity)));
        Ok(Arc::clone(class))
    }

    /// Check cross-entity references: relationship targets exist, and declared
    /// reverses exist on the target and point back.
    pub fn validate(&self) -> MapResult<()> {
        let entities = self.entities.read().unwrap_or_else(PoisonError::into_inner);
        for entity in entities.values() {
            if entity.primary_key.is_empty() {
                return Err(MapError::MissingPrimaryKey(entity.name.clone()));
            }
            for rel in &entity.relationships {
                let target = entities.get(&rel.target).ok_or_else(|| MapError::UnknownTarget {
                    entity: entity.name.clone(),
                    relationship: rel.name.clone(),
                    target: rel.target.clone(),
                })?;

                if let Some(reverse) = &rel.reverse {
                    let points_back = target
                        .relationship(reverse)
                        .is_some_and(|r| r.target == entity.name);
                    if !points_back {
                        return Err(MapError::InvalidReverse {
                            entity: entity.name.clone(),
                            relationship: rel.name.clone(),
                            reverse: reverse.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

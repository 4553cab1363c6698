//! Mapping metadata for PCX.
//!
//! Entities are described once, up front, by [`EntityDescriptor`]s registered
//! with an [`EntityResolver`]. For each entity the resolver builds a
//! [`ClassDescriptor`]: a name-to-[`Property`] table through which contexts
//! read and write object values without knowing the concrete entity type.
//!
//! # Key Types
//!
//! - [`EntityDescriptor`] -- Entity name, primary key, attributes, relationships
//! - [`RelationshipDescriptor`] / [`DeleteRule`] -- Arc metadata
//! - [`PropertyAccessor`] / [`Property`] -- Generic read/write on an object's values
//! - [`ClassDescriptor`] -- Per-entity property table, built once
//! - [`EntityResolver`] -- Registry of descriptors

pub mod class;
pub mod descriptor;
pub mod error;
pub mod property;
pub mod resolver;

pub use class::{ClassDescriptor, PropertyVisitor};
pub use descriptor::{AttributeDescriptor, DeleteRule, EntityDescriptor, RelationshipDescriptor};
pub use error::{MapError, MapResult};
pub use property::{AttributeProperty, Property, PropertyAccessor, PropertyValue, ToManyProperty, ToOneProperty};
pub use resolver::EntityResolver;

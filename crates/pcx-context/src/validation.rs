//! Pre-commit validation of dirty objects.
//!
//! Every dirty object is checked against its state (insert, update or delete)
//! by each registered [`Validator`]. All failures are collected into one
//! [`ValidationResult`]; any failure blocks the commit.

use std::fmt;

use pcx_map::EntityDescriptor;
use pcx_types::{ObjectId, ObjectValues};

/// A single validation failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationFailure {
    pub id: ObjectId,
    /// The offending property, if the failure is about one.
    pub property: Option<String>,
    pub message: String,
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.property {
            Some(property) => write!(f, "{}.{}: {}", self.id, property, self.message),
            None => write!(f, "{}: {}", self.id, self.message),
        }
    }
}

/// Failures collected over one validation pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationResult {
    failures: Vec<ValidationFailure>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_failure(
        &mut self,
        id: &ObjectId,
        property: Option<&str>,
        message: impl Into<String>,
    ) {
        self.failures.push(ValidationFailure {
            id: id.clone(),
            property: property.map(str::to_string),
            message: message.into(),
        });
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn failures(&self) -> &[ValidationFailure] {
        &self.failures
    }

    /// Failures for one object.
    pub fn failures_for<'a>(&'a self, id: &'a ObjectId) -> impl Iterator<Item = &'a ValidationFailure> {
        self.failures.iter().filter(move |f| &f.id == id)
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failure(s)", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "; {failure}")?;
        }
        Ok(())
    }
}

/// Read-only view of a dirty object handed to validators.
#[derive(Clone, Copy, Debug)]
pub struct ObjectView<'a> {
    pub id: &'a ObjectId,
    pub entity: &'a EntityDescriptor,
    pub values: &'a ObjectValues,
}

/// Hook run against every dirty object before a commit.
pub trait Validator: Send + Sync {
    fn name(&self) -> &str;

    fn validate_for_insert(&self, _object: &ObjectView<'_>, _result: &mut ValidationResult) {}

    fn validate_for_update(&self, _object: &ObjectView<'_>, _result: &mut ValidationResult) {}

    fn validate_for_delete(&self, _object: &ObjectView<'_>, _result: &mut ValidationResult) {}
}

/// Rejects new or modified objects whose mandatory attributes are null.
#[derive(Clone, Copy, Debug, Default)]
pub struct MandatoryAttributeValidator;

impl MandatoryAttributeValidator {
    fn check(&self, object: &ObjectView<'_>, result: &mut ValidationResult) {
        for attribute in object.entity.attributes.iter().filter(|a| a.mandatory) {
            if object.values.attribute(&attribute.name).is_null() {
                result.add_failure(object.id, Some(&attribute.name), "mandatory attribute is null");
            }
        }
    }
}

impl Validator for MandatoryAttributeValidator {
    fn name(&self) -> &str {
        "mandatory-attributes"
    }

    fn validate_for_insert(&self, object: &ObjectView<'_>, result: &mut ValidationResult) {
        self.check(object, result);
    }

    fn validate_for_update(&self, object: &ObjectView<'_>, result: &mut ValidationResult) {
        self.check(object, result);
    }
}

//! Entity, attribute and relationship descriptors.

use serde::{Deserialize, Serialize};

/// What happens to related objects when the source object is deleted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteRule {
    /// Leave related objects and arcs alone.
    NoAction,
    /// Remove arcs to the deleted object on both sides.
    #[default]
    Nullify,
    /// Delete related objects as well.
    Cascade,
    /// Refuse the delete while any related object exists.
    Deny,
}

/// A plain-valued property.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDescriptor {
    pub name: String,
    /// A mandatory attribute must be non-null on insert and update.
    #[serde(default)]
    pub mandatory: bool,
}

impl AttributeDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mandatory: false,
        }
    }

    pub fn mandatory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mandatory: true,
        }
    }
}

/// An arc from one entity to another.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipDescriptor {
    pub name: String,
    pub target: String,
    #[serde(default)]
    pub to_many: bool,
    /// Name of the relationship on `target` pointing back, if any.
    #[serde(default)]
    pub reverse: Option<String>,
    #[serde(default)]
    pub delete_rule: DeleteRule,
}

impl RelationshipDescriptor {
    pub fn to_one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            to_many: false,
            reverse: None,
            delete_rule: DeleteRule::default(),
        }
    }

    pub fn to_many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            to_many: true,
            ..Self::to_one(name, target)
        }
    }

    pub fn with_reverse(mut self, reverse: impl Into<String>) -> Self {
        self.reverse = Some(reverse.into());
        self
    }

    pub fn with_delete_rule(mut self, rule: DeleteRule) -> Self {
        self.delete_rule = rule;
        self
    }
}

/// Mapping metadata for one entity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub name: String,
    /// Primary-key column names; usually one.
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub attributes: Vec<AttributeDescriptor>,
    #[serde(default)]
    pub relationships: Vec<RelationshipDescriptor>,
}

impl EntityDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: Vec::new(),
            attributes: Vec::new(),
            relationships: Vec::new(),
        }
    }

    pub fn with_primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key.push(column.into());
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>) -> Self {
        self.attributes.push(AttributeDescriptor::new(name));
        self
    }

    pub fn with_mandatory_attribute(mut self, name: impl Into<String>) -> Self {
        self.attributes.push(AttributeDescriptor::mandatory(name));
        self
    }

    pub fn with_relationship(mut self, relationship: RelationshipDescriptor) -> Self {
        self.relationships.push(relationship);
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn relationship(&self, name: &str) -> Option<&RelationshipDescriptor> {
        self.relationships.iter().find(|r| r.name == name)
    }

    /// Attribute names followed by relationship names, in declaration order.
    pub fn property_names(&self) -> Vec<String> {
        self.attributes
            .iter()
            .map(|a| a.name.clone())
            .chain(self.relationships.iter().map(|r| r.name.clone()))
            .collect()
    }

    /// The single primary-key column, if the key is not compound.
    pub fn single_primary_key(&self) -> Option<&str> {
        match self.primary_key.as_slice() {
            [column] => Some(column),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artist() -> EntityDescriptor {
        EntityDescriptor::new("Artist")
            .with_primary_key("ARTIST_ID")
            .with_mandatory_attribute("name")
            .with_attribute("born")
            .with_relationship(
                RelationshipDescriptor::to_many("paintings", "Painting")
                    .with_reverse("artist")
                    .with_delete_rule(DeleteRule::Cascade),
            )
    }

    #[test]
    fn property_names_in_declaration_order() {
        assert_eq!(artist().property_names(), vec!["name", "born", "paintings"]);
    }

    #[test]
    fn lookups() {
        let entity = artist();
        assert!(entity.attribute("name").unwrap().mandatory);
        assert!(!entity.attribute("born").unwrap().mandatory);
        let rel = entity.relationship("paintings").unwrap();
        assert!(rel.to_many);
        assert_eq!(rel.reverse.as_deref(), Some("artist"));
        assert_eq!(rel.delete_rule, DeleteRule::Cascade);
        assert_eq!(entity.single_primary_key(), Some("ARTIST_ID"));
    }

    #[test]
    fn default_delete_rule_is_nullify() {
        let rel = RelationshipDescriptor::to_one("artist", "Artist");
        assert_eq!(rel.delete_rule, DeleteRule::Nullify);
    }

    #[test]
    fn deserializes_with_defaults() {
        let json = r#"{
            "name": "Painting",
            "primary_key": ["PAINTING_ID"],
            "attributes": [{"name": "title"}],
            "relationships": [{"name": "artist", "target": "Artist"}]
        }"#;
        let entity: EntityDescriptor = serde_json::from_str(json).unwrap();
        assert!(!entity.attributes[0].mandatory);
        assert!(!entity.relationships[0].to_many);
        assert_eq!(entity.relationships[0].delete_rule, DeleteRule::Nullify);
    }
}

//! Entity model files.
//!
//! A model file is TOML with one `[[entity]]` table per entity:
//!
//! ```toml
//! [[entity]]
//! name = "Artist"
//! primary_key = ["ARTIST_ID"]
//! attributes = [{ name = "name", mandatory = true }]
//! relationships = [{ name = "paintings", target = "Painting", to_many = true, reverse = "artist" }]
//! ```

use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use serde::Deserialize;

use pcx_map::{DeleteRule, EntityDescriptor, EntityResolver, RelationshipDescriptor};

#[derive(Debug, Deserialize)]
struct ModelFile {
    #[serde(default, rename = "entity")]
    entities: Vec<EntityDescriptor>,
}

/// Parse model TOML, register every entity and check cross references.
pub fn parse_model(text: &str) -> anyhow::Result<EntityResolver> {
    let file: ModelFile = toml::from_str(text).context("invalid model file")?;
    let resolver = EntityResolver::new();
    for entity in file.entities {
        resolver.register(entity)?;
    }
    resolver.validate()?;
    Ok(resolver)
}

pub fn load_model(path: &Path) -> anyhow::Result<EntityResolver> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    parse_model(&text)
}

/// Artists owning paintings. Deleting an artist deletes its paintings.
pub fn demo_model() -> Arc<EntityResolver> {
    let resolver = EntityResolver::new()
        .with_entity(
            EntityDescriptor::new("Artist")
                .with_primary_key("ARTIST_ID")
                .with_mandatory_attribute("name")
                .with_attribute("born")
                .with_relationship(
                    RelationshipDescriptor::to_many("paintings", "Painting")
                        .with_reverse("artist")
                        .with_delete_rule(DeleteRule::Cascade),
                ),
        )
        .with_entity(
            EntityDescriptor::new("Painting")
                .with_primary_key("PAINTING_ID")
                .with_mandatory_attribute("title")
                .with_relationship(
                    RelationshipDescriptor::to_one("artist", "Artist").with_reverse("paintings"),
                ),
        );
    Arc::new(resolver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MODEL: &str = r#"
[[entity]]
name = "Artist"
primary_key = ["ARTIST_ID"]
attributes = [{ name = "name", mandatory = true }, { name = "born" }]
relationships = [{ name = "paintings", target = "Painting", to_many = true, reverse = "artist" }]

[[entity]]
name = "Painting"
primary_key = ["PAINTING_ID"]
attributes = [{ name = "title" }]
relationships = [{ name = "artist", target = "Artist", reverse = "paintings", delete_rule = "deny" }]
"#;

    #[test]
    fn parses_entities() {
        let resolver = parse_model(MODEL).unwrap();
        assert_eq!(resolver.entity_names(), vec!["Artist", "Painting"]);

        let painting = resolver.entity("Painting").unwrap();
        let artist = painting.relationship("artist").unwrap();
        assert!(!artist.to_many);
        assert_eq!(artist.delete_rule, DeleteRule::Deny);
        assert!(resolver.entity("Artist").unwrap().attribute("name").unwrap().mandatory);
    }

    #[test]
    fn dangling_reverse_is_rejected() {
        let text = MODEL.replace("reverse = \"artist\"", "reverse = \"painter\"");
        assert!(parse_model(&text).is_err());
    }

    #[test]
    fn missing_primary_key_is_rejected() {
        let text = "[[entity]]\nname = \"Artist\"\nprimary_key = []\n";
        assert!(parse_model(text).is_err());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{MODEL}").unwrap();
        assert_eq!(load_model(file.path()).unwrap().entity_names().len(), 2);
    }

    #[test]
    fn demo_model_is_consistent() {
        demo_model().validate().unwrap();
    }
}

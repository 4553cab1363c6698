use std::sync::Arc;

use pcx_map::{EntityDescriptor, EntityResolver, RelationshipDescriptor};
use pcx_types::ObjectId;

pub fn model() -> Arc<EntityResolver> {
    Arc::new(
        EntityResolver::new()
            .with_entity(
                EntityDescriptor::new("Artist")
                    .with_primary_key("ARTIST_ID")
                    .with_mandatory_attribute("name")
                    .with_attribute("born")
                    .with_relationship(
                        RelationshipDescriptor::to_many("paintings", "Painting")
                            .with_reverse("artist"),
                    ),
            )
            .with_entity(
                EntityDescriptor::new("Painting")
                    .with_primary_key("PAINTING_ID")
                    .with_attribute("title")
                    .with_relationship(
                        RelationshipDescriptor::to_one("artist", "Artist")
                            .with_reverse("paintings"),
                    ),
            ),
    )
}

pub fn artist(n: i64) -> ObjectId {
    ObjectId::single("Artist", "ARTIST_ID", n)
}

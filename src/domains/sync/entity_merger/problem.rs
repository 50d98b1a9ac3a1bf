// sync/entity_merger/problem.rs

use crate::domains::sync::schema::EntitySchema;
use crate::domains::sync::types::EntityType;

/// Road problems (`problemes` / `probleme_routier`).
pub fn schema() -> EntitySchema {
    EntitySchema {
        entity_type: EntityType::Problem,
        resource: "problemes",
        collection: "probleme_routier",
        id_field: "Id_probleme",
        id_aliases: &["id", "id_probleme"],
        delete_field: "is_deleted",
        derived_fields: &[],
        enrich_with_roles: false,
    }
}

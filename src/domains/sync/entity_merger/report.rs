// sync/entity_merger/report.rs

use crate::domains::sync::schema::EntitySchema;
use crate::domains::sync::types::EntityType;

/// Field reports (`signalements` / `signalement`). Most replica-originated
/// records are reports filed offline under a provisional key.
pub fn schema() -> EntitySchema {
    EntitySchema {
        entity_type: EntityType::Report,
        resource: "signalements",
        collection: "signalement",
        id_field: "Id_signalement",
        id_aliases: &["id", "id_signalement"],
        delete_field: "is_deleted",
        derived_fields: &[],
        enrich_with_roles: false,
    }
}

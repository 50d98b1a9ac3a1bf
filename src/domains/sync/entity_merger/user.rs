// sync/entity_merger/user.rs

use std::collections::HashMap;

use serde_json::Value;

use crate::domains::sync::schema::{id_to_string, EntitySchema};
use crate::domains::sync::types::{Document, EntityType};

const ROLE_ID_FIELD: &str = "Id_role";

/// Users (`utilisateurs` / `users`). Note the delete flag is `id_deleted`.
pub fn schema() -> EntitySchema {
    EntitySchema {
        entity_type: EntityType::User,
        resource: "utilisateurs",
        collection: "users",
        id_field: "Id_utilisateur",
        id_aliases: &["id", "user_id", "id_user"],
        delete_field: "id_deleted",
        derived_fields: &["role", "role_libelle", "niveau"],
        enrich_with_roles: true,
    }
}

/// Role lookup used to denormalize a user's role into the replica document.
#[derive(Debug, Clone, Default)]
pub struct RoleDirectory {
    roles: HashMap<String, Document>,
}

impl RoleDirectory {
    /// Index roles by `Id_role` (or `id`); roles without either are ignored.
    pub fn from_documents(documents: Vec<Document>) -> Self {
        let roles = documents
            .into_iter()
            .filter_map(|role| {
                let id = role
                    .get(ROLE_ID_FIELD)
                    .or_else(|| role.get("id"))
                    .and_then(id_to_string)?;
                Some((id, role))
            })
            .collect();
        Self { roles }
    }

    /// The role fields a user document should carry for its `Id_role`.
    /// Empty when the user has no role or the role is unknown.
    pub fn derived_for(&self, user: &Document) -> Document {
        let mut derived = Document::new();
        let Some(role) = user
            .get(ROLE_ID_FIELD)
            .and_then(id_to_string)
            .and_then(|id| self.roles.get(&id))
        else {
            return derived;
        };

        derived.insert("role".to_string(), Value::Object(role.clone()));
        derived.insert("role_libelle".to_string(), role.get("libelle").cloned().unwrap_or(Value::Null));
        derived.insert("niveau".to_string(), role.get("niveau").cloned().unwrap_or(Value::Null));
        derived
    }

    /// Add `role`, `role_libelle` and `niveau` for the user's `Id_role`.
    /// Users with an unknown role are left untouched.
    pub fn enrich(&self, user: &mut Document) {
        let derived = self.derived_for(user);
        user.extend(derived);
    }

    /// Whether `stored` carries role fields other than the ones `user` should get now.
    pub fn is_stale(&self, user: &Document, stored: &Document) -> bool {
        self.derived_for(user)
            .iter()
            .any(|(field, value)| stored.get(field) != Some(value))
    }
}

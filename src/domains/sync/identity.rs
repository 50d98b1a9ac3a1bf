use std::collections::HashSet;

use log::{debug, info, warn};

use crate::errors::{SyncError, SyncResult};
use crate::domains::sync::document_store::DocumentStore;
use crate::domains::sync::relational_store::RelationalStore;
use crate::domains::sync::repository::PromotionJournal;
use crate::domains::sync::schema::EntitySchema;
use crate::domains::sync::time;
use crate::domains::sync::types::SyncRecord;
use crate::domains::sync::utils::CallBudget;

/// What a promotion did to the replica
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromotionOutcome {
    pub canonical_id: String,
    /// The document was moved from its provisional key.
    pub renamed: bool,
    /// The canonical id came from an unfinished journal entry, no create was issued.
    pub resumed: bool,
}

/// Gives replica-originated records their canonical identity and keeps the
/// replica keyed by it.
pub struct IdentityReconciler<'a> {
    relational: &'a dyn RelationalStore,
    documents: &'a dyn DocumentStore,
    journal: &'a dyn PromotionJournal,
    budget: &'a CallBudget,
}

impl<'a> IdentityReconciler<'a> {
    pub fn new(
        relational: &'a dyn RelationalStore,
        documents: &'a dyn DocumentStore,
        journal: &'a dyn PromotionJournal,
        budget: &'a CallBudget,
    ) -> Self {
        Self { relational, documents, journal, budget }
    }

    /// Promote a mirror record the relational store has never seen.
    ///
    /// `live_keys` holds the keys currently present in the replica collection;
    /// a resumed promotion whose canonical document already exists only has
    /// the provisional key left to remove.
    pub async fn promote(
        &self,
        schema: &EntitySchema,
        mirror: &SyncRecord,
        live_keys: &HashSet<String>,
    ) -> SyncResult<PromotionOutcome> {
        let entity = schema.entity_type;
        let provisional_key = mirror.mirror_key.as_str();

        let (promotion, resumed) = match self.journal.find_pending(entity, provisional_key).await? {
            Some(pending) => {
                info!(
                    "Resuming {} promotion '{}' -> '{}' from journal",
                    entity, provisional_key, pending.canonical_id
                );
                (pending, true)
            }
            None => {
                let created = self
                    .budget
                    .run("relational.create", self.relational.create(entity, schema.create_payload(mirror)))
                    .await?;
                let canonical_id = schema.assigned_id(&created).ok_or_else(|| {
                    SyncError::IdentityAssignmentFailed {
                        entity_type: entity,
                        mirror_key: provisional_key.to_string(),
                    }
                })?;
                let promotion = self.journal.record_assignment(entity, provisional_key, &canonical_id).await?;
                debug!("Created {} '{}' for replica key '{}'", entity, canonical_id, provisional_key);
                (promotion, false)
            }
        };

        let canonical_id = promotion.canonical_id.clone();
        let renamed = canonical_id != provisional_key;

        if renamed {
            if resumed && live_keys.contains(&canonical_id) {
                debug!("{} document '{}' already written, retiring '{}'", entity, canonical_id, provisional_key);
            } else {
                let mut promoted = mirror.clone();
                promoted.deleted = false;
                let body = schema.encode_mirror(&promoted, &canonical_id, &time::now_iso());
                self.budget
                    .run("document.put", self.documents.put(schema.collection, &canonical_id, body, true))
                    .await?;
            }
            self.budget
                .run("document.delete", self.documents.delete(schema.collection, provisional_key))
                .await?;
        } else {
            // The key was already the canonical id; stamp the identity fields in place.
            let body = schema.encode_mirror(mirror, &canonical_id, &time::now_iso());
            self.budget
                .run("document.put", self.documents.put(schema.collection, &canonical_id, body, true))
                .await?;
        }

        self.journal.mark_completed(promotion.id).await?;
        info!("Promoted {} '{}' to canonical id '{}'", entity, provisional_key, canonical_id);

        Ok(PromotionOutcome { canonical_id, renamed, resumed })
    }

    /// Move an alias document (key differs from its declared canonical id) to
    /// the canonical key and remove the alias.
    ///
    /// The alias content is copied when no canonical document exists, or when
    /// `supersedes_canonical` says it won against the local record. Its own
    /// timestamp is kept so the move does not win later comparisons.
    pub async fn retire_alias(
        &self,
        schema: &EntitySchema,
        alias: &SyncRecord,
        live_keys: &HashSet<String>,
        supersedes_canonical: bool,
    ) -> SyncResult<()> {
        let Some(canonical_id) = alias.canonical_id.as_deref() else {
            return Ok(());
        };

        if supersedes_canonical || !live_keys.contains(canonical_id) {
            let written_at = time::millis_to_iso(alias.updated_at).unwrap_or_else(time::now_iso);
            let body = schema.encode_mirror(alias, canonical_id, &written_at);
            self.budget
                .run("document.put", self.documents.put(schema.collection, canonical_id, body, true))
                .await?;
        }
        self.budget
            .run("document.delete", self.documents.delete(schema.collection, &alias.mirror_key))
            .await?;

        info!(
            "Retired {} alias '{}' of canonical id '{}'",
            schema.entity_type, alias.mirror_key, canonical_id
        );
        Ok(())
    }

    /// Complete pending journal entries whose provisional key is gone from the
    /// replica. Returns how many were completed.
    pub async fn sweep_journal(&self, schema: &EntitySchema, live_keys: &HashSet<String>) -> SyncResult<u32> {
        let mut completed = 0;
        for pending in self.journal.list_pending(schema.entity_type).await? {
            if live_keys.contains(&pending.provisional_key) {
                warn!(
                    "{} promotion '{}' -> '{}' is still unfinished",
                    schema.entity_type, pending.provisional_key, pending.canonical_id
                );
                continue;
            }
            self.journal.mark_completed(pending.id).await?;
            completed += 1;
        }
        Ok(completed)
    }
}

// sync/entity_merger/mod.rs

pub mod problem;
pub mod report;
pub mod user;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use log::{debug, info, warn};

use crate::errors::SyncResult;
use crate::domains::sync::conflict_resolver::ConflictResolver;
use crate::domains::sync::document_store::{merge_documents, DocumentStore};
use crate::domains::sync::identity::IdentityReconciler;
use crate::domains::sync::relational_store::RelationalStore;
use crate::domains::sync::repository::PromotionJournal;
use crate::domains::sync::schema::EntitySchema;
use crate::domains::sync::time;
use crate::domains::sync::types::{Document, EntitySyncStats, EntityType, MirrorDocument, SyncRecord};
use crate::domains::sync::utils::{format_sync_operation, CallBudget};

use self::user::RoleDirectory;

/// Schema of each synced entity type.
pub fn schema_for(entity: EntityType) -> EntitySchema {
    match entity {
        EntityType::Problem => problem::schema(),
        EntityType::User => user::schema(),
        EntityType::Report => report::schema(),
    }
}

/// Replica documents of one collection as listed at the start of a task,
/// refreshed with every write the task issues.
struct MirrorSnapshot {
    schema: EntitySchema,
    bodies: BTreeMap<String, Document>,
    records: BTreeMap<String, SyncRecord>,
}

impl MirrorSnapshot {
    fn new(schema: &EntitySchema, documents: Vec<MirrorDocument>) -> Self {
        let mut snapshot = Self {
            schema: schema.clone(),
            bodies: BTreeMap::new(),
            records: BTreeMap::new(),
        };
        for doc in documents {
            snapshot.insert(doc);
        }
        snapshot
    }

    fn insert(&mut self, doc: MirrorDocument) {
        let record = self.schema.decode_mirror(doc.clone());
        self.records.insert(doc.key.clone(), record);
        self.bodies.insert(doc.key, doc.body);
    }

    /// The document stored under `id` that does not claim another identity.
    fn canonical(&self, id: &str) -> Option<&SyncRecord> {
        self.records.get(id).filter(|r| !r.is_alias())
    }

    /// Mirror a `put(.., merge=true)` that just succeeded.
    fn apply_put(&mut self, key: &str, body: Document) {
        let mut merged = self.bodies.get(key).cloned().unwrap_or_default();
        merge_documents(&mut merged, body);
        self.insert(MirrorDocument { key: key.to_string(), body: merged });
    }

    fn body(&self, key: &str) -> Option<&Document> {
        self.bodies.get(key)
    }

    fn keys(&self) -> HashSet<String> {
        self.bodies.keys().cloned().collect()
    }

    fn records(&self) -> Vec<SyncRecord> {
        self.records.values().cloned().collect()
    }
}

/// Two-phase reconciliation of one entity type.
///
/// Phase A pushes relational records to the replica, phase B pulls replica
/// changes back, promoting replica-originated records on the way. Records are
/// handled one at a time and every write commits on its own; a failure aborts
/// the task and the next run picks up from whatever was written.
pub struct EntitySyncTask {
    schema: EntitySchema,
    relational: Arc<dyn RelationalStore>,
    documents: Arc<dyn DocumentStore>,
    journal: Arc<dyn PromotionJournal>,
}

impl EntitySyncTask {
    pub fn new(
        schema: EntitySchema,
        relational: Arc<dyn RelationalStore>,
        documents: Arc<dyn DocumentStore>,
        journal: Arc<dyn PromotionJournal>,
    ) -> Self {
        Self { schema, relational, documents, journal }
    }

    pub fn entity_type(&self) -> EntityType {
        self.schema.entity_type
    }

    pub fn schema(&self) -> &EntitySchema {
        &self.schema
    }

    pub async fn run(&self, budget: &CallBudget) -> SyncResult<EntitySyncStats> {
        let schema = &self.schema;
        let entity = schema.entity_type;
        info!("Syncing {} ({} <-> {})", entity, schema.resource, schema.collection);

        let raw_local = budget.run("relational.list", self.relational.list(entity)).await?;
        let raw_mirror = budget
            .run("document.list_all", self.documents.list_all(schema.collection))
            .await?;

        let mut stats = EntitySyncStats::default();
        let local = self.index_local(raw_local, &mut stats);
        let mut mirror = MirrorSnapshot::new(schema, raw_mirror);
        debug!("{}: {} local records, {} replica documents", entity, local.len(), mirror.records.len());

        self.push(budget, &local, &mut mirror, &mut stats).await?;
        self.pull(budget, &local, &mirror, &mut stats).await?;

        info!(
            "Synced {}: pushed={} pulled={} soft_deleted={} promoted={} aliases_retired={} tombstones_held={} unchanged={}",
            entity,
            stats.pushed,
            stats.pulled,
            stats.soft_deleted,
            stats.promoted,
            stats.aliases_retired,
            stats.tombstones_held,
            stats.unchanged
        );
        Ok(stats)
    }

    fn index_local(&self, raw: Vec<Document>, stats: &mut EntitySyncStats) -> BTreeMap<String, SyncRecord> {
        let mut local = BTreeMap::new();
        for doc in raw {
            let record = self.schema.decode_local(doc);
            let Some(id) = record.canonical_id.clone() else {
                warn!("Skipping {} record without {}", self.schema.entity_type, self.schema.id_field);
                stats.skipped_without_id += 1;
                continue;
            };
            if local.insert(id.clone(), record).is_some() {
                warn!("Duplicate {} id '{}' in relational listing, keeping the last one", self.schema.entity_type, id);
            }
        }
        local
    }

    /// Phase A: relational -> replica.
    async fn push(
        &self,
        budget: &CallBudget,
        local: &BTreeMap<String, SyncRecord>,
        mirror: &mut MirrorSnapshot,
        stats: &mut EntitySyncStats,
    ) -> SyncResult<()> {
        let schema = &self.schema;
        let entity = schema.entity_type.as_str();
        let tombstones = schema.tombstones();
        let volatile = schema.volatile_fields();

        let roles = if schema.enrich_with_roles {
            let roles = budget.run("relational.list_roles", self.relational.list_roles()).await?;
            RoleDirectory::from_documents(roles)
        } else {
            RoleDirectory::default()
        };

        for (id, record) in local {
            let target = mirror.canonical(id);
            if tombstones.blocks_resurrection(record, target) {
                debug!("{}", format_sync_operation("push", entity, id, "deleted, not resurrected"));
                stats.resurrections_blocked += 1;
                continue;
            }

            let verdict = match target {
                Some(target) => judge(schema, &volatile, record, target),
                None => Verdict::Write,
            };
            match verdict {
                Verdict::Write => {
                    let mut body = schema.encode_mirror(record, id, &time::now_iso());
                    roles.enrich(&mut body);
                    budget
                        .run("document.put", self.documents.put(schema.collection, id, body.clone(), true))
                        .await?;
                    mirror.apply_put(id, body);
                    debug!("{}", format_sync_operation("push", entity, id, "written"));
                    stats.pushed += 1;
                    continue;
                }
                Verdict::TombstoneHolds => {
                    debug!("{}", format_sync_operation("push", entity, id, "replica tombstone holds"));
                    stats.tombstones_held += 1;
                }
                Verdict::Unchanged => stats.unchanged += 1,
            }

            // Role rows change without touching the user, so derived fields are
            // checked on their own and rewritten without a new timestamp.
            let stale = mirror
                .body(id)
                .is_some_and(|stored| roles.is_stale(&record.payload, stored));
            if stale {
                let derived = roles.derived_for(&record.payload);
                budget
                    .run("document.put", self.documents.put(schema.collection, id, derived.clone(), true))
                    .await?;
                mirror.apply_put(id, derived);
                debug!("{}", format_sync_operation("push", entity, id, "role fields refreshed"));
                stats.roles_refreshed += 1;
            }
        }
        Ok(())
    }

    /// Phase B: replica -> relational, on the snapshot left by phase A.
    async fn pull(
        &self,
        budget: &CallBudget,
        local: &BTreeMap<String, SyncRecord>,
        mirror: &MirrorSnapshot,
        stats: &mut EntitySyncStats,
    ) -> SyncResult<()> {
        let schema = &self.schema;
        let entity = schema.entity_type.as_str();
        let tombstones = schema.tombstones();
        let volatile = schema.volatile_fields();
        let reconciler = IdentityReconciler::new(
            self.relational.as_ref(),
            self.documents.as_ref(),
            self.journal.as_ref(),
            budget,
        );
        let mut live_keys = mirror.keys();

        for record in mirror.records() {
            let key = record.lookup_key();
            let target = local.get(key);
            if tombstones.blocks_resurrection(&record, target) {
                debug!("{}", format_sync_operation("pull", entity, key, "deleted, not resurrected"));
                stats.resurrections_blocked += 1;
                continue;
            }

            let Some(target) = target else {
                let outcome = reconciler.promote(schema, &record, &live_keys).await?;
                live_keys.remove(&record.mirror_key);
                live_keys.insert(outcome.canonical_id);
                stats.promoted += 1;
                continue;
            };

            let verdict = judge(schema, &volatile, &record, target);
            match verdict {
                Verdict::Write => self.apply_pull(budget, &record, key, stats).await?,
                Verdict::TombstoneHolds => {
                    debug!("{}", format_sync_operation("pull", entity, key, "local tombstone holds"));
                    stats.tombstones_held += 1;
                }
                Verdict::Unchanged if !record.is_alias() => stats.unchanged += 1,
                Verdict::Unchanged => {}
            }

            if record.is_alias() {
                let won = verdict == Verdict::Write;
                reconciler.retire_alias(schema, &record, &live_keys, won).await?;
                live_keys.remove(&record.mirror_key);
                live_keys.insert(key.to_string());
                stats.aliases_retired += 1;
            }
        }

        let swept = reconciler.sweep_journal(schema, &live_keys).await?;
        if swept > 0 {
            info!("Completed {} stale {} promotion journal entries", swept, entity);
        }
        Ok(())
    }

    /// Write a winning replica record back to the relational store.
    async fn apply_pull(
        &self,
        budget: &CallBudget,
        record: &SyncRecord,
        id: &str,
        stats: &mut EntitySyncStats,
    ) -> SyncResult<()> {
        let schema = &self.schema;
        let update = schema.local_update(record);
        budget
            .run("relational.update", self.relational.update(schema.entity_type, id, update))
            .await?;

        let entity = schema.entity_type.as_str();
        if record.deleted {
            debug!("{}", format_sync_operation("pull", entity, id, "soft-deleted"));
            stats.soft_deleted += 1;
        } else {
            debug!("{}", format_sync_operation("pull", entity, id, "updated"));
            stats.pulled += 1;
        }
        Ok(())
    }
}

/// Outcome of comparing a source record against an existing target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Write,
    TombstoneHolds,
    Unchanged,
}

/// Write only when the source wins last-write-wins with different content and
/// no target tombstone at least as recent stands in the way.
fn judge(schema: &EntitySchema, volatile: &[&str], source: &SyncRecord, target: &SyncRecord) -> Verdict {
    if !(ConflictResolver::should_sync(source, target, volatile)
        && ConflictResolver::content_differs(source, target, volatile))
    {
        return Verdict::Unchanged;
    }
    if schema.tombstones().holds_against(source, Some(target)) {
        return Verdict::TombstoneHolds;
    }
    Verdict::Write
}

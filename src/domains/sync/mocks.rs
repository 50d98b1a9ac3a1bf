//! In-memory stores and journal with call counters, for tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::errors::{DbResult, StoreError, StoreResult};
use crate::domains::sync::document_store::{merge_documents, DocumentStore};
use crate::domains::sync::entity_merger::schema_for;
use crate::domains::sync::relational_store::RelationalStore;
use crate::domains::sync::repository::PromotionJournal;
use crate::domains::sync::schema::id_to_string;
use crate::domains::sync::time;
use crate::domains::sync::types::{Document, EntityType, IdentityPromotion, MirrorDocument};

fn to_document(value: Value) -> Document {
    match value {
        Value::Object(obj) => obj,
        other => panic!("test document must be a JSON object, got {}", other),
    }
}

/// Relational backend double. Ids are assigned from 42 upwards and every
/// create or update stamps `update_at`, like the real backend.
pub struct MemoryRelationalStore {
    records: Mutex<HashMap<EntityType, Vec<Document>>>,
    roles: Mutex<Vec<Document>>,
    next_id: AtomicU64,
    calls: AtomicUsize,
    creates: AtomicUsize,
    writes: AtomicUsize,
    omit_ids: AtomicBool,
    hang: AtomicBool,
    failing: Mutex<HashSet<EntityType>>,
}

impl MemoryRelationalStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            roles: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(42),
            calls: AtomicUsize::new(0),
            creates: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            omit_ids: AtomicBool::new(false),
            hang: AtomicBool::new(false),
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn seed(&self, entity: EntityType, record: Value) {
        self.records.lock().unwrap().entry(entity).or_default().push(to_document(record));
    }

    pub fn set_roles(&self, roles: Vec<Value>) {
        *self.roles.lock().unwrap() = roles.into_iter().map(to_document).collect();
    }

    pub fn record(&self, entity: EntityType, id: &str) -> Option<Document> {
        let id_field = schema_for(entity).id_field;
        self.records
            .lock()
            .unwrap()
            .get(&entity)?
            .iter()
            .find(|r| r.get(id_field).and_then(id_to_string).as_deref() == Some(id))
            .cloned()
    }

    /// Create responses no longer carry the id field.
    pub fn all(&self, entity: EntityType) -> Vec<Document> {
        self.records.lock().unwrap().get(&entity).cloned().unwrap_or_default()
    }

    pub fn omit_ids_in_responses(&self) {
        self.omit_ids.store(true, Ordering::SeqCst);
    }

    /// Every call blocks until the caller gives up.
    pub fn hang(&self, hang: bool) {
        self.hang.store(hang, Ordering::SeqCst);
    }

    /// Calls for `entity` fail with a network error.
    pub fn fail_entity(&self, entity: EntityType) {
        self.failing.lock().unwrap().insert(entity);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    async fn enter(&self, entity: Option<EntityType>) -> StoreResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if let Some(entity) = entity {
            if self.failing.lock().unwrap().contains(&entity) {
                return Err(StoreError::Network(format!("{} backend unreachable", entity)));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RelationalStore for MemoryRelationalStore {
    async fn list(&self, entity: EntityType) -> StoreResult<Vec<Document>> {
        self.enter(Some(entity)).await?;
        Ok(self.records.lock().unwrap().get(&entity).cloned().unwrap_or_default())
    }

    async fn create(&self, entity: EntityType, payload: Document) -> StoreResult<Document> {
        self.enter(Some(entity)).await?;
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.writes.fetch_add(1, Ordering::SeqCst);

        let id_field = schema_for(entity).id_field;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let now = time::now_iso();
        let mut record = payload;
        record.insert(id_field.to_string(), Value::from(id));
        record.insert("create_at".to_string(), Value::String(now.clone()));
        record.insert("update_at".to_string(), Value::String(now));
        self.records.lock().unwrap().entry(entity).or_default().push(record.clone());

        if self.omit_ids.load(Ordering::SeqCst) {
            record.remove(id_field);
        }
        Ok(record)
    }

    async fn update(&self, entity: EntityType, id: &str, partial: Document) -> StoreResult<Document> {
        self.enter(Some(entity)).await?;
        self.writes.fetch_add(1, Ordering::SeqCst);

        let id_field = schema_for(entity).id_field;
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(&entity)
            .and_then(|list| {
                list.iter_mut()
                    .find(|r| r.get(id_field).and_then(id_to_string).as_deref() == Some(id))
            })
            .ok_or_else(|| StoreError::Http { status: 404, body: format!("{} {} not found", entity, id) })?;
        for (key, value) in partial {
            record.insert(key, value);
        }
        record.insert("update_at".to_string(), Value::String(time::now_iso()));
        Ok(record.clone())
    }

    async fn list_roles(&self) -> StoreResult<Vec<Document>> {
        self.enter(None).await?;
        Ok(self.roles.lock().unwrap().clone())
    }
}

/// Replica double with per-operation failure switches.
pub struct MemoryDocumentStore {
    collections: Mutex<HashMap<String, BTreeMap<String, Document>>>,
    calls: AtomicUsize,
    writes: AtomicUsize,
    fail_puts: AtomicBool,
    fail_deletes: AtomicBool,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            collections: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            fail_puts: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
        }
    }

    pub fn seed(&self, collection: &str, key: &str, body: Value) {
        self.collections
            .lock()
            .unwrap()
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), to_document(body));
    }

    pub fn get(&self, collection: &str, key: &str) -> Option<Document> {
        self.collections.lock().unwrap().get(collection)?.get(key).cloned()
    }

    pub fn keys(&self, collection: &str) -> Vec<String> {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .map(|docs| docs.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn list_all(&self, collection: &str) -> StoreResult<Vec<MirrorDocument>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let collections = self.collections.lock().unwrap();
        Ok(collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(key, body)| MirrorDocument { key: key.clone(), body: body.clone() })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn put(&self, collection: &str, key: &str, body: Document, merge: bool) -> StoreResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StoreError::Network("replica write rejected".to_string()));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);

        let mut collections = self.collections.lock().unwrap();
        let docs = collections.entry(collection.to_string()).or_default();
        if merge {
            if let Some(existing) = docs.get_mut(key) {
                merge_documents(existing, body);
                return Ok(());
            }
        }
        docs.insert(key.to_string(), body);
        Ok(())
    }

    async fn delete(&self, collection: &str, key: &str) -> StoreResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StoreError::Network("replica delete rejected".to_string()));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);

        if let Some(docs) = self.collections.lock().unwrap().get_mut(collection) {
            docs.remove(key);
        }
        Ok(())
    }
}

/// Journal double kept in memory.
pub struct MemoryJournal {
    entries: Mutex<Vec<IdentityPromotion>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self { entries: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl PromotionJournal for MemoryJournal {
    async fn find_pending(&self, entity_type: EntityType, provisional_key: &str) -> DbResult<Option<IdentityPromotion>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|p| p.entity_type == entity_type && p.provisional_key == provisional_key && p.is_pending())
            .cloned())
    }

    async fn record_assignment(
        &self,
        entity_type: EntityType,
        provisional_key: &str,
        canonical_id: &str,
    ) -> DbResult<IdentityPromotion> {
        let promotion = IdentityPromotion::new(entity_type, provisional_key, canonical_id);
        self.entries.lock().unwrap().push(promotion.clone());
        Ok(promotion)
    }

    async fn mark_completed(&self, id: Uuid) -> DbResult<()> {
        for entry in self.entries.lock().unwrap().iter_mut() {
            if entry.id == id && entry.completed_at.is_none() {
                entry.completed_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn list_pending(&self, entity_type: EntityType) -> DbResult<Vec<IdentityPromotion>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.entity_type == entity_type && p.is_pending())
            .cloned()
            .collect())
    }
}

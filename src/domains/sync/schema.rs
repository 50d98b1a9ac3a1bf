use serde_json::Value;

use super::time;
use super::tombstone::TombstoneTracker;
use super::types::{Document, EntityType, MirrorDocument, SyncRecord};

/// Timestamp fields, in the order they are trusted when reading a record.
pub const TIMESTAMP_FIELDS: &[&str] = &["update_at", "updated_at", "create_at", "created_at"];

/// Field every replica write stamps with the write time.
pub const WRITE_TIMESTAMP_FIELD: &str = "update_at";

/// Declares how one entity type is laid out in both stores.
///
/// Exactly one delete field per entity; identity and timestamp fields are listed
/// explicitly so nothing has to guess at field names.
#[derive(Debug, Clone)]
pub struct EntitySchema {
    pub entity_type: EntityType,
    /// REST resource of the relational backend.
    pub resource: &'static str,
    /// Replica collection.
    pub collection: &'static str,
    /// Field carrying the canonical id.
    pub id_field: &'static str,
    /// Other identity spellings that may appear in replica documents.
    pub id_aliases: &'static [&'static str],
    pub delete_field: &'static str,
    /// Replica-only fields computed on push; never compared, never pulled back.
    pub derived_fields: &'static [&'static str],
    /// Whether pushes carry the role lookup (users only).
    pub enrich_with_roles: bool,
}

impl EntitySchema {
    pub fn tombstones(&self) -> TombstoneTracker<'_> {
        TombstoneTracker::new(self)
    }

    /// Identity, timestamp and derived fields.
    pub fn volatile_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::with_capacity(1 + self.id_aliases.len() + TIMESTAMP_FIELDS.len() + self.derived_fields.len());
        fields.push(self.id_field);
        fields.extend_from_slice(self.id_aliases);
        fields.extend_from_slice(TIMESTAMP_FIELDS);
        fields.extend_from_slice(self.derived_fields);
        fields
    }

    /// Decode a relational record. Records without a usable id are kept with an
    /// empty key so the caller can report them.
    pub fn decode_local(&self, raw: Document) -> SyncRecord {
        let canonical_id = self.read_id(&raw);
        let mirror_key = canonical_id.clone().unwrap_or_default();
        self.decode(raw, canonical_id, mirror_key)
    }

    /// Decode a replica document stored under `doc.key`.
    pub fn decode_mirror(&self, doc: MirrorDocument) -> SyncRecord {
        let canonical_id = self.read_id(&doc.body);
        self.decode(doc.body, canonical_id, doc.key)
    }

    fn decode(&self, mut raw: Document, canonical_id: Option<String>, mirror_key: String) -> SyncRecord {
        let updated_at = TIMESTAMP_FIELDS
            .iter()
            .find_map(|f| raw.get(*f).filter(|v| !v.is_null()))
            .map(|v| time::normalize(Some(v)))
            .unwrap_or(0);
        let deleted = self.tombstones().is_deleted(&raw);

        raw.remove(self.id_field);
        for alias in self.id_aliases {
            raw.remove(*alias);
        }
        raw.remove(self.delete_field);
        raw.remove(WRITE_TIMESTAMP_FIELD);
        // Replica client bookkeeping such as `__docId` never belongs to the record.
        raw.retain(|k, _| !k.starts_with("__"));

        SyncRecord { canonical_id, mirror_key, updated_at, deleted, payload: raw }
    }

    fn read_id(&self, raw: &Document) -> Option<String> {
        std::iter::once(&self.id_field)
            .chain(self.id_aliases.iter())
            .find_map(|f| raw.get(*f).and_then(id_to_string))
    }

    /// Body written to the replica for a record that won the push.
    pub fn encode_mirror(&self, record: &SyncRecord, canonical_id: &str, written_at: &str) -> Document {
        let mut body = record.payload.clone();
        body.insert(self.id_field.to_string(), Value::String(canonical_id.to_string()));
        body.insert(self.delete_field.to_string(), Value::Bool(record.deleted));
        body.insert(WRITE_TIMESTAMP_FIELD.to_string(), Value::String(written_at.to_string()));
        body
    }

    /// Partial update sent to the relational store when the replica wins.
    pub fn local_update(&self, mirror: &SyncRecord) -> Document {
        let mut body = self.strip_volatile(&mirror.payload);
        body.insert(self.delete_field.to_string(), Value::Bool(mirror.deleted));
        body
    }

    /// Payload for creating a replica-originated record in the relational store.
    pub fn create_payload(&self, mirror: &SyncRecord) -> Document {
        let mut body = self.strip_volatile(&mirror.payload);
        body.insert(self.delete_field.to_string(), Value::Bool(false));
        body
    }

    /// Canonical id from a relational create/update response.
    pub fn assigned_id(&self, created: &Document) -> Option<String> {
        created.get(self.id_field).and_then(id_to_string)
    }

    fn strip_volatile(&self, payload: &Document) -> Document {
        let volatile = self.volatile_fields();
        payload
            .iter()
            .filter(|(k, _)| !volatile.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Ids arrive as numbers from the relational store and as strings from the
/// replica; both are compared as decimal strings.
pub fn id_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

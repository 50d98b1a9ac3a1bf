use serde_json::Value;

use super::schema::EntitySchema;
use super::types::{Document, SyncRecord};

/// Reads the soft-delete flag of one entity type and applies the delete
/// priority rules shared by both sync directions.
pub struct TombstoneTracker<'a> {
    schema: &'a EntitySchema,
}

impl<'a> TombstoneTracker<'a> {
    pub fn new(schema: &'a EntitySchema) -> Self {
        Self { schema }
    }

    /// Booleans are taken as-is, numbers are deleted when non-zero. A missing
    /// field or any other type means "not deleted".
    pub fn is_deleted(&self, raw: &Document) -> bool {
        match raw.get(self.schema.delete_field) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
            _ => false,
        }
    }

    /// A tombstone on the target that is at least as recent as the incoming
    /// change is never overwritten.
    pub fn holds_against(&self, incoming: &SyncRecord, target: Option<&SyncRecord>) -> bool {
        match target {
            Some(target) => target.deleted && target.updated_at >= incoming.updated_at,
            None => false,
        }
    }

    /// A deleted record is never created on a side that does not have it.
    pub fn blocks_resurrection(&self, incoming: &SyncRecord, target: Option<&SyncRecord>) -> bool {
        target.is_none() && incoming.deleted
    }
}

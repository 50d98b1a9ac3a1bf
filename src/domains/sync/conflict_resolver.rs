use serde_json::{json, Map, Value};

use super::types::SyncRecord;

/// Last-write-wins by timestamp, then by content.
pub struct ConflictResolver;

impl ConflictResolver {
    /// Whether `source` should overwrite `target`.
    ///
    /// A strictly newer source wins, a strictly older one loses. On a tie the
    /// records are compared by content with `volatile_fields` ignored, so an
    /// exact re-run writes nothing.
    pub fn should_sync(source: &SyncRecord, target: &SyncRecord, volatile_fields: &[&str]) -> bool {
        if source.updated_at > target.updated_at {
            return true;
        }
        if source.updated_at < target.updated_at {
            return false;
        }
        Self::content_differs(source, target, volatile_fields)
    }

    /// Compare payload and deleted flag, ignoring `volatile_fields`.
    pub fn content_differs(source: &SyncRecord, target: &SyncRecord, volatile_fields: &[&str]) -> bool {
        Self::canonical_content(source, volatile_fields) != Self::canonical_content(target, volatile_fields)
    }

    /// Deterministic serialization of the comparable part of a record.
    ///
    /// `serde_json::Map` is ordered by key (no `preserve_order`), so nested
    /// objects serialize with sorted keys at every level.
    pub fn canonical_content(record: &SyncRecord, volatile_fields: &[&str]) -> String {
        let payload: Map<String, Value> = record
            .payload
            .iter()
            .filter(|(k, v)| !volatile_fields.contains(&k.as_str()) && !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        json!({ "deleted": record.deleted, "payload": payload }).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::sync::types::Document;

    const VOLATILE: &[&str] = &["Id_probleme", "update_at", "create_at"];

    fn record(updated_at: i64, payload: Value) -> SyncRecord {
        SyncRecord {
            canonical_id: Some("1".to_string()),
            mirror_key: "1".to_string(),
            updated_at,
            deleted: false,
            payload: payload.as_object().cloned().unwrap_or_else(Document::new),
        }
    }

    #[test]
    fn test_newer_source_wins_older_loses() {
        let a = record(200, json!({"budget": 1}));
        let b = record(100, json!({"budget": 1}));
        assert!(ConflictResolver::should_sync(&a, &b, VOLATILE));
        assert!(!ConflictResolver::should_sync(&b, &a, VOLATILE));
    }

    #[test]
    fn test_tie_breaks_on_content() {
        let a = record(100, json!({"budget": 1}));
        let b = record(100, json!({"budget": 2}));
        assert!(ConflictResolver::should_sync(&a, &b, VOLATILE));
        assert!(ConflictResolver::should_sync(&b, &a, VOLATILE));

        let same = record(100, json!({"budget": 1}));
        assert!(!ConflictResolver::should_sync(&a, &same, VOLATILE));
    }

    #[test]
    fn test_tie_ignores_volatile_fields_and_key_order() {
        let a = record(100, json!({"budget": 1, "create_at": "2024-01-01", "nested": {"x": 1, "y": [1, {"b": 2, "a": 1}]}}));
        let b = record(100, json!({"nested": {"y": [1, {"a": 1, "b": 2}], "x": 1}, "budget": 1, "create_at": "2023-05-05"}));
        assert!(!ConflictResolver::should_sync(&a, &b, VOLATILE));
    }

    #[test]
    fn test_deleted_flag_is_content() {
        let a = record(100, json!({"budget": 1}));
        let mut b = a.clone();
        b.deleted = true;
        assert!(ConflictResolver::content_differs(&a, &b, VOLATILE));
        assert!(ConflictResolver::should_sync(&b, &a, VOLATILE));
    }

    #[test]
    fn test_null_fields_compare_as_absent() {
        let a = record(100, json!({"budget": 1, "surface": null}));
        let b = record(100, json!({"budget": 1}));
        assert!(!ConflictResolver::content_differs(&a, &b, VOLATILE));
    }

    #[test]
    fn test_canonical_content_is_deterministic() {
        let a = record(1, json!({"z": "last", "a": [3, 2, 1]}));
        assert_eq!(
            ConflictResolver::canonical_content(&a, VOLATILE),
            r#"{"deleted":false,"payload":{"a":[3,2,1],"z":"last"}}"#
        );
    }
}

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::{query, query_as, FromRow, SqlitePool};

use crate::errors::{DbError, StoreResult};
use crate::domains::sync::types::{Document, MirrorDocument};

/// Operations the engine needs from the document replica
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Every document of a collection with its key
    async fn list_all(&self, collection: &str) -> StoreResult<Vec<MirrorDocument>>;

    /// Write a document; with `merge` the body is merged into any existing one
    async fn put(&self, collection: &str, key: &str, body: Document, merge: bool) -> StoreResult<()>;

    /// Remove a document (only used to retire provisional keys)
    async fn delete(&self, collection: &str, key: &str) -> StoreResult<()>;
}

/// Merge `patch` into `target`; nested objects are merged, everything else replaced.
pub fn merge_documents(target: &mut Document, patch: Document) {
    for (key, value) in patch {
        if let Value::Object(incoming) = value {
            if let Some(Value::Object(existing)) = target.get_mut(&key) {
                merge_documents(existing, incoming);
                continue;
            }
            target.insert(key, Value::Object(incoming));
        } else {
            target.insert(key, value);
        }
    }
}

#[derive(Debug, FromRow)]
struct MirrorDocumentRow {
    doc_key: String,
    body: String,
}

impl MirrorDocumentRow {
    fn into_document(self) -> Result<MirrorDocument, DbError> {
        let body = parse_body(&self.body)
            .map_err(|e| DbError::Corrupt(format!("mirror document '{}': {}", self.doc_key, e)))?;
        Ok(MirrorDocument { key: self.doc_key, body })
    }
}

fn parse_body(raw: &str) -> Result<Document, String> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(obj)) => Ok(obj),
        Ok(_) => Err("body is not a JSON object".to_string()),
        Err(e) => Err(e.to_string()),
    }
}

/// Offline replica kept in the local SQLite database
pub struct SqliteDocumentStore {
    pool: SqlitePool,
}

impl SqliteDocumentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn list_all(&self, collection: &str) -> StoreResult<Vec<MirrorDocument>> {
        let rows = query_as::<_, MirrorDocumentRow>(
            "SELECT doc_key, body FROM mirror_documents WHERE collection = ? ORDER BY doc_key",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from)?;

        let docs = rows
            .into_iter()
            .map(MirrorDocumentRow::into_document)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(docs)
    }

    async fn put(&self, collection: &str, key: &str, body: Document, merge: bool) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(DbError::from)?;

        let merged = if merge {
            let existing: Option<String> =
                sqlx::query_scalar("SELECT body FROM mirror_documents WHERE collection = ? AND doc_key = ?")
                    .bind(collection)
                    .bind(key)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(DbError::from)?;
            match existing {
                Some(raw) => {
                    let mut current = parse_body(&raw)
                        .map_err(|e| DbError::Corrupt(format!("mirror document '{}': {}", key, e)))?;
                    merge_documents(&mut current, body);
                    current
                }
                None => body,
            }
        } else {
            body
        };

        let serialized = serde_json::to_string(&Value::Object(merged))
            .map_err(|e| DbError::Other(format!("Failed to serialize mirror document: {}", e)))?;

        query(
            "INSERT INTO mirror_documents (collection, doc_key, body, written_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(collection, doc_key) DO UPDATE SET body = excluded.body, written_at = excluded.written_at",
        )
        .bind(collection)
        .bind(key)
        .bind(serialized)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(DbError::from)?;

        tx.commit().await.map_err(DbError::from)?;
        Ok(())
    }

    async fn delete(&self, collection: &str, key: &str) -> StoreResult<()> {
        query("DELETE FROM mirror_documents WHERE collection = ? AND doc_key = ?")
            .bind(collection)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;
        Ok(())
    }
}

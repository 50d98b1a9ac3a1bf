use serde::Serialize;
use thiserror::Error;

use crate::domains::sync::types::EntityType;

/// Local database errors (replica documents, promotion journal)
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Connection pool error: {0}")]
    ConnectionPool(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Stored data is corrupt: {0}")]
    Corrupt(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Database error: {0}")]
    Other(String),
}

impl serde::Serialize for DbError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let (kind, message) = match self {
            DbError::Sqlx(err) => ("Sqlx", err.to_string()),
            DbError::ConnectionPool(s) => ("ConnectionPool", s.clone()),
            DbError::Transaction(s) => ("Transaction", s.clone()),
            DbError::Corrupt(s) => ("Corrupt", s.clone()),
            DbError::Migration(s) => ("Migration", s.clone()),
            DbError::Other(s) => ("Other", s.clone()),
        };
        let mut state = serializer.serialize_struct("DbError", 2)?;
        state.serialize_field("type", kind)?;
        state.serialize_field("message", &message)?;
        state.end()
    }
}

/// sqlx::Error is not Clone, so the wrapped variant degrades to `Other`.
impl Clone for DbError {
    fn clone(&self) -> Self {
        match self {
            DbError::Sqlx(err) => DbError::Other(format!("SQLx error: {}", err)),
            DbError::ConnectionPool(s) => DbError::ConnectionPool(s.clone()),
            DbError::Transaction(s) => DbError::Transaction(s.clone()),
            DbError::Corrupt(s) => DbError::Corrupt(s.clone()),
            DbError::Migration(s) => DbError::Migration(s.clone()),
            DbError::Other(s) => DbError::Other(s.clone()),
        }
    }
}

/// Failures reported by a store client (relational API or document replica)
#[derive(Debug, Error, Clone, Serialize)]
pub enum StoreError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Server returned error {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Failed to decode store response: {0}")]
    Decode(String),

    #[error("Local store error: {0}")]
    Database(#[from] DbError),
}

/// Errors raised by the reconciliation engine
#[derive(Debug, Error, Clone, Serialize)]
pub enum SyncError {
    #[error("No connectivity: sync aborted before any store access")]
    NoConnectivity,

    #[error("Sync of {entity_type} failed: {cause}")]
    EntitySyncFailed {
        entity_type: EntityType,
        cause: Box<SyncError>,
    },

    #[error("Relational store returned no usable id when promoting {entity_type} document '{mirror_key}'")]
    IdentityAssignmentFailed {
        entity_type: EntityType,
        mirror_key: String,
    },

    #[error("Store call '{operation}' failed: {source}")]
    Store {
        operation: &'static str,
        source: StoreError,
    },

    #[error("Store call '{operation}' timed out after {after_ms} ms")]
    Timeout {
        operation: &'static str,
        after_ms: u64,
    },

    #[error("Sync cancelled")]
    Cancelled,

    #[error("Promotion journal error: {0}")]
    Journal(#[from] DbError),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl SyncError {
    /// Wrap a task failure with the entity it happened in.
    pub fn entity_failed(entity_type: EntityType, cause: SyncError) -> Self {
        SyncError::EntitySyncFailed {
            entity_type,
            cause: Box::new(cause),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_failure_message_names_entity_and_cause() {
        let err = SyncError::entity_failed(EntityType::User, SyncError::Cancelled);
        assert_eq!(err.to_string(), "Sync of user failed: Sync cancelled");
    }

    #[test]
    fn test_sqlx_error_clone_keeps_message() {
        let err = DbError::Sqlx(sqlx::Error::RowNotFound);
        match err.clone() {
            DbError::Other(msg) => assert!(msg.starts_with("SQLx error:")),
            other => panic!("unexpected clone: {:?}", other),
        }
    }

    #[test]
    fn test_errors_serialize_to_json() {
        let err = SyncError::Store {
            operation: "relational.list",
            source: StoreError::Http { status: 500, body: "boom".to_string() },
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["Store"]["operation"], "relational.list");
        assert_eq!(json["Store"]["source"]["Http"]["status"], 500);
    }
}

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use std::time::Duration;

use crate::errors::{StoreError, StoreResult};
use crate::domains::sync::entity_merger::schema_for;
use crate::domains::sync::types::{Document, EntityType};

/// Operations the engine needs from the authoritative relational backend
#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// All records of one entity type, soft-deleted ones included
    async fn list(&self, entity: EntityType) -> StoreResult<Vec<Document>>;

    /// Create a record; the response carries the assigned id
    async fn create(&self, entity: EntityType, payload: Document) -> StoreResult<Document>;

    /// Partially update the record with the given canonical id
    async fn update(&self, entity: EntityType, id: &str, partial: Document) -> StoreResult<Document>;

    /// Role lookup used to enrich user documents on push
    async fn list_roles(&self) -> StoreResult<Vec<Document>> {
        Ok(Vec::new())
    }
}

/// `RelationalStore` backed by the backend's JSON API
pub struct ApiRelationalStore {
    client: Client,
    base_url: String,
    api_token: Option<String>,
}

impl ApiRelationalStore {
    /// `timeout` bounds the transport; the engine applies its own per-call budget on top.
    pub fn new(base_url: &str, api_token: Option<String>, timeout: Duration) -> StoreResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| StoreError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Collection URL of an entity type, from its schema's REST resource.
    fn resource_url(&self, entity: EntityType) -> String {
        self.url(schema_for(entity).resource)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_token {
            Some(token) => request.header("Authorization", format!("Bearer {}", token)),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> StoreResult<Response> {
        let response = self
            .authorize(request)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| StoreError::Network(format!("Failed to {}: {}", what, e)))?;

        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to get error details".to_string());
            Err(StoreError::Http { status, body })
        }
    }

    async fn read_list(response: Response) -> StoreResult<Vec<Document>> {
        let value = response
            .json::<Value>()
            .await
            .map_err(|e| StoreError::Decode(format!("Failed to parse list response: {}", e)))?;
        documents_from_list(value)
    }

    async fn read_one(response: Response) -> StoreResult<Document> {
        let value = response
            .json::<Value>()
            .await
            .map_err(|e| StoreError::Decode(format!("Failed to parse record response: {}", e)))?;
        document_from_value(value)
    }
}

#[async_trait]
impl RelationalStore for ApiRelationalStore {
    async fn list(&self, entity: EntityType) -> StoreResult<Vec<Document>> {
        let url = self.resource_url(entity);
        debug!("Listing {} records from {}", entity, url);
        let response = self.send(self.client.get(&url), "list records").await?;
        Self::read_list(response).await
    }

    async fn create(&self, entity: EntityType, payload: Document) -> StoreResult<Document> {
        let url = self.resource_url(entity);
        debug!("Creating {} record at {}", entity, url);
        let response = self.send(self.client.post(&url).json(&payload), "create record").await?;
        Self::read_one(response).await
    }

    async fn update(&self, entity: EntityType, id: &str, partial: Document) -> StoreResult<Document> {
        let url = format!("{}/{}", self.resource_url(entity), id);
        debug!("Updating {} record {} at {}", entity, id, url);
        let response = self.send(self.client.put(&url).json(&partial), "update record").await?;
        Self::read_one(response).await
    }

    async fn list_roles(&self) -> StoreResult<Vec<Document>> {
        let response = self.send(self.client.get(self.url("roles")), "list roles").await?;
        Self::read_list(response).await
    }
}

/// Accepts a bare array or a `{"data": [...]}` envelope.
fn documents_from_list(value: Value) -> StoreResult<Vec<Document>> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("data") {
            Some(Value::Array(items)) => items,
            _ => return Err(StoreError::Decode("Expected a JSON array of records".to_string())),
        },
        _ => return Err(StoreError::Decode("Expected a JSON array of records".to_string())),
    };
    items.into_iter().map(document_from_value).collect()
}

/// Accepts a bare object or a `{"data": {...}}` envelope.
fn document_from_value(value: Value) -> StoreResult<Document> {
    match value {
        Value::Object(mut obj) => match obj.remove("data") {
            Some(Value::Object(inner)) => Ok(inner),
            Some(other) => {
                obj.insert("data".to_string(), other);
                Ok(obj)
            }
            None => Ok(obj),
        },
        other => Err(StoreError::Decode(format!("Expected a JSON object, got {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resource_urls_follow_entity_schemas() {
        let store = ApiRelationalStore::new("http://localhost:8000/api", None, Duration::from_secs(5)).unwrap();
        assert_eq!(store.resource_url(EntityType::Problem), "http://localhost:8000/api/problemes");
        assert_eq!(store.resource_url(EntityType::User), "http://localhost:8000/api/utilisateurs");
        assert_eq!(store.resource_url(EntityType::Report), "http://localhost:8000/api/signalements");
    }

    #[test]
    fn test_list_accepts_bare_array_and_envelope() {
        let bare = documents_from_list(json!([{"Id_probleme": 1}, {"Id_probleme": 2}])).unwrap();
        assert_eq!(bare.len(), 2);

        let wrapped = documents_from_list(json!({"data": [{"Id_probleme": 1}]})).unwrap();
        assert_eq!(wrapped[0].get("Id_probleme"), Some(&json!(1)));

        assert!(documents_from_list(json!({"message": "nope"})).is_err());
        assert!(documents_from_list(json!([1, 2])).is_err());
    }

    #[test]
    fn test_single_record_unwraps_envelope() {
        let doc = document_from_value(json!({"data": {"Id_signalement": 9}})).unwrap();
        assert_eq!(doc.get("Id_signalement"), Some(&json!(9)));

        // A scalar `data` field is a regular column, not an envelope.
        let doc = document_from_value(json!({"Id_signalement": 9, "data": "x"})).unwrap();
        assert_eq!(doc.get("data"), Some(&json!("x")));

        assert!(document_from_value(json!("oops")).is_err());
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let store = ApiRelationalStore::new("http://localhost:8000/api/", None, Duration::from_secs(5)).unwrap();
        assert_eq!(store.url("problemes"), "http://localhost:8000/api/problemes");
    }
}

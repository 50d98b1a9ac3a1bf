use async_trait::async_trait;
use chrono::Utc;
use sqlx::{query, query_as, SqlitePool};
use uuid::Uuid;

use crate::errors::{DbError, DbResult};
use crate::domains::sync::types::{EntityType, IdentityPromotion, IdentityPromotionRow};

/// Durable record of identity promotions.
///
/// The relational create and the replica rename are two separate writes; the
/// journal is what lets a later run finish a rename that was interrupted
/// instead of creating the record a second time.
#[async_trait]
pub trait PromotionJournal: Send + Sync {
    /// Pending promotion for a provisional key, if one was started
    async fn find_pending(&self, entity_type: EntityType, provisional_key: &str) -> DbResult<Option<IdentityPromotion>>;

    /// Record the canonical id the relational store assigned
    async fn record_assignment(
        &self,
        entity_type: EntityType,
        provisional_key: &str,
        canonical_id: &str,
    ) -> DbResult<IdentityPromotion>;

    /// Mark a promotion as finished once the replica document carries its canonical key
    async fn mark_completed(&self, id: Uuid) -> DbResult<()>;

    /// All pending promotions of one entity type, oldest first
    async fn list_pending(&self, entity_type: EntityType) -> DbResult<Vec<IdentityPromotion>>;
}

/// SQLite implementation of PromotionJournal
pub struct SqlitePromotionJournal {
    pool: SqlitePool,
}

impl SqlitePromotionJournal {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const PROMOTION_COLUMNS: &str =
    "id, entity_type, provisional_key, canonical_id, assigned_at, completed_at";

#[async_trait]
impl PromotionJournal for SqlitePromotionJournal {
    async fn find_pending(&self, entity_type: EntityType, provisional_key: &str) -> DbResult<Option<IdentityPromotion>> {
        let sql = format!(
            "SELECT {} FROM identity_promotions
             WHERE entity_type = ? AND provisional_key = ? AND completed_at IS NULL
             ORDER BY assigned_at DESC LIMIT 1",
            PROMOTION_COLUMNS
        );
        let row = query_as::<_, IdentityPromotionRow>(&sql)
            .bind(entity_type.as_str())
            .bind(provisional_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::from)?;

        row.map(IdentityPromotion::try_from).transpose()
    }

    async fn record_assignment(
        &self,
        entity_type: EntityType,
        provisional_key: &str,
        canonical_id: &str,
    ) -> DbResult<IdentityPromotion> {
        let promotion = IdentityPromotion::new(entity_type, provisional_key, canonical_id);

        query(
            r#"
            INSERT INTO identity_promotions (
                id, entity_type, provisional_key, canonical_id, assigned_at, completed_at
            ) VALUES (?, ?, ?, ?, ?, NULL)
            "#,
        )
        .bind(promotion.id.to_string())
        .bind(entity_type.as_str())
        .bind(&promotion.provisional_key)
        .bind(&promotion.canonical_id)
        .bind(promotion.assigned_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(DbError::from)?;

        Ok(promotion)
    }

    async fn mark_completed(&self, id: Uuid) -> DbResult<()> {
        let result = query("UPDATE identity_promotions SET completed_at = ? WHERE id = ? AND completed_at IS NULL")
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;

        if result.rows_affected() == 0 {
            log::debug!("Identity promotion {} was already completed", id);
        }
        Ok(())
    }

    async fn list_pending(&self, entity_type: EntityType) -> DbResult<Vec<IdentityPromotion>> {
        let sql = format!(
            "SELECT {} FROM identity_promotions
             WHERE entity_type = ? AND completed_at IS NULL
             ORDER BY assigned_at ASC",
            PROMOTION_COLUMNS
        );
        let rows = query_as::<_, IdentityPromotionRow>(&sql)
            .bind(entity_type.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::from)?;

        rows.into_iter().map(IdentityPromotion::try_from).collect()
    }
}

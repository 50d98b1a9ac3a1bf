use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::errors::{DbError, SyncError, SyncResult};

/// A raw record as exchanged with either store: a JSON object.
pub type Document = Map<String, Value>;

/// The entity types kept in sync between the relational backend and the replica
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Problem,
    User,
    Report,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Problem => "problem",
            EntityType::User => "user",
            EntityType::Report => "report",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = SyncError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "problem" => Ok(EntityType::Problem),
            "user" => Ok(EntityType::User),
            "report" => Ok(EntityType::Report),
            _ => Err(SyncError::Configuration(format!("Invalid EntityType string: {}", s))),
        }
    }
}

/// A document as listed from the replica, with the key it is stored under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorDocument {
    pub key: String,
    pub body: Document,
}

/// Normalized view of one record on either side of the sync.
///
/// Built once at the store boundary by [`EntitySchema`](super::schema::EntitySchema);
/// nothing downstream looks at raw field names again.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRecord {
    /// Identity assigned by the relational store, if it has seen the record.
    pub canonical_id: Option<String>,
    /// Key under which the record lives (or would live) in the replica.
    pub mirror_key: String,
    /// Epoch millis, 0 when unknown.
    pub updated_at: i64,
    pub deleted: bool,
    /// Domain fields without identity, delete flag and write timestamp.
    pub payload: Document,
}

impl SyncRecord {
    /// The id both sides are matched on.
    pub fn lookup_key(&self) -> &str {
        self.canonical_id.as_deref().unwrap_or(&self.mirror_key)
    }

    /// True when the replica document is stored under a key other than the
    /// canonical id it declares.
    pub fn is_alias(&self) -> bool {
        matches!(&self.canonical_id, Some(id) if id != &self.mirror_key)
    }
}

/// Counters for one entity task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySyncStats {
    pub pushed: u32,
    pub pulled: u32,
    pub soft_deleted: u32,
    pub promoted: u32,
    pub aliases_retired: u32,
    /// Replica documents whose derived fields (user roles) were rewritten alone.
    pub roles_refreshed: u32,
    pub tombstones_held: u32,
    pub resurrections_blocked: u32,
    pub unchanged: u32,
    pub skipped_without_id: u32,
}

impl EntitySyncStats {
    /// Writes issued against either store.
    pub fn writes(&self) -> u32 {
        self.pushed + self.pulled + self.soft_deleted + self.promoted + self.aliases_retired + self.roles_refreshed
    }
}

/// Outcome of one entity task inside a run
#[derive(Debug, Clone, Serialize)]
pub struct EntitySyncOutcome {
    pub entity_type: EntityType,
    pub stats: Option<EntitySyncStats>,
    pub error: Option<SyncError>,
}

impl EntitySyncOutcome {
    pub fn succeeded(entity_type: EntityType, stats: EntitySyncStats) -> Self {
        Self { entity_type, stats: Some(stats), error: None }
    }

    pub fn failed(entity_type: EntityType, error: SyncError) -> Self {
        Self { entity_type, stats: None, error: Some(error) }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of a full reconciliation pass
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<EntitySyncOutcome>,
}

impl SyncReport {
    pub fn is_complete_success(&self) -> bool {
        self.outcomes.iter().all(EntitySyncOutcome::is_success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &EntitySyncOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    pub fn total_writes(&self) -> u32 {
        self.outcomes
            .iter()
            .filter_map(|o| o.stats.as_ref())
            .map(EntitySyncStats::writes)
            .sum()
    }
}

/// Journal entry for a replica-originated record promoted to a canonical id.
///
/// Written right after the relational create returns, completed once the
/// replica document has been moved to its canonical key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityPromotion {
    pub id: Uuid,
    pub entity_type: EntityType,
    pub provisional_key: String,
    pub canonical_id: String,
    pub assigned_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl IdentityPromotion {
    pub fn new(entity_type: EntityType, provisional_key: &str, canonical_id: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_type,
            provisional_key: provisional_key.to_string(),
            canonical_id: canonical_id.to_string(),
            assigned_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.completed_at.is_none()
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct IdentityPromotionRow {
    pub id: String,
    pub entity_type: String,
    pub provisional_key: String,
    pub canonical_id: String,
    pub assigned_at: String,
    pub completed_at: Option<String>,
}

fn parse_datetime(raw: &str, field: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::Corrupt(format!("{} '{}': {}", field, raw, e)))
}

impl TryFrom<IdentityPromotionRow> for IdentityPromotion {
    type Error = DbError;
    fn try_from(row: IdentityPromotionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Uuid::parse_str(&row.id)
                .map_err(|e| DbError::Corrupt(format!("identity_promotions.id '{}': {}", row.id, e)))?,
            entity_type: EntityType::from_str(&row.entity_type)
                .map_err(|e| DbError::Corrupt(format!("identity_promotions.entity_type: {}", e)))?,
            provisional_key: row.provisional_key,
            canonical_id: row.canonical_id,
            assigned_at: parse_datetime(&row.assigned_at, "identity_promotions.assigned_at")?,
            completed_at: row
                .completed_at
                .as_deref()
                .map(|raw| parse_datetime(raw, "identity_promotions.completed_at"))
                .transpose()?,
        })
    }
}

/// Where and how the engine reaches the relational backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSettings {
    pub api_endpoint: String,
    #[serde(default)]
    pub api_token: Option<String>,
    /// Per store call, in seconds.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,
    #[serde(default)]
    pub offline_mode_enabled: bool,
}

const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 30;

fn default_connection_timeout() -> u64 {
    DEFAULT_CONNECTION_TIMEOUT_SECS
}

impl ConnectionSettings {
    pub fn new(api_endpoint: &str) -> Self {
        Self {
            api_endpoint: api_endpoint.to_string(),
            api_token: None,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT_SECS,
            offline_mode_enabled: false,
        }
    }

    /// Read settings from the process environment (and a `.env` file if present).
    pub fn from_env() -> SyncResult<Self> {
        let _ = dotenv::dotenv();

        let api_endpoint = std::env::var("ROAD_SYNC_API_URL")
            .map_err(|_| SyncError::Configuration("ROAD_SYNC_API_URL is not set".to_string()))?;
        let api_token = std::env::var("ROAD_SYNC_API_TOKEN").ok().filter(|t| !t.is_empty());
        let connection_timeout = match std::env::var("ROAD_SYNC_CALL_TIMEOUT_SECS") {
            Ok(raw) => raw.parse::<u64>().map_err(|e| {
                SyncError::Configuration(format!("Invalid ROAD_SYNC_CALL_TIMEOUT_SECS '{}': {}", raw, e))
            })?,
            Err(_) => DEFAULT_CONNECTION_TIMEOUT_SECS,
        };
        let offline_mode_enabled = std::env::var("ROAD_SYNC_OFFLINE")
            .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let settings = Self { api_endpoint, api_token, connection_timeout, offline_mode_enabled };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.api_endpoint.trim().is_empty() {
            return Err(SyncError::Configuration("api_endpoint must not be empty".to_string()));
        }
        if self.connection_timeout == 0 {
            return Err(SyncError::Configuration("connection_timeout must be at least 1 second".to_string()));
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout)
    }
}

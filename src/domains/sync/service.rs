use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::errors::{SyncError, SyncResult};
use crate::domains::sync::connectivity::ConnectivityProbe;
use crate::domains::sync::document_store::DocumentStore;
use crate::domains::sync::entity_merger::{schema_for, EntitySyncTask};
use crate::domains::sync::relational_store::RelationalStore;
use crate::domains::sync::repository::PromotionJournal;
use crate::domains::sync::types::{EntitySyncOutcome, EntitySyncStats, EntityType, SyncReport};
use crate::domains::sync::utils::CallBudget;

/// Order entity types are reconciled in. Reports reference problems and users,
/// but nothing is validated across entities; the order only keeps runs predictable.
pub const DEFAULT_PLAN: [EntityType; 3] = [EntityType::Problem, EntityType::User, EntityType::Report];

/// High-level trait for the synchronisation service.
#[async_trait]
pub trait SyncService: Send + Sync {
    /// Reconcile every planned entity type, one after another.
    async fn sync_all(&self) -> SyncResult<SyncReport>;

    /// Reconcile a single entity type.
    async fn sync_entity(&self, entity: EntityType) -> SyncResult<EntitySyncStats>;

    /// Stop the run in progress. In-flight store calls return `Cancelled`.
    fn cancel(&self);
}

/// Runs one `EntitySyncTask` per planned entity type.
pub struct SyncOrchestrator {
    connectivity: Arc<dyn ConnectivityProbe>,
    tasks: Vec<EntitySyncTask>,
    call_timeout: Duration,
    cancel: Mutex<CancellationToken>,
}

impl SyncOrchestrator {
    pub fn new(
        connectivity: Arc<dyn ConnectivityProbe>,
        relational: Arc<dyn RelationalStore>,
        documents: Arc<dyn DocumentStore>,
        journal: Arc<dyn PromotionJournal>,
        call_timeout: Duration,
    ) -> Self {
        Self::with_plan(connectivity, relational, documents, journal, call_timeout, &DEFAULT_PLAN)
    }

    pub fn with_plan(
        connectivity: Arc<dyn ConnectivityProbe>,
        relational: Arc<dyn RelationalStore>,
        documents: Arc<dyn DocumentStore>,
        journal: Arc<dyn PromotionJournal>,
        call_timeout: Duration,
        plan: &[EntityType],
    ) -> Self {
        let tasks = plan
            .iter()
            .map(|entity| {
                EntitySyncTask::new(schema_for(*entity), relational.clone(), documents.clone(), journal.clone())
            })
            .collect();

        Self {
            connectivity,
            tasks,
            call_timeout,
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn plan(&self) -> Vec<EntityType> {
        self.tasks.iter().map(EntitySyncTask::entity_type).collect()
    }

    async fn preflight(&self) -> SyncResult<()> {
        if self.connectivity.is_online().await {
            Ok(())
        } else {
            warn!("Sync skipped: no connectivity");
            Err(SyncError::NoConnectivity)
        }
    }

    /// Budget for a new run. A token tripped by an earlier `cancel()` is replaced.
    fn begin_run(&self) -> CallBudget {
        let mut token = self.cancel.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
        CallBudget::new(self.call_timeout, token.clone())
    }

    async fn run_task(task: &EntitySyncTask, budget: &CallBudget) -> EntitySyncOutcome {
        let entity = task.entity_type();
        match task.run(budget).await {
            Ok(stats) => EntitySyncOutcome::succeeded(entity, stats),
            Err(e) => {
                error!("Sync of {} failed: {}", entity, e);
                EntitySyncOutcome::failed(entity, SyncError::entity_failed(entity, e))
            }
        }
    }
}

#[async_trait]
impl SyncService for SyncOrchestrator {
    async fn sync_all(&self) -> SyncResult<SyncReport> {
        // Taken before the pre-flight await so a cancel issued meanwhile is kept.
        let budget = self.begin_run();
        self.preflight().await?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!("Sync run {} started for {:?}", run_id, self.plan());

        let mut outcomes = Vec::with_capacity(self.tasks.len());
        for task in &self.tasks {
            if budget.is_cancelled() {
                outcomes.push(EntitySyncOutcome::failed(task.entity_type(), SyncError::Cancelled));
                continue;
            }
            outcomes.push(Self::run_task(task, &budget).await);
        }

        let report = SyncReport { run_id, started_at, finished_at: Utc::now(), outcomes };
        let failed = report.failures().count();
        if failed == 0 {
            info!("Sync run {} finished: {} writes", run_id, report.total_writes());
        } else {
            warn!(
                "Sync run {} finished with {} failed entity types, {} writes",
                run_id,
                failed,
                report.total_writes()
            );
        }
        Ok(report)
    }

    async fn sync_entity(&self, entity: EntityType) -> SyncResult<EntitySyncStats> {
        let task = self
            .tasks
            .iter()
            .find(|t| t.entity_type() == entity)
            .ok_or_else(|| SyncError::Configuration(format!("{} is not part of the sync plan", entity)))?;

        let budget = self.begin_run();
        self.preflight().await?;
        task.run(&budget).await.map_err(|e| {
            error!("Sync of {} failed: {}", entity, e);
            SyncError::entity_failed(entity, e)
        })
    }

    fn cancel(&self) {
        info!("Sync cancellation requested");
        self.cancel.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).cancel();
    }
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use lazy_static::lazy_static;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

use crate::domains::sync::connectivity::OfflineModeProbe;
use crate::domains::sync::document_store::SqliteDocumentStore;
use crate::domains::sync::relational_store::ApiRelationalStore;
use crate::domains::sync::repository::SqlitePromotionJournal;
use crate::domains::sync::service::SyncOrchestrator;
use crate::domains::sync::types::ConnectionSettings;
use crate::ffi::error::{FFIError, FFIResult};

// Global state definitions
lazy_static! {
    static ref INIT_MUTEX: tokio::sync::Mutex<()> = tokio::sync::Mutex::new(());
    static ref INITIALIZED: AtomicBool = AtomicBool::new(false);

    static ref DB_POOL: Mutex<Option<SqlitePool>> = Mutex::new(None);
    static ref OFFLINE_MODE: Mutex<bool> = Mutex::new(false);

    static ref SYNC_SERVICE: Mutex<Option<Arc<SyncOrchestrator>>> = Mutex::new(None);
}

// --- Getter Functions ---

pub fn get_db_pool() -> FFIResult<SqlitePool> {
    DB_POOL
        .lock()
        .map_err(|_| FFIError::internal("DB_POOL lock poisoned".to_string()))?
        .clone()
        .ok_or_else(|| FFIError::internal("Database pool not initialized".to_string()))
}

pub fn get_sync_service() -> FFIResult<Arc<SyncOrchestrator>> {
    SYNC_SERVICE
        .lock()
        .map_err(|_| FFIError::internal("SYNC_SERVICE lock poisoned".to_string()))?
        .clone()
        .ok_or_else(|| FFIError::internal("Sync service not initialized".to_string()))
}

pub fn is_offline_mode() -> bool {
    OFFLINE_MODE.lock().map(|guard| *guard).unwrap_or(false)
}

pub fn set_offline_mode(offline: bool) {
    if let Ok(mut guard) = OFFLINE_MODE.lock() {
        *guard = offline;
    }
}

pub fn is_initialized() -> bool {
    INITIALIZED.load(Ordering::Acquire)
}

/// Initialize global state: logging, database, migrations and the sync service.
/// Calling it again after a successful initialization is a no-op.
pub async fn initialize(db_url: &str, settings: ConnectionSettings) -> FFIResult<()> {
    // Acquire the async mutex to ensure single initialization
    let _guard = INIT_MUTEX.lock().await;

    if INITIALIZED.load(Ordering::Acquire) {
        return Ok(());
    }

    let result = initialize_internal(db_url, settings).await;

    // Mark as initialized only if successful
    if result.is_ok() {
        INITIALIZED.store(true, Ordering::Release);
    }

    result
}

async fn initialize_internal(db_url: &str, settings: ConnectionSettings) -> FFIResult<()> {
    init_logging();

    log::info!("Starting internal initialization");
    log::debug!("Database URL: {}", db_url);
    log::debug!("Relational API: {}", settings.api_endpoint);

    settings.validate().map_err(FFIError::from)?;
    set_offline_mode(settings.offline_mode_enabled);

    let options = SqliteConnectOptions::from_str(db_url)
        .map_err(|e| FFIError::invalid_argument(&format!("Invalid database URL: {}", e)))?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(|e| {
            log::error!("Database connection failed: {}", e);
            FFIError::internal(format!("Database connection failed: {}", e))
        })?;

    *DB_POOL
        .lock()
        .map_err(|_| FFIError::internal("DB_POOL lock poisoned".to_string()))? = Some(pool.clone());

    // Run database migrations BEFORE creating services
    crate::db_migration::initialize_database().await.map_err(|e| {
        log::error!("Database initialization failed: {}", e);
        FFIError::from(e)
    })?;

    let relational = ApiRelationalStore::new(&settings.api_endpoint, settings.api_token.clone(), settings.call_timeout())
        .map_err(|e| FFIError::internal(format!("Failed to create relational store client: {}", e)))?;

    let orchestrator = SyncOrchestrator::new(
        Arc::new(OfflineModeProbe),
        Arc::new(relational),
        Arc::new(SqliteDocumentStore::new(pool.clone())),
        Arc::new(SqlitePromotionJournal::new(pool)),
        settings.call_timeout(),
    );

    *SYNC_SERVICE
        .lock()
        .map_err(|_| FFIError::internal("SYNC_SERVICE lock poisoned".to_string()))? = Some(Arc::new(orchestrator));

    log::info!("Initialization complete");
    Ok(())
}

fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        #[cfg(debug_assertions)]
        std::env::set_var("RUST_LOG", "debug");
        #[cfg(not(debug_assertions))]
        std::env::set_var("RUST_LOG", "info");
    }

    // Initialize env_logger if not already initialized
    let _ = env_logger::try_init();
}

use std::sync::Arc;

use domains::sync::service::{SyncOrchestrator, SyncService};
use domains::sync::types::{ConnectionSettings, SyncReport};

// Public modules
pub mod domains;
pub mod errors;
pub mod ffi;
pub mod globals;

// Private modules
mod db_migration;

/// Initialize the library with the given database URL and backend settings.
/// This function must be called before any other function in the library.
pub async fn initialize(db_url: &str, settings: ConnectionSettings) -> ffi::FFIResult<()> {
    globals::initialize(db_url, settings).await
}

/// Set offline mode status
pub fn set_offline_mode(offline_mode: bool) {
    globals::set_offline_mode(offline_mode);
}

/// Check if the app is in offline mode
pub fn is_offline_mode() -> bool {
    globals::is_offline_mode()
}

/// The process-wide sync service
pub fn sync_service() -> ffi::FFIResult<Arc<SyncOrchestrator>> {
    globals::get_sync_service()
}

/// Run one reconciliation pass with the process-wide service
pub async fn sync_now() -> ffi::FFIResult<SyncReport> {
    let service = globals::get_sync_service()?;
    service.sync_all().await.map_err(ffi::error::FFIError::from)
}

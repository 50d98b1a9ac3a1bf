use std::ffi::CString;
use std::os::raw::{c_char, c_int};
use std::str::FromStr;

use crate::domains::sync::service::SyncService;
use crate::domains::sync::types::{ConnectionSettings, EntityType};
use crate::ffi::error::{ErrorCode, FFIError, FFIResult};
use crate::ffi::{block_on_async, guard_json, guard_status, handle_json_result, handle_status_result, required_str};
use crate::globals;

/// Initialize logging, the local database and the sync service.
///
/// `settings_json` may be null, in which case settings are read from the environment.
///
/// # Safety
/// Both pointers must be null or valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn road_sync_initialize(db_url: *const c_char, settings_json: *const c_char) -> c_int {
    guard_status("road_sync_initialize", || {
        handle_status_result(|| {
            let db_url = required_str(db_url, "db_url")?;
            let settings = if settings_json.is_null() {
                ConnectionSettings::from_env()?
            } else {
                let raw = required_str(settings_json, "settings_json")?;
                serde_json::from_str::<ConnectionSettings>(raw)
                    .map_err(|e| FFIError::invalid_argument(&format!("Invalid settings JSON: {}", e)))?
            };
            block_on_async(globals::initialize(db_url, settings))
        })
    })
}

/// Run one reconciliation pass over every entity.
/// Returns a JSON `SyncReport` or `FFIError`; free it with `road_sync_free`.
#[no_mangle]
pub extern "C" fn road_sync_run_all() -> *mut c_char {
    guard_json("road_sync_run_all", || {
        handle_json_result(|| {
            let service = service()?;
            block_on_async(async move { service.sync_all().await.map_err(FFIError::from) })
        })
    })
}

/// Run one entity task by name (`problem`, `user`, `report`).
/// Returns JSON `EntitySyncStats` or `FFIError`; free it with `road_sync_free`.
///
/// # Safety
/// `entity` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn road_sync_run_entity(entity: *const c_char) -> *mut c_char {
    guard_json("road_sync_run_entity", || {
        handle_json_result(|| {
            let name = required_str(entity, "entity")?;
            let entity = EntityType::from_str(name)?;
            let service = service()?;
            block_on_async(async move { service.sync_entity(entity).await.map_err(FFIError::from) })
        })
    })
}

/// Ask the running pass to stop; remaining entity tasks report as interrupted
#[no_mangle]
pub extern "C" fn road_sync_cancel() -> c_int {
    guard_status("road_sync_cancel", || {
        handle_status_result(|| {
            service()?.cancel();
            Ok(())
        })
    })
}

#[no_mangle]
pub extern "C" fn road_sync_set_offline_mode(offline: bool) {
    globals::set_offline_mode(offline);
}

#[no_mangle]
pub extern "C" fn road_sync_is_offline_mode() -> bool {
    globals::is_offline_mode()
}

/// Library version; free it with `road_sync_free`
#[no_mangle]
pub extern "C" fn road_sync_version() -> *mut c_char {
    CString::new(env!("CARGO_PKG_VERSION")).map_or(std::ptr::null_mut(), |s| s.into_raw())
}

/// Free a string returned by this library.
///
/// # Safety
/// `ptr` must be null or a pointer previously returned by a `road_sync_*` function.
#[no_mangle]
pub unsafe extern "C" fn road_sync_free(ptr: *mut c_char) {
    if !ptr.is_null() {
        let _ = CString::from_raw(ptr);
    }
}

fn service() -> FFIResult<std::sync::Arc<crate::domains::sync::service::SyncOrchestrator>> {
    if !globals::is_initialized() {
        return Err(FFIError::not_initialized());
    }
    globals::get_sync_service()
}

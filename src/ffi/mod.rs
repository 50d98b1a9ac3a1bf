use std::ffi::{CStr, CString};
use std::future::Future;
use std::os::raw::{c_char, c_int};
use std::panic::{catch_unwind, UnwindSafe};

use lazy_static::lazy_static;
use serde::Serialize;
use tokio::runtime::Runtime;

use crate::ffi::error::{ErrorCode, FFIError};

pub mod error;
pub mod sync;

pub use error::FFIResult;

lazy_static! {
    // One runtime for every FFI call; the SQLite pool is bound to it.
    static ref RUNTIME: Option<Runtime> = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("road-sync")
        .build()
        .map_err(|e| log::error!("Failed to create Tokio runtime: {}", e))
        .ok();
}

/// Run async code to completion from a blocking FFI entry point
pub fn block_on_async<F, T>(future: F) -> FFIResult<T>
where
    F: Future<Output = FFIResult<T>>,
{
    match RUNTIME.as_ref() {
        Some(runtime) => runtime.block_on(future),
        None => Err(FFIError::internal("Tokio runtime unavailable".to_string())),
    }
}

/// Error handling helper for FFI boundaries (returns error code)
pub fn handle_status_result<F>(func: F) -> c_int
where
    F: FnOnce() -> FFIResult<()>,
{
    match func() {
        Ok(_) => ErrorCode::Success as c_int,
        Err(e) => {
            log::error!("[FFI] {}", e);
            e.code as c_int
        }
    }
}

/// Handles results for FFI functions that return data, serializing Ok(T) or Err(FFIError) to JSON.
/// Returns a pointer to a C string (must be freed by the caller).
pub fn handle_json_result<F, T>(func: F) -> *mut c_char
where
    F: FnOnce() -> FFIResult<T>,
    T: Serialize,
{
    let json_string = match func() {
        Ok(value) => serde_json::to_string(&value),
        Err(ffi_error) => serde_json::to_string(&ffi_error),
    };

    // The caller must always get parseable JSON back
    let final_json = json_string.unwrap_or_else(|e| {
        log::error!("[FFI] Failed to serialize result: {}", e);
        fallback_error_json(&format!("Failed to serialize result: {}", e))
    });

    match CString::new(final_json) {
        Ok(c_string) => c_string.into_raw(),
        Err(e) => {
            log::error!("[FFI] Failed to create CString: {}", e);
            CString::new(fallback_error_json("Failed to create CString"))
                .map_or(std::ptr::null_mut(), |cs| cs.into_raw())
        }
    }
}

/// Run an exported status function, turning a panic into `InternalError`
/// instead of unwinding into the caller.
pub fn guard_status<F>(name: &str, func: F) -> c_int
where
    F: FnOnce() -> c_int + UnwindSafe,
{
    catch_unwind(func).unwrap_or_else(|_| {
        log::error!("[FFI] panic in {}", name);
        ErrorCode::InternalError as c_int
    })
}

/// Run an exported JSON function, turning a panic into a JSON `InternalError`.
pub fn guard_json<F>(name: &str, func: F) -> *mut c_char
where
    F: FnOnce() -> *mut c_char + UnwindSafe,
{
    catch_unwind(func).unwrap_or_else(|_| {
        log::error!("[FFI] panic in {}", name);
        CString::new(fallback_error_json(&format!("panic in {}", name)))
            .map_or(std::ptr::null_mut(), |cs| cs.into_raw())
    })
}

fn fallback_error_json(message: &str) -> String {
    format!(
        "{{\"code\":\"{:?}\",\"message\":{},\"details\":null}}",
        ErrorCode::InternalError,
        serde_json::Value::String(message.to_string())
    )
}

/// Borrow a required C string argument as UTF-8.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string that outlives the returned slice.
pub unsafe fn required_str<'a>(ptr: *const c_char, name: &str) -> FFIResult<&'a str> {
    if ptr.is_null() {
        return Err(FFIError::new(ErrorCode::NullPointer, &format!("Null pointer provided for {}", name)));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|_| FFIError::new(ErrorCode::InvalidUtf8, &format!("Invalid UTF-8 in {}", name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe fn take(ptr: *mut c_char) -> String {
        let s = CStr::from_ptr(ptr).to_str().unwrap().to_string();
        drop(CString::from_raw(ptr));
        s
    }

    #[test]
    fn test_json_result_serializes_value_or_error() {
        let ok = unsafe { take(handle_json_result(|| Ok(vec![1, 2]))) };
        assert_eq!(ok, "[1,2]");

        let err = unsafe { take(handle_json_result::<_, ()>(|| Err(FFIError::invalid_argument("bad")))) };
        let parsed: FFIError = serde_json::from_str(&err).unwrap();
        assert_eq!(parsed.code, ErrorCode::InvalidArgument);
        assert_eq!(parsed.message, "bad");
    }

    #[test]
    fn test_required_str_rejects_null() {
        let err = unsafe { required_str(std::ptr::null(), "db_url") }.unwrap_err();
        assert_eq!(err.code, ErrorCode::NullPointer);

        let owned = CString::new("sqlite::memory:").unwrap();
        assert_eq!(unsafe { required_str(owned.as_ptr(), "db_url") }.unwrap(), "sqlite::memory:");
    }

    #[test]
    fn test_panics_do_not_cross_the_boundary() {
        let code = guard_status("test_status", || -> c_int { panic!("boom") });
        assert_eq!(code, ErrorCode::InternalError as c_int);

        let json = unsafe { take(guard_json("test_json", || -> *mut c_char { panic!("boom") })) };
        let parsed: FFIError = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.code, ErrorCode::InternalError);
        assert!(parsed.message.contains("test_json"));
    }

    #[test]
    fn test_status_result_maps_to_code() {
        assert_eq!(handle_status_result(|| Ok(())), 0);
        assert_eq!(handle_status_result(|| Err(FFIError::not_initialized())), ErrorCode::NotInitialized as c_int);
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{DbError, StoreError, SyncError};

/// Error codes for FFI boundary
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // Success (no error)
    Success = 0,

    // General errors (1-99)
    InvalidArgument = 2,
    NullPointer = 3,
    InvalidUtf8 = 4,
    InternalError = 6,
    NotInitialized = 7,

    // Database errors (100-199)
    DatabaseGeneral = 100,
    DatabaseCorrupt = 101,
    DatabaseConnection = 104,
    DatabaseTransaction = 105,
    DatabaseMigration = 106,

    // Configuration errors (300-399)
    ConfigurationError = 310,

    // Sync errors (400-499)
    SyncGeneral = 400,
    SyncNetworkError = 401,
    SyncAuthenticationFailed = 402,
    SyncServerError = 405,
    SyncDecodeError = 406,
    SyncEntityFailed = 407,
    SyncIdentityAssignment = 408,
    SyncNoConnectivity = 409,
    SyncInterrupted = 410,
    SyncTimeout = 411,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, *self as i32)
    }
}

/// Error type for FFI boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FFIError {
    /// Error code for programmatic handling
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Optional additional details (JSON string)
    pub details: Option<String>,
}

impl fmt::Display for FFIError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(details) = &self.details {
            write!(f, "{}: {} ({})", self.code, self.message, details)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

impl std::error::Error for FFIError {}

impl FFIError {
    pub fn new(code: ErrorCode, message: &str) -> Self {
        Self {
            code,
            message: message.to_string(),
            details: None,
        }
    }

    pub fn with_details(code: ErrorCode, message: &str, details: &str) -> Self {
        Self {
            code,
            message: message.to_string(),
            details: Some(details.to_string()),
        }
    }

    pub fn invalid_argument(message: &str) -> Self {
        Self::new(ErrorCode::InvalidArgument, message)
    }

    // Helper for internal errors
    pub fn internal(message: String) -> Self {
        Self::new(ErrorCode::InternalError, &message)
    }

    pub fn not_initialized() -> Self {
        Self::new(ErrorCode::NotInitialized, "Library not initialized; call road_sync_initialize first")
    }

    /// Replace the message, keeping code and details.
    fn with_context(mut self, message: &str) -> Self {
        self.message = message.to_string();
        self
    }
}

impl From<DbError> for FFIError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Sqlx(sqlx_err) => Self::new(ErrorCode::DatabaseGeneral, &sqlx_err.to_string()),
            DbError::ConnectionPool(msg) => Self::new(ErrorCode::DatabaseConnection, &msg),
            DbError::Transaction(msg) => Self::new(ErrorCode::DatabaseTransaction, &msg),
            DbError::Corrupt(msg) => Self::new(ErrorCode::DatabaseCorrupt, &msg),
            DbError::Migration(msg) => Self::new(ErrorCode::DatabaseMigration, &msg),
            DbError::Other(msg) => Self::new(ErrorCode::DatabaseGeneral, &msg),
        }
    }
}

impl From<StoreError> for FFIError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Network(msg) => Self::new(ErrorCode::SyncNetworkError, &msg),
            StoreError::Http { status, body } => {
                let code = if status == 401 || status == 403 {
                    ErrorCode::SyncAuthenticationFailed
                } else {
                    ErrorCode::SyncServerError
                };
                Self::with_details(
                    code,
                    &format!("Server returned error {}", status),
                    &format!("{{\"status\":{},\"body\":{}}}", status, serde_json::Value::String(body)),
                )
            }
            StoreError::Decode(msg) => Self::new(ErrorCode::SyncDecodeError, &msg),
            StoreError::Database(db_err) => db_err.into(),
        }
    }
}

impl From<SyncError> for FFIError {
    fn from(err: SyncError) -> Self {
        let message = err.to_string();
        let details = serde_json::to_string(&err).ok();
        let code = match &err {
            SyncError::NoConnectivity => ErrorCode::SyncNoConnectivity,
            SyncError::EntitySyncFailed { .. } => ErrorCode::SyncEntityFailed,
            SyncError::IdentityAssignmentFailed { .. } => ErrorCode::SyncIdentityAssignment,
            SyncError::Store { source, .. } => return FFIError::from(source.clone()).with_context(&message),
            SyncError::Timeout { .. } => ErrorCode::SyncTimeout,
            SyncError::Cancelled => ErrorCode::SyncInterrupted,
            SyncError::Journal(db_err) => return FFIError::from(db_err.clone()).with_context(&message),
            SyncError::Configuration(_) => ErrorCode::ConfigurationError,
        };
        match details {
            Some(details) => Self::with_details(code, &message, &details),
            None => Self::new(code, &message),
        }
    }
}

impl From<std::ffi::NulError> for FFIError {
    fn from(_: std::ffi::NulError) -> Self {
        Self::new(ErrorCode::InvalidUtf8, "String contains null bytes, cannot create CString")
    }
}

// Result type alias for FFI functions
pub type FFIResult<T> = Result<T, FFIError>;

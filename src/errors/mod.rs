mod error;

pub use error::{DbError, StoreError, SyncError};

/// Result type for local database operations
pub type DbResult<T> = Result<T, DbError>;

/// Result type for store-client operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

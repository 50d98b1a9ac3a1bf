use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::errors::{StoreResult, SyncError, SyncResult};

/// Timeout and cancellation applied to every store-client call.
#[derive(Debug, Clone)]
pub struct CallBudget {
    timeout: Duration,
    cancel: CancellationToken,
}

impl CallBudget {
    pub fn new(timeout: Duration, cancel: CancellationToken) -> Self {
        Self { timeout, cancel }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Await `call`, giving up when the budget's timeout elapses or the run is
    /// cancelled. `operation` names the call in errors and logs.
    pub async fn run<T, F>(&self, operation: &'static str, call: F) -> SyncResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        tokio::select! {
            _ = self.cancel.cancelled() => {
                log::warn!("{} cancelled", operation);
                Err(SyncError::Cancelled)
            }
            outcome = tokio::time::timeout(self.timeout, call) => match outcome {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(source)) => Err(SyncError::Store { operation, source }),
                Err(_) => {
                    log::error!("{} timed out after {:?}", operation, self.timeout);
                    Err(SyncError::Timeout {
                        operation,
                        after_ms: self.timeout.as_millis() as u64,
                    })
                }
            },
        }
    }
}

/// One-line description of a record decision, for debug logs.
pub fn format_sync_operation(operation: &str, entity_type: &str, key: &str, status: &str) -> String {
    format!("{} {}:{} - {}", operation, entity_type, key, status)
}

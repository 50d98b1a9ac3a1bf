pub mod types;
pub mod time;
pub mod schema;
pub mod tombstone;
pub mod conflict_resolver;
pub mod utils;
pub mod relational_store;
pub mod document_store;
pub mod connectivity;
pub mod repository;
pub mod identity;
pub mod entity_merger;
pub mod service;

#[cfg(test)]
mod mocks;

// Re-exports
pub use types::*;

pub use connectivity::ConnectivityProbe;
pub use document_store::DocumentStore;
pub use relational_store::RelationalStore;
pub use repository::PromotionJournal;
pub use service::{SyncOrchestrator, SyncService, DEFAULT_PLAN};

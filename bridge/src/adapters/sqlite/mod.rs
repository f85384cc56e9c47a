pub mod credentials;
pub mod ledger;
pub mod pool;
pub mod schema;
pub mod sessions;

// Re-export so callers can write `use crate::adapters::sqlite::DbPool`
pub use credentials::SqliteCredentialStore;
pub use ledger::SqliteLedger;
pub use pool::{create_memory_pool, create_pool, DbPool};
pub use sessions::SqliteSessionStore;

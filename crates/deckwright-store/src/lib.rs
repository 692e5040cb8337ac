pub mod backend;
pub mod database;
pub mod error;
pub mod memory;
pub mod retry;
pub mod schema;
pub mod sqlite;
pub mod store;

pub use backend::DocumentBackend;
pub use database::Database;
pub use error::StoreError;
pub use memory::InMemoryBackend;
pub use retry::RetryPolicy;
pub use sqlite::{DocumentSummary, SqliteBackend};
pub use store::{CompositionState, PersistenceStore, StoreConfig};

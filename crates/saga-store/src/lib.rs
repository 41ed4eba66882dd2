//! Durable state owned by the saga orchestrator.
//!
//! Two key-value regions live here: saga records keyed by saga id, and the
//! idempotency ledger of processed message ids. Both are exposed as traits
//! with an in-memory implementation for tests and a SQLite implementation
//! that survives restarts.

pub mod error;
pub mod memory;
pub mod record;
pub mod sqlite;
pub mod state;
pub mod store;

pub use common::{MessageId, SagaId};
pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use record::{SagaRecord, Version};
pub use sqlite::SqliteStore;
pub use state::SagaState;
pub use store::{IdempotencyLedger, SagaStore};

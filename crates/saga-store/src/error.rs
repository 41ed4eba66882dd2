use thiserror::Error;

use crate::{SagaId, Version};

/// Errors that can occur when reading or writing saga state.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The record was written by someone else since it was loaded.
    #[error(
        "Concurrency conflict for saga {saga_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        saga_id: SagaId,
        expected: Version,
        actual: Version,
    },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

use async_trait::async_trait;

use crate::{MessageId, Result, SagaId, SagaRecord};

/// Durable mapping from saga id to saga record.
///
/// Each `put` is atomic for its key; there are no cross-key transactions.
/// The orchestrator only ever touches one record per event, so none are needed.
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Loads a saga record. Returns `None` if the saga does not exist.
    async fn get(&self, saga_id: SagaId) -> Result<Option<SagaRecord>>;

    /// Inserts or updates a record.
    ///
    /// The record's version must match the stored version (0 for a new
    /// record), otherwise the write fails with `ConcurrencyConflict`. On
    /// success the record is stamped with the new version and `updated_at`.
    async fn put(&self, record: &mut SagaRecord) -> Result<()>;

    /// Lists records whose outbox still holds unpublished commands.
    async fn pending(&self) -> Result<Vec<SagaRecord>>;
}

/// Durable set of message ids whose effects have been fully applied.
///
/// Entries are never updated, expired or deleted.
#[async_trait]
pub trait IdempotencyLedger: Send + Sync {
    /// Returns true if the message has already been applied.
    async fn is_processed(&self, message_id: MessageId) -> Result<bool>;

    /// Records the message as applied. Marking twice is a no-op.
    async fn mark_processed(&self, message_id: MessageId) -> Result<()>;
}

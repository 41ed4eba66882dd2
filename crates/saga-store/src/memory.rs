use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    IdempotencyLedger, MessageId, Result, SagaId, SagaRecord, SagaStore, StoreError, Version,
};

/// In-memory saga store and idempotency ledger for testing.
///
/// This implementation keeps everything in memory and provides the same
/// interface as the SQLite implementation.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    sagas: Arc<RwLock<HashMap<SagaId, SagaRecord>>>,
    processed: Arc<RwLock<HashMap<MessageId, DateTime<Utc>>>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of saga records stored.
    pub async fn saga_count(&self) -> usize {
        self.sagas.read().await.len()
    }

    /// Returns the number of ledger entries.
    pub async fn processed_count(&self) -> usize {
        self.processed.read().await.len()
    }
}

#[async_trait]
impl SagaStore for InMemoryStore {
    async fn get(&self, saga_id: SagaId) -> Result<Option<SagaRecord>> {
        Ok(self.sagas.read().await.get(&saga_id).cloned())
    }

    async fn put(&self, record: &mut SagaRecord) -> Result<()> {
        let mut sagas = self.sagas.write().await;

        let actual = sagas
            .get(&record.saga_id())
            .map(|stored| stored.version())
            .unwrap_or(Version::initial());
        if actual != record.version() {
            return Err(StoreError::ConcurrencyConflict {
                saga_id: record.saga_id(),
                expected: record.version(),
                actual,
            });
        }

        record.stamp(actual.next(), Utc::now());
        sagas.insert(record.saga_id(), record.clone());
        Ok(())
    }

    async fn pending(&self) -> Result<Vec<SagaRecord>> {
        let sagas = self.sagas.read().await;
        let mut pending: Vec<_> = sagas
            .values()
            .filter(|record| record.has_pending_commands())
            .cloned()
            .collect();
        pending.sort_by_key(|record| record.updated_at());
        Ok(pending)
    }
}

#[async_trait]
impl IdempotencyLedger for InMemoryStore {
    async fn is_processed(&self, message_id: MessageId) -> Result<bool> {
        Ok(self.processed.read().await.contains_key(&message_id))
    }

    async fn mark_processed(&self, message_id: MessageId) -> Result<()> {
        self.processed
            .write()
            .await
            .entry(message_id)
            .or_insert_with(Utc::now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SagaState;
    use protocol::{CommandKind, OrderRequest, SagaCommand};

    fn new_record() -> SagaRecord {
        SagaRecord::new(SagaId::new(), OrderRequest::new("O1", "U1", 100.0))
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let store = InMemoryStore::new();
        assert!(store.get(SagaId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let store = InMemoryStore::new();
        let mut record = new_record();

        store.put(&mut record).await.unwrap();
        assert_eq!(record.version(), Version::new(1));

        let loaded = store.get(record.saga_id()).await.unwrap().unwrap();
        assert_eq!(loaded, record);
        assert_eq!(store.saga_count().await, 1);
    }

    #[tokio::test]
    async fn test_put_bumps_version_and_updated_at() {
        let store = InMemoryStore::new();
        let mut record = new_record();
        store.put(&mut record).await.unwrap();
        let first_write = record.updated_at();

        record.transition_to(SagaState::PaymentOk);
        store.put(&mut record).await.unwrap();

        assert_eq!(record.version(), Version::new(2));
        assert!(record.updated_at() >= first_write);
    }

    #[tokio::test]
    async fn test_stale_write_is_rejected() {
        let store = InMemoryStore::new();
        let mut record = new_record();
        store.put(&mut record).await.unwrap();

        let mut first = store.get(record.saga_id()).await.unwrap().unwrap();
        let mut second = first.clone();

        first.mark_payment_authorized();
        store.put(&mut first).await.unwrap();

        second.transition_to(SagaState::Failed);
        let result = store.put(&mut second).await;
        assert!(matches!(
            result,
            Err(StoreError::ConcurrencyConflict { expected, actual, .. })
                if expected == Version::new(1) && actual == Version::new(2)
        ));

        let stored = store.get(record.saga_id()).await.unwrap().unwrap();
        assert!(stored.payment_authorized());
        assert_eq!(stored.state(), SagaState::Started);
    }

    #[tokio::test]
    async fn test_pending_lists_only_records_with_outbox() {
        let store = InMemoryStore::new();
        let mut idle = new_record();
        store.put(&mut idle).await.unwrap();

        let mut busy = new_record();
        let order = busy.order().clone();
        busy.queue_commands([SagaCommand::new(CommandKind::AuthorizePayment, order)]);
        store.put(&mut busy).await.unwrap();

        let pending = store.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].saga_id(), busy.saga_id());
    }

    #[tokio::test]
    async fn test_ledger_marks_once() {
        let store = InMemoryStore::new();
        let id = MessageId::new();

        assert!(!store.is_processed(id).await.unwrap());
        store.mark_processed(id).await.unwrap();
        store.mark_processed(id).await.unwrap();

        assert!(store.is_processed(id).await.unwrap());
        assert!(!store.is_processed(MessageId::new()).await.unwrap());
        assert_eq!(store.processed_count().await, 1);
    }
}

use message_bus::Publisher;
use protocol::{CommandKind, OrderRequest, SagaCommand};
use saga_store::{SagaId, SagaRecord, SagaStore};

use crate::dispatch::Dispatcher;
use crate::error::{Result, SagaError};
use crate::locks::SagaLocks;

/// Starts new sagas from validated orders.
///
/// An intake running next to an [`Orchestrator`](crate::Orchestrator) must
/// share its locks: the first worker reply can arrive before the intake has
/// cleared the saga's outbox.
#[derive(Clone)]
pub struct Intake<S, P> {
    dispatcher: Dispatcher<S, P>,
    locks: SagaLocks,
}

impl<S, P> Intake<S, P>
where
    S: SagaStore,
    P: Publisher,
{
    pub fn new(store: S, publisher: P) -> Self {
        Self {
            dispatcher: Dispatcher::new(store, publisher),
            locks: SagaLocks::new(),
        }
    }

    /// Uses the given per-saga locks instead of private ones.
    pub fn with_locks(mut self, locks: SagaLocks) -> Self {
        self.locks = locks;
        self
    }

    /// Validates the order, persists a `STARTED` saga and requests payment.
    ///
    /// If the publish fails the saga stays persisted with `AuthorizePayment`
    /// in its outbox and the broker error is returned; a later recovery pass
    /// will send it.
    #[tracing::instrument(skip(self, order), fields(order_id = %order.order_id))]
    pub async fn start(&self, order: OrderRequest) -> Result<SagaId> {
        validate(&order)?;

        let saga_id = SagaId::new();
        let mut record = SagaRecord::new(saga_id, order.clone());
        let command = SagaCommand::new(CommandKind::AuthorizePayment, order);

        let _guard = self.locks.lock(saga_id).await;
        self.dispatcher.commit(&mut record, vec![command]).await?;

        tracing::info!(%saga_id, "saga started");
        metrics::counter!("saga_started_total").increment(1);
        Ok(saga_id)
    }
}

/// Rejects orders the saga cannot process.
pub fn validate(order: &OrderRequest) -> Result<()> {
    if order.order_id.trim().is_empty() {
        return Err(SagaError::Validation("order_id is required".to_string()));
    }
    if order.user_id.trim().is_empty() {
        return Err(SagaError::Validation("user_id is required".to_string()));
    }
    if !order.amount.is_finite() || order.amount <= 0.0 {
        return Err(SagaError::Validation(
            "amount must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

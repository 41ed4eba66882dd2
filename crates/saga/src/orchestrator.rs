//! Event consumer that drives sagas forward.

use std::future::Future;

use message_bus::{Consumer, Delivery, Publisher};
use protocol::Envelope;
use saga_store::{IdempotencyLedger, SagaState, SagaStore};

use crate::dispatch::Dispatcher;
use crate::engine::{self, Outcome, Transition};
use crate::error::Result;
use crate::locks::SagaLocks;

/// What happened to one inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    /// The saga moved to a new state.
    Applied { from: SagaState, to: SagaState },
    /// A late step result set its flag without moving the saga.
    Recorded { state: SagaState },
    /// Compensation acknowledgement, recorded only.
    Acknowledged,
    /// The event could not move the saga; it was recorded and dropped.
    Stale,
    /// The message id was already in the ledger.
    Duplicate,
    /// No saga with this id exists.
    UnknownSaga,
    /// The message type is not an event this orchestrator knows.
    UnknownType,
    /// The message could not be decoded and was discarded.
    Rejected,
}

/// Consumes worker events and applies them to saga records.
///
/// Per message: check the ledger, apply the engine, persist the record with
/// its outbox, publish the commands, mark the message processed, ack. Any
/// infrastructure failure leaves the delivery unacknowledged so the broker
/// redelivers it; the ledger makes the retry harmless.
pub struct Orchestrator<S, L, P>
where
    S: SagaStore,
    L: IdempotencyLedger,
    P: Publisher,
{
    store: S,
    ledger: L,
    dispatcher: Dispatcher<S, P>,
    locks: SagaLocks,
}

impl<S, L, P> Orchestrator<S, L, P>
where
    S: SagaStore + Clone,
    L: IdempotencyLedger,
    P: Publisher,
{
    /// Creates a new orchestrator.
    pub fn new(store: S, ledger: L, publisher: P) -> Self {
        Self {
            dispatcher: Dispatcher::new(store.clone(), publisher),
            store,
            ledger,
            locks: SagaLocks::new(),
        }
    }

    /// Gets a reference to the saga store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The per-saga locks, for sharing with an in-process [`Intake`](crate::Intake).
    pub fn locks(&self) -> &SagaLocks {
        &self.locks
    }

    /// Republishes commands left in outboxes by an interrupted run.
    ///
    /// Returns the number of sagas whose outbox was flushed.
    #[tracing::instrument(skip(self))]
    pub async fn recover(&self) -> Result<usize> {
        let mut recovered = 0;
        for pending in self.store.pending().await? {
            let _guard = self.locks.lock(pending.saga_id()).await;
            // Re-read under the lock; the snapshot may be outdated.
            let Some(mut record) = self.store.get(pending.saga_id()).await? else {
                continue;
            };
            if !record.has_pending_commands() {
                continue;
            }

            tracing::info!(
                saga_id = %record.saga_id(),
                commands = record.pending_commands().len(),
                "republishing pending commands"
            );
            self.dispatcher.flush(&mut record).await?;
            recovered += 1;
        }
        Ok(recovered)
    }

    /// Consumes deliveries until `shutdown` resolves, the queue closes, or an
    /// infrastructure error occurs.
    pub async fn run(
        &self,
        mut consumer: Consumer,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        tokio::pin!(shutdown);
        tracing::info!(queue = consumer.queue_name(), "orchestrator consuming");

        loop {
            let delivery = tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("orchestrator stopping");
                    return Ok(());
                }
                next = consumer.next() => match next {
                    Some(delivery) => delivery,
                    None => return Ok(()),
                },
            };

            if let Err(e) = self.handle_delivery(delivery).await {
                tracing::error!(error = %e, "event processing failed, stopping consumer");
                return Err(e);
            }
        }
    }

    /// Processes one delivery and settles it.
    ///
    /// Undecodable messages are rejected without requeue. On error the
    /// delivery is dropped unsettled and therefore redelivered.
    pub async fn handle_delivery(&self, delivery: Delivery) -> Result<Handled> {
        let envelope = match Envelope::from_slice(delivery.body()) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, "malformed event envelope");
                metrics::counter!("saga_rejected_messages_total").increment(1);
                delivery.nack(false).await;
                return Ok(Handled::Rejected);
            }
        };

        let handled = self.handle_envelope(&envelope).await?;
        if handled == Handled::Rejected {
            delivery.nack(false).await;
        } else {
            delivery.ack().await;
        }
        Ok(handled)
    }

    /// Applies one decoded envelope.
    #[tracing::instrument(
        skip(self, envelope),
        fields(
            saga_id = %envelope.saga_id,
            message_id = %envelope.message_id,
            event = %envelope.message_type,
        )
    )]
    pub async fn handle_envelope(&self, envelope: &Envelope) -> Result<Handled> {
        let start = std::time::Instant::now();
        let _guard = self.locks.lock(envelope.saga_id).await;

        if self.ledger.is_processed(envelope.message_id).await? {
            tracing::debug!("duplicate event skipped");
            metrics::counter!("saga_duplicate_events_total").increment(1);
            return Ok(Handled::Duplicate);
        }

        let event = match envelope.decode_event() {
            Ok(Some(event)) => event,
            Ok(None) => {
                tracing::warn!("unknown event type ignored");
                metrics::counter!("saga_unknown_events_total").increment(1);
                self.ledger.mark_processed(envelope.message_id).await?;
                return Ok(Handled::UnknownType);
            }
            Err(e) => {
                tracing::warn!(error = %e, "invalid event payload");
                metrics::counter!("saga_rejected_messages_total").increment(1);
                return Ok(Handled::Rejected);
            }
        };

        let Some(record) = self.store.get(envelope.saga_id).await? else {
            tracing::warn!("event for unknown saga");
            self.ledger.mark_processed(envelope.message_id).await?;
            return Ok(Handled::UnknownSaga);
        };

        let Transition {
            mut record,
            commands,
            outcome,
        } = engine::apply(record, &event);

        let handled = match outcome {
            Outcome::Advanced { from, to } => {
                tracing::info!(%from, %to, "saga transition");
                self.dispatcher.commit(&mut record, commands).await?;
                Self::record_terminal(to);
                Handled::Applied { from, to }
            }
            Outcome::Recorded { state } => {
                tracing::info!(%state, commands = commands.len(), "late step result recorded");
                self.dispatcher.commit(&mut record, commands).await?;
                metrics::counter!("saga_late_results_total").increment(1);
                Handled::Recorded { state }
            }
            Outcome::Acknowledged => {
                tracing::info!(order_id = event.order_id(), "compensation acknowledged");
                metrics::counter!(
                    "saga_compensations_acknowledged_total",
                    "event" => event.kind().as_str()
                )
                .increment(1);
                Handled::Acknowledged
            }
            Outcome::Stale { state } => {
                tracing::info!(%state, "stale event ignored");
                metrics::counter!("saga_stale_events_total").increment(1);
                Handled::Stale
            }
        };

        // Leftovers from an interrupted dispatch go out with the next event.
        if record.has_pending_commands() {
            self.dispatcher.flush(&mut record).await?;
        }

        self.ledger.mark_processed(envelope.message_id).await?;

        metrics::counter!(
            "saga_events_processed_total",
            "event" => event.kind().as_str()
        )
        .increment(1);
        metrics::histogram!("saga_event_processing_seconds").record(start.elapsed().as_secs_f64());

        Ok(handled)
    }

    fn record_terminal(state: SagaState) {
        match state {
            SagaState::Completed => metrics::counter!("saga_completed_total").increment(1),
            SagaState::Failed => metrics::counter!("saga_failed_total").increment(1),
            _ => {}
        }
    }
}


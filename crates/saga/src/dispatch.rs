use message_bus::Publisher;
use protocol::{Envelope, SagaCommand};
use saga_store::{SagaRecord, SagaStore};

use crate::error::Result;

/// Persists a record together with its outgoing commands, then publishes them.
///
/// Commands are written to the record's outbox in the same `put` as the
/// state change, published one by one, and only then cleared by a second
/// `put`. A crash between the two writes leaves the outbox populated so
/// that [`Dispatcher::flush`] can republish it on the next start.
#[derive(Clone)]
pub struct Dispatcher<S, P> {
    store: S,
    publisher: P,
}

impl<S, P> Dispatcher<S, P>
where
    S: SagaStore,
    P: Publisher,
{
    pub fn new(store: S, publisher: P) -> Self {
        Self { store, publisher }
    }

    /// Persists `record` with `commands` queued, then flushes the outbox.
    pub async fn commit(&self, record: &mut SagaRecord, commands: Vec<SagaCommand>) -> Result<()> {
        record.queue_commands(commands);
        self.store.put(record).await?;
        self.flush(record).await
    }

    /// Publishes every command in the record's outbox, then clears it.
    ///
    /// Each publish gets a fresh message id. On a publish failure the outbox
    /// stays persisted and the error is returned.
    pub async fn flush(&self, record: &mut SagaRecord) -> Result<()> {
        if !record.has_pending_commands() {
            return Ok(());
        }

        for command in record.pending_commands() {
            let envelope = Envelope::command(record.saga_id(), command)?;
            self.publisher
                .send(command.kind.queue(), envelope.to_vec()?)
                .await?;

            tracing::info!(
                saga_id = %record.saga_id(),
                message_id = %envelope.message_id,
                command = %command.kind,
                queue = command.kind.queue(),
                "command dispatched"
            );
            if command.kind.is_compensation() {
                metrics::counter!(
                    "saga_compensations_issued_total",
                    "command" => command.kind.as_str()
                )
                .increment(1);
            }
        }

        record.take_pending_commands();
        self.store.put(record).await?;
        Ok(())
    }
}

use std::future::Future;
use std::time::Duration;

use message_bus::{Consumer, Delivery, Publisher};
use protocol::{Envelope, routing};

use crate::error::Result;
use crate::handlers::StepHandler;

/// Simulated processing time for forward steps.
pub const DEFAULT_STEP_DELAY: Duration = Duration::from_millis(150);

/// Simulated processing time for compensations.
pub const DEFAULT_COMPENSATION_DELAY: Duration = Duration::from_millis(100);

/// Runs one step handler against a command queue.
///
/// Every recognised command yields exactly one event, broadcast on the
/// events exchange under the command's saga id. The delivery is
/// acknowledged only after that publish succeeds. A handler error puts the
/// command back on its queue.
pub struct CommandWorker<H, P> {
    handler: H,
    publisher: P,
    step_delay: Duration,
    compensation_delay: Duration,
}

impl<H, P> CommandWorker<H, P>
where
    H: StepHandler,
    P: Publisher,
{
    pub fn new(handler: H, publisher: P) -> Self {
        Self {
            handler,
            publisher,
            step_delay: DEFAULT_STEP_DELAY,
            compensation_delay: DEFAULT_COMPENSATION_DELAY,
        }
    }

    /// Overrides the simulated processing delays.
    pub fn with_delays(mut self, step: Duration, compensation: Duration) -> Self {
        self.step_delay = step;
        self.compensation_delay = compensation;
        self
    }

    /// Consumes commands until `shutdown` resolves, the queue closes, or a
    /// publish fails.
    pub async fn run(
        &self,
        mut consumer: Consumer,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        tokio::pin!(shutdown);
        let worker = self.handler.name();
        tracing::info!(worker, queue = consumer.queue_name(), "worker consuming");

        loop {
            let delivery = tokio::select! {
                () = &mut shutdown => {
                    tracing::info!(worker, "worker stopping");
                    return Ok(());
                }
                next = consumer.next() => match next {
                    Some(delivery) => delivery,
                    None => return Ok(()),
                },
            };

            if let Err(e) = self.handle_delivery(delivery).await {
                tracing::error!(worker, error = %e, "command processing failed, stopping worker");
                return Err(e);
            }
        }
    }

    /// Processes and settles one delivery.
    pub async fn handle_delivery(&self, delivery: Delivery) -> Result<()> {
        let worker = self.handler.name();

        let envelope = match Envelope::from_slice(delivery.body()) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(worker, error = %e, "malformed command envelope");
                Self::count(worker, "malformed", "rejected");
                delivery.nack(false).await;
                return Ok(());
            }
        };

        let command = match envelope.decode_command() {
            Ok(Some(command)) => command,
            Ok(None) => {
                tracing::warn!(
                    worker,
                    message_type = %envelope.message_type,
                    "unknown command type ignored"
                );
                Self::count(worker, "unknown", "ignored");
                delivery.ack().await;
                return Ok(());
            }
            Err(e) => {
                tracing::warn!(worker, error = %e, "invalid command payload");
                Self::count(worker, &envelope.message_type, "rejected");
                delivery.nack(false).await;
                return Ok(());
            }
        };

        let delay = if command.kind.is_compensation() {
            self.compensation_delay
        } else {
            self.step_delay
        };
        tokio::time::sleep(delay).await;

        let event = match self.handler.handle(&command).await {
            Ok(Some(event)) => event,
            Ok(None) => {
                tracing::warn!(worker, command = %command.kind, "command not handled by this worker");
                Self::count(worker, command.kind.as_str(), "ignored");
                delivery.ack().await;
                return Ok(());
            }
            Err(e) => {
                tracing::warn!(worker, error = %e, command = %command.kind, "command failed, requeued");
                Self::count(worker, command.kind.as_str(), "retried");
                delivery.nack(true).await;
                return Ok(());
            }
        };

        let reply = Envelope::event(envelope.saga_id, &event)?;
        self.publisher
            .broadcast(routing::EVENTS_EXCHANGE, reply.to_vec()?)
            .await?;

        tracing::info!(
            worker,
            saga_id = %envelope.saga_id,
            command = %command.kind,
            event = %event.kind(),
            "command processed"
        );
        Self::count(worker, command.kind.as_str(), event.kind().as_str());
        delivery.ack().await;
        Ok(())
    }

    fn count(worker: &'static str, command: &str, outcome: &str) {
        metrics::counter!(
            "worker_commands_total",
            "worker" => worker,
            "command" => command.to_string(),
            "outcome" => outcome.to_string()
        )
        .increment(1);
    }
}

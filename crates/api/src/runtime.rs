//! Broker topology, background consumers and shutdown coordination.

use std::future::Future;
use std::sync::Arc;

use message_bus::{BusError, MessageBroker};
use protocol::routing;
use saga::Orchestrator;
use saga_store::{IdempotencyLedger, SagaStore};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use workers::{
    CommandWorker, InMemoryInventoryService, InMemoryPaymentService, InMemoryShippingService,
    InventoryHandler, PaymentHandler, ShippingHandler, StepHandler,
};

use crate::config::Config;

/// Process-wide stop flag. Cloned into every background loop.
#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Asks every loop to stop. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`trigger`](Shutdown::trigger) has been called.
    pub fn wait(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.tx.subscribe();
        async move {
            let _ = rx.wait_for(|stopped| *stopped).await;
        }
    }
}

/// Declares the command queues and binds the orchestrator's event queue to
/// the events exchange.
pub async fn declare_topology<B: MessageBroker>(broker: &B) -> Result<(), BusError> {
    for queue in routing::COMMAND_QUEUES {
        broker.declare_queue(queue).await?;
    }
    broker
        .bind_queue(routing::ORCHESTRATOR_EVENTS_QUEUE, routing::EVENTS_EXCHANGE)
        .await
}

/// The simulated services, configured from the failure flags.
#[derive(Clone, Default)]
pub struct Services {
    pub payment: InMemoryPaymentService,
    pub inventory: InMemoryInventoryService,
    pub shipping: InMemoryShippingService,
}

impl Services {
    pub fn from_config(config: &Config) -> Self {
        let services = Self::default();
        services.payment.set_fail_on_authorize(config.fail_payment);
        services.inventory.set_fail_on_reserve(config.fail_inventory);
        services.shipping.set_fail_on_arrange(config.fail_shipping);
        services
    }
}

/// Starts the three workers on their command queues.
pub async fn spawn_workers<B: MessageBroker>(
    broker: &B,
    services: &Services,
    config: &Config,
    shutdown: &Shutdown,
) -> Result<Vec<JoinHandle<workers::Result<()>>>, BusError> {
    Ok(vec![
        spawn_worker(
            broker,
            routing::PAYMENT_COMMANDS,
            PaymentHandler::new(services.payment.clone()),
            config,
            shutdown,
        )
        .await?,
        spawn_worker(
            broker,
            routing::INVENTORY_COMMANDS,
            InventoryHandler::new(services.inventory.clone()),
            config,
            shutdown,
        )
        .await?,
        spawn_worker(
            broker,
            routing::SHIPPING_COMMANDS,
            ShippingHandler::new(services.shipping.clone()),
            config,
            shutdown,
        )
        .await?,
    ])
}

async fn spawn_worker<H, B>(
    broker: &B,
    queue: &str,
    handler: H,
    config: &Config,
    shutdown: &Shutdown,
) -> Result<JoinHandle<workers::Result<()>>, BusError>
where
    H: StepHandler + 'static,
    B: MessageBroker,
{
    let consumer = broker.consume(queue).await?;
    let worker = CommandWorker::new(handler, broker.clone())
        .with_delays(config.step_delay(), config.compensation_delay());
    let shutdown = shutdown.clone();

    Ok(tokio::spawn(async move {
        let result = worker.run(consumer, shutdown.wait()).await;
        if result.is_err() {
            shutdown.trigger();
        }
        result
    }))
}

/// Starts the orchestrator's event loop. A failure stops the whole process.
pub async fn spawn_orchestrator<S, L, B>(
    orchestrator: Arc<Orchestrator<S, L, B>>,
    broker: &B,
    shutdown: &Shutdown,
) -> Result<JoinHandle<saga::Result<()>>, BusError>
where
    S: SagaStore + Clone + 'static,
    L: IdempotencyLedger + 'static,
    B: MessageBroker,
{
    let consumer = broker.consume(routing::ORCHESTRATOR_EVENTS_QUEUE).await?;
    let shutdown = shutdown.clone();

    Ok(tokio::spawn(async move {
        let result = orchestrator.run(consumer, shutdown.wait()).await;
        if result.is_err() {
            shutdown.trigger();
        }
        result
    }))
}

//! Workers driven through the in-memory broker.

use std::time::Duration;

use message_bus::{Consumer, InMemoryBroker, Publisher};
use protocol::{
    CommandKind, Envelope, EventKind, OrderRequest, SagaCommand, SagaEvent, SagaId, routing,
};
use workers::{
    CommandWorker, InMemoryInventoryService, InMemoryPaymentService, InventoryHandler,
    PaymentHandler, PaymentService,
};

const EVENTS: &str = "test.events";

async fn broker() -> (InMemoryBroker, Consumer) {
    let broker = InMemoryBroker::new();
    broker.declare_queue(routing::PAYMENT_COMMANDS).await;
    broker.declare_queue(routing::INVENTORY_COMMANDS).await;
    broker.bind_queue(EVENTS, routing::EVENTS_EXCHANGE).await;
    let events = broker.consume(EVENTS).await.unwrap();
    (broker, events)
}

async fn send(broker: &InMemoryBroker, saga_id: SagaId, kind: CommandKind) -> Envelope {
    let command = SagaCommand::new(kind, OrderRequest::new("O1", "U1", 100.0));
    let envelope = Envelope::command(saga_id, &command).unwrap();
    broker
        .send(kind.queue(), envelope.to_vec().unwrap())
        .await
        .unwrap();
    envelope
}

fn quick<H: workers::StepHandler>(
    handler: H,
    broker: &InMemoryBroker,
) -> CommandWorker<H, InMemoryBroker> {
    CommandWorker::new(handler, broker.clone()).with_delays(Duration::ZERO, Duration::ZERO)
}

async fn next_event(events: &mut Consumer) -> (Envelope, SagaEvent) {
    let delivery = events.next().await.unwrap();
    let envelope = Envelope::from_slice(delivery.body()).unwrap();
    delivery.ack().await;
    let event = envelope.decode_event().unwrap().unwrap();
    (envelope, event)
}

#[tokio::test]
async fn test_authorize_publishes_one_event_for_the_saga() {
    let (broker, mut events) = broker().await;
    let worker = quick(PaymentHandler::new(InMemoryPaymentService::new()), &broker);
    let mut commands = broker.consume(routing::PAYMENT_COMMANDS).await.unwrap();

    let saga_id = SagaId::new();
    let command = send(&broker, saga_id, CommandKind::AuthorizePayment).await;
    worker
        .handle_delivery(commands.next().await.unwrap())
        .await
        .unwrap();

    let (envelope, event) = next_event(&mut events).await;
    assert_eq!(envelope.saga_id, saga_id);
    assert_eq!(envelope.correlation_id, saga_id);
    assert_ne!(envelope.message_id, command.message_id);
    assert_eq!(event.kind(), EventKind::PaymentAuthorized);

    assert!(events.try_next().is_none());
    assert!(commands.try_next().is_none());
}

#[tokio::test]
async fn test_failing_service_reports_failure_event() {
    let (broker, mut events) = broker().await;
    let inventory = InMemoryInventoryService::new();
    inventory.set_fail_on_reserve(true);
    let worker = quick(InventoryHandler::new(inventory), &broker);
    let mut commands = broker.consume(routing::INVENTORY_COMMANDS).await.unwrap();

    send(&broker, SagaId::new(), CommandKind::ReserveInventory).await;
    worker
        .handle_delivery(commands.next().await.unwrap())
        .await
        .unwrap();

    let (_, event) = next_event(&mut events).await;
    assert_eq!(event.kind(), EventKind::InventoryFailed);
}

#[tokio::test]
async fn test_malformed_command_is_discarded() {
    let (broker, mut events) = broker().await;
    let worker = quick(PaymentHandler::new(InMemoryPaymentService::new()), &broker);
    let mut commands = broker.consume(routing::PAYMENT_COMMANDS).await.unwrap();

    broker
        .send(routing::PAYMENT_COMMANDS, b"{not json".to_vec())
        .await
        .unwrap();
    worker
        .handle_delivery(commands.next().await.unwrap())
        .await
        .unwrap();

    assert!(commands.try_next().is_none());
    assert!(events.try_next().is_none());
}

#[tokio::test]
async fn test_unknown_command_type_is_acked_without_reply() {
    let (broker, mut events) = broker().await;
    let worker = quick(PaymentHandler::new(InMemoryPaymentService::new()), &broker);
    let mut commands = broker.consume(routing::PAYMENT_COMMANDS).await.unwrap();

    let envelope = Envelope::builder()
        .saga_id(SagaId::new())
        .message_type("VoidPayment")
        .payload_raw(serde_json::json!({}))
        .build()
        .unwrap();
    broker
        .send(routing::PAYMENT_COMMANDS, envelope.to_vec().unwrap())
        .await
        .unwrap();
    worker
        .handle_delivery(commands.next().await.unwrap())
        .await
        .unwrap();

    assert!(commands.try_next().is_none());
    assert!(events.try_next().is_none());
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let (broker, mut events) = broker().await;
    let payment = InMemoryPaymentService::new();
    let worker = quick(PaymentHandler::new(payment.clone()), &broker);
    let commands = broker.consume(routing::PAYMENT_COMMANDS).await.unwrap();

    send(&broker, SagaId::new(), CommandKind::AuthorizePayment).await;
    send(&broker, SagaId::new(), CommandKind::RefundPayment).await;

    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        worker
            .run(commands, async move {
                let _ = stopped.await;
            })
            .await
    });

    let (_, first) = next_event(&mut events).await;
    let (_, second) = next_event(&mut events).await;
    assert_eq!(first.kind(), EventKind::PaymentAuthorized);
    assert_eq!(second.kind(), EventKind::PaymentRefunded);

    stop.send(()).unwrap();
    handle.await.unwrap().unwrap();
    assert_eq!(payment.refund_count(), 1);
}

#[tokio::test]
async fn test_failed_compensation_is_requeued() {
    let (broker, mut events) = broker().await;
    let payment = InMemoryPaymentService::new();
    let worker = quick(PaymentHandler::new(payment.clone()), &broker);
    let mut commands = broker.consume(routing::PAYMENT_COMMANDS).await.unwrap();

    let order = OrderRequest::new("O1", "U1", 100.0);
    payment.authorize(&order).await.unwrap();
    payment.set_fail_on_refund(true);

    let saga_id = SagaId::new();
    send(&broker, saga_id, CommandKind::RefundPayment).await;
    worker
        .handle_delivery(commands.next().await.unwrap())
        .await
        .unwrap();

    assert!(events.try_next().is_none());
    assert!(payment.is_charged("O1"));

    payment.set_fail_on_refund(false);
    let retry = commands.try_next().unwrap();
    assert!(retry.is_redelivered());
    worker.handle_delivery(retry).await.unwrap();

    let (envelope, event) = next_event(&mut events).await;
    assert_eq!(envelope.saga_id, saga_id);
    assert_eq!(event.kind(), EventKind::PaymentRefunded);
    assert!(!payment.is_charged("O1"));
    assert_eq!(payment.refund_count(), 1);
}

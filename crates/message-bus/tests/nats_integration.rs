//! NATS JetStream integration tests
//!
//! These tests use a shared NATS container started with JetStream enabled.
//! Each test works on its own stream so they do not see each other's
//! messages. Run with:
//!
//! ```bash
//! cargo test -p message-bus --test nats_integration
//! ```

use std::sync::Arc;
use std::time::Duration;

use message_bus::{Consumer, Delivery, MessageBroker, NatsBroker, Publisher};
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::{ContainerAsync, GenericImage, ImageExt, runners::AsyncRunner};
use tokio::sync::OnceCell;

const WAIT: Duration = Duration::from_secs(10);

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<GenericImage>,
    url: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = GenericImage::new("nats", "2.10")
                .with_exposed_port(4222.tcp())
                .with_wait_for(WaitFor::message_on_stderr("Server is ready"))
                .with_cmd(["-js"])
                .start()
                .await
                .unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(4222).await.unwrap();

            Arc::new(ContainerInfo {
                container,
                url: format!("nats://{}:{}", host, port),
            })
        })
        .await
        .clone()
}

async fn get_test_broker(stream: &str) -> NatsBroker {
    let info = get_container_info().await;
    NatsBroker::connect(&info.url, stream).await.unwrap()
}

async fn next(consumer: &mut Consumer) -> Delivery {
    tokio::time::timeout(WAIT, consumer.next())
        .await
        .expect("timed out waiting for a delivery")
        .expect("consumer closed")
}

async fn assert_empty(consumer: &mut Consumer) {
    let pending = tokio::time::timeout(Duration::from_millis(500), consumer.next()).await;
    assert!(pending.is_err(), "unexpected delivery: {:?}", pending);
}

#[tokio::test]
async fn test_send_and_ack() {
    let broker = get_test_broker("SEND_ACK").await;
    broker.declare_queue("work.commands").await.unwrap();
    let mut consumer = broker.consume("work.commands").await.unwrap();

    broker
        .send("work.commands", b"hello".to_vec())
        .await
        .unwrap();

    let delivery = next(&mut consumer).await;
    assert_eq!(delivery.body(), b"hello");
    assert!(!delivery.is_redelivered());
    delivery.ack().await;

    assert_empty(&mut consumer).await;
}

#[tokio::test]
async fn test_consume_undeclared_queue_fails() {
    let broker = get_test_broker("UNDECLARED").await;
    assert!(broker.consume("nowhere").await.is_err());
}

#[tokio::test]
async fn test_nack_with_requeue_redelivers() {
    let broker = get_test_broker("NACK").await;
    broker.declare_queue("retry").await.unwrap();
    let mut consumer = broker.consume("retry").await.unwrap();
    broker.send("retry", b"again".to_vec()).await.unwrap();

    next(&mut consumer).await.nack(true).await;

    let again = next(&mut consumer).await;
    assert_eq!(again.body(), b"again");
    assert!(again.is_redelivered());
    again.ack().await;
}

#[tokio::test]
async fn test_broadcast_reaches_every_bound_queue() {
    let broker = get_test_broker("FANOUT").await;
    broker.bind_queue("a", "events").await.unwrap();
    broker.bind_queue("b", "events").await.unwrap();
    let mut a = broker.consume("a").await.unwrap();
    let mut b = broker.consume("b").await.unwrap();

    broker.broadcast("events", b"evt".to_vec()).await.unwrap();
    broker.send("b", b"direct".to_vec()).await.unwrap();

    let from_a = next(&mut a).await;
    assert_eq!(from_a.body(), b"evt");
    from_a.ack().await;

    let mut bodies = Vec::new();
    for _ in 0..2 {
        let delivery = next(&mut b).await;
        bodies.push(delivery.body().to_vec());
        delivery.ack().await;
    }
    bodies.sort();
    assert_eq!(bodies, vec![b"direct".to_vec(), b"evt".to_vec()]);
    assert_empty(&mut a).await;
}

#[tokio::test]
async fn test_unsettled_message_survives_broker_restart() {
    let broker = get_test_broker("RESTART").await;
    broker.declare_queue("orders").await.unwrap();
    let mut consumer = broker.consume("orders").await.unwrap();
    broker.send("orders", b"kept".to_vec()).await.unwrap();

    // Handed out, then the process goes away before settling it.
    drop(next(&mut consumer).await);
    drop(consumer);
    drop(broker);

    let restarted = get_test_broker("RESTART").await;
    restarted.declare_queue("orders").await.unwrap();
    let mut consumer = restarted.consume("orders").await.unwrap();

    let delivery = next(&mut consumer).await;
    assert_eq!(delivery.body(), b"kept");
    assert!(delivery.is_redelivered());
    delivery.ack().await;
}

//! NATS JetStream backend.
//!
//! One stream captures every subject under its prefix. A queue `q` is the
//! subject `<prefix>.queue.q`, an exchange `x` is `<prefix>.exchange.x`,
//! and each queue is consumed through a durable pull consumer filtered on
//! its own subject plus the subjects of the exchanges it is bound to. The
//! stream uses limits retention so one broadcast reaches every bound queue.

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream::{self, consumer, stream};
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{BusError, Consumer, MessageBroker, Publisher, Result};

/// Default JetStream stream name.
pub const DEFAULT_STREAM: &str = "SAGA";

/// Unacknowledged deliveries are handed out again after this long.
const ACK_WAIT: Duration = Duration::from_secs(30);

const MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Broker backed by a JetStream stream.
#[derive(Clone)]
pub struct NatsBroker {
    jetstream: jetstream::Context,
    stream: stream::Stream,
    prefix: String,
    /// Queue name to the subjects its consumer filters on.
    bindings: Arc<RwLock<HashMap<String, Vec<String>>>>,
}

impl NatsBroker {
    /// Connects to `url` and creates the stream if it does not exist yet.
    pub async fn connect(url: &str, stream_name: &str) -> Result<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| BusError::Connection(format!("{url}: {e}")))?;
        tracing::info!(url, "connected to NATS");
        Self::with_client(client, stream_name).await
    }

    /// Builds the broker on an existing client connection.
    pub async fn with_client(client: async_nats::Client, stream_name: &str) -> Result<Self> {
        let jetstream = jetstream::new(client);
        let prefix = stream_name.to_ascii_lowercase();
        let stream = jetstream
            .get_or_create_stream(stream::Config {
                name: stream_name.to_string(),
                subjects: vec![format!("{prefix}.>")],
                retention: stream::RetentionPolicy::Limits,
                storage: stream::StorageType::File,
                max_age: MAX_AGE,
                num_replicas: 1,
                ..Default::default()
            })
            .await
            .map_err(|e| BusError::Connection(format!("stream {stream_name}: {e}")))?;
        tracing::info!(stream = stream_name, "jetstream stream ready");

        Ok(Self {
            jetstream,
            stream,
            prefix,
            bindings: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    fn queue_subject(&self, queue: &str) -> String {
        format!("{}.queue.{}", self.prefix, queue)
    }

    fn exchange_subject(&self, exchange: &str) -> String {
        format!("{}.exchange.{}", self.prefix, exchange)
    }

    /// Publishes and waits for the stream to store the message.
    async fn publish(&self, target: &str, subject: String, body: Vec<u8>) -> Result<()> {
        let ack = self
            .jetstream
            .publish(subject, body.into())
            .await
            .map_err(|e| publish_failed(target, e))?;
        ack.await.map_err(|e| publish_failed(target, e))?;
        metrics::counter!("bus_messages_published_total", "target" => target.to_string())
            .increment(1);
        Ok(())
    }
}

fn publish_failed(target: &str, e: impl Display) -> BusError {
    BusError::PublishFailed {
        target: target.to_string(),
        reason: e.to_string(),
    }
}

fn consume_failed(queue: &str, e: impl Display) -> BusError {
    BusError::ConsumeFailed {
        queue: queue.to_string(),
        reason: e.to_string(),
    }
}

/// Durable consumer names may not contain dots.
fn durable_name(queue: &str) -> String {
    queue.replace('.', "_")
}

#[async_trait]
impl MessageBroker for NatsBroker {
    async fn declare_queue(&self, name: &str) -> Result<()> {
        let subject = self.queue_subject(name);
        self.bindings
            .write()
            .await
            .entry(name.to_string())
            .or_insert_with(|| vec![subject]);
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str) -> Result<()> {
        self.declare_queue(queue).await?;
        let subject = self.exchange_subject(exchange);
        let mut bindings = self.bindings.write().await;
        let subjects = bindings.entry(queue.to_string()).or_default();
        if !subjects.contains(&subject) {
            subjects.push(subject);
        }
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<Consumer> {
        let mut subjects = self
            .bindings
            .read()
            .await
            .get(queue)
            .cloned()
            .ok_or_else(|| BusError::UnknownQueue(queue.to_string()))?;

        let durable = durable_name(queue);
        let mut config = consumer::pull::Config {
            durable_name: Some(durable.clone()),
            deliver_policy: consumer::DeliverPolicy::All,
            ack_policy: consumer::AckPolicy::Explicit,
            ack_wait: ACK_WAIT,
            ..Default::default()
        };
        if subjects.len() == 1 {
            config.filter_subject = subjects.remove(0);
        } else {
            config.filter_subjects = subjects;
        }

        let consumer = self
            .stream
            .get_or_create_consumer(&durable, config)
            .await
            .map_err(|e| consume_failed(queue, e))?;
        let messages = consumer
            .messages()
            .await
            .map_err(|e| consume_failed(queue, e))?;

        tracing::debug!(queue, durable = %durable, "jetstream consumer attached");
        Ok(Consumer::nats(queue, messages))
    }
}

#[async_trait]
impl Publisher for NatsBroker {
    async fn send(&self, queue: &str, body: Vec<u8>) -> Result<()> {
        self.publish(queue, self.queue_subject(queue), body).await
    }

    async fn broadcast(&self, exchange: &str, body: Vec<u8>) -> Result<()> {
        self.publish(exchange, self.exchange_subject(exchange), body)
            .await
    }
}

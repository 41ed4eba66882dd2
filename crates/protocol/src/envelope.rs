use chrono::{DateTime, Utc};
use common::{MessageId, SagaId};
use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};
use crate::messages::{CommandKind, EventKind, SagaCommand, SagaEvent};

/// The unit of exchange for both commands and events.
///
/// `correlation_id` and `saga_id` always carry the same value. `occurred_at`
/// is informational only; nothing orders by it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique per emission; the idempotency key.
    pub message_id: MessageId,

    pub correlation_id: SagaId,

    pub saga_id: SagaId,

    /// Command or event type tag (e.g., "ReserveInventory", "PaymentFailed").
    #[serde(rename = "type")]
    pub message_type: String,

    /// Type-specific payload, opaque to anything that does not know `message_type`.
    pub payload: serde_json::Value,

    pub occurred_at: DateTime<Utc>,
}

impl Envelope {
    /// Creates a new envelope builder.
    pub fn builder() -> EnvelopeBuilder {
        EnvelopeBuilder::default()
    }

    /// Wraps a command for the given saga under a fresh message id.
    pub fn command(saga_id: SagaId, command: &SagaCommand) -> Result<Self> {
        Self::builder()
            .saga_id(saga_id)
            .message_type(command.kind.as_str())
            .payload(&command.order)?
            .build()
    }

    /// Wraps an event for the given saga under a fresh message id.
    pub fn event(saga_id: SagaId, event: &SagaEvent) -> Result<Self> {
        Self::builder()
            .saga_id(saga_id)
            .message_type(event.kind().as_str())
            .payload_raw(event.to_payload()?)
            .build()
    }

    /// Parses an envelope from a message body.
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Serializes the envelope into a message body.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes the envelope as a command.
    ///
    /// Returns `Ok(None)` for types outside the command set.
    pub fn decode_command(&self) -> Result<Option<SagaCommand>> {
        let Some(kind) = CommandKind::from_type(&self.message_type) else {
            return Ok(None);
        };
        let order = serde_json::from_value(self.payload.clone()).map_err(|source| {
            ProtocolError::InvalidPayload {
                message_type: self.message_type.clone(),
                source,
            }
        })?;
        Ok(Some(SagaCommand::new(kind, order)))
    }

    /// Decodes the envelope as an event.
    ///
    /// Returns `Ok(None)` for types outside the event set.
    pub fn decode_event(&self) -> Result<Option<SagaEvent>> {
        let Some(kind) = EventKind::from_type(&self.message_type) else {
            return Ok(None);
        };
        SagaEvent::from_payload(kind, self.payload.clone())
            .map(Some)
            .map_err(|source| ProtocolError::InvalidPayload {
                message_type: self.message_type.clone(),
                source,
            })
    }
}

/// Builder for constructing envelopes.
#[derive(Debug, Default)]
pub struct EnvelopeBuilder {
    message_id: Option<MessageId>,
    saga_id: Option<SagaId>,
    message_type: Option<String>,
    payload: Option<serde_json::Value>,
    occurred_at: Option<DateTime<Utc>>,
}

impl EnvelopeBuilder {
    /// Sets the message ID. If not set, a new ID will be generated.
    pub fn message_id(mut self, id: MessageId) -> Self {
        self.message_id = Some(id);
        self
    }

    /// Sets the saga ID, which is also used as the correlation ID.
    pub fn saga_id(mut self, id: SagaId) -> Self {
        self.saga_id = Some(id);
        self
    }

    pub fn message_type(mut self, message_type: impl Into<String>) -> Self {
        self.message_type = Some(message_type.into());
        self
    }

    /// Sets the payload from a serializable value.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    /// Sets the payload from a raw JSON value.
    pub fn payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Sets the timestamp. If not set, the current time will be used.
    pub fn occurred_at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(occurred_at);
        self
    }

    /// Builds the envelope, failing if the saga id, type or payload is missing.
    pub fn build(self) -> Result<Envelope> {
        let saga_id = self.saga_id.ok_or(ProtocolError::MissingField("saga_id"))?;
        Ok(Envelope {
            message_id: self.message_id.unwrap_or_default(),
            correlation_id: saga_id,
            saga_id,
            message_type: self
                .message_type
                .ok_or(ProtocolError::MissingField("type"))?,
            payload: self.payload.ok_or(ProtocolError::MissingField("payload"))?,
            occurred_at: self.occurred_at.unwrap_or_else(Utc::now),
        })
    }
}

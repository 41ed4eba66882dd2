//! Typed commands and events carried inside envelopes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::routing;

/// The order request a saga was started for.
///
/// Carried unchanged as the payload of every command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub order_id: String,
    pub user_id: String,
    pub amount: f64,
}

impl OrderRequest {
    pub fn new(order_id: impl Into<String>, user_id: impl Into<String>, amount: f64) -> Self {
        Self {
            order_id: order_id.into(),
            user_id: user_id.into(),
            amount,
        }
    }
}

/// Command types the orchestrator sends to workers.
///
/// Serialized by variant name, which is also the envelope `message_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    AuthorizePayment,
    ReserveInventory,
    ArrangeShipping,
    RefundPayment,
    ReleaseInventory,
    CancelShipping,
}

impl CommandKind {
    /// Returns the wire tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::AuthorizePayment => "AuthorizePayment",
            CommandKind::ReserveInventory => "ReserveInventory",
            CommandKind::ArrangeShipping => "ArrangeShipping",
            CommandKind::RefundPayment => "RefundPayment",
            CommandKind::ReleaseInventory => "ReleaseInventory",
            CommandKind::CancelShipping => "CancelShipping",
        }
    }

    /// Parses a wire tag. Unknown tags yield `None`.
    pub fn from_type(tag: &str) -> Option<Self> {
        match tag {
            "AuthorizePayment" => Some(CommandKind::AuthorizePayment),
            "ReserveInventory" => Some(CommandKind::ReserveInventory),
            "ArrangeShipping" => Some(CommandKind::ArrangeShipping),
            "RefundPayment" => Some(CommandKind::RefundPayment),
            "ReleaseInventory" => Some(CommandKind::ReleaseInventory),
            "CancelShipping" => Some(CommandKind::CancelShipping),
            _ => None,
        }
    }

    /// The worker queue this command is routed to.
    pub fn queue(&self) -> &'static str {
        match self {
            CommandKind::AuthorizePayment | CommandKind::RefundPayment => {
                routing::PAYMENT_COMMANDS
            }
            CommandKind::ReserveInventory | CommandKind::ReleaseInventory => {
                routing::INVENTORY_COMMANDS
            }
            CommandKind::ArrangeShipping | CommandKind::CancelShipping => {
                routing::SHIPPING_COMMANDS
            }
        }
    }

    /// Returns true for commands that undo a previously successful step.
    pub fn is_compensation(&self) -> bool {
        matches!(
            self,
            CommandKind::RefundPayment | CommandKind::ReleaseInventory | CommandKind::CancelShipping
        )
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A command bound for a worker, decoded from its envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaCommand {
    pub kind: CommandKind,
    pub order: OrderRequest,
}

impl SagaCommand {
    pub fn new(kind: CommandKind, order: OrderRequest) -> Self {
        Self { kind, order }
    }
}

/// Event types workers publish back to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    PaymentAuthorized,
    PaymentFailed,
    InventoryReserved,
    InventoryFailed,
    ShippingArranged,
    ShippingFailed,
    PaymentRefunded,
    InventoryReleased,
    ShippingCancelled,
}

impl EventKind {
    /// Returns the wire tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PaymentAuthorized => "PaymentAuthorized",
            EventKind::PaymentFailed => "PaymentFailed",
            EventKind::InventoryReserved => "InventoryReserved",
            EventKind::InventoryFailed => "InventoryFailed",
            EventKind::ShippingArranged => "ShippingArranged",
            EventKind::ShippingFailed => "ShippingFailed",
            EventKind::PaymentRefunded => "PaymentRefunded",
            EventKind::InventoryReleased => "InventoryReleased",
            EventKind::ShippingCancelled => "ShippingCancelled",
        }
    }

    /// Parses a wire tag. Unknown tags yield `None`.
    pub fn from_type(tag: &str) -> Option<Self> {
        match tag {
            "PaymentAuthorized" => Some(EventKind::PaymentAuthorized),
            "PaymentFailed" => Some(EventKind::PaymentFailed),
            "InventoryReserved" => Some(EventKind::InventoryReserved),
            "InventoryFailed" => Some(EventKind::InventoryFailed),
            "ShippingArranged" => Some(EventKind::ShippingArranged),
            "ShippingFailed" => Some(EventKind::ShippingFailed),
            "PaymentRefunded" => Some(EventKind::PaymentRefunded),
            "InventoryReleased" => Some(EventKind::InventoryReleased),
            "ShippingCancelled" => Some(EventKind::ShippingCancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a successful step or compensation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCompleted {
    pub order_id: String,
    /// Worker-side reference (payment id, reservation id, tracking number).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carrier: Option<String>,
}

impl StepCompleted {
    pub fn new(order_id: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            reference: None,
            carrier: None,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_carrier(mut self, carrier: impl Into<String>) -> Self {
        self.carrier = Some(carrier.into());
        self
    }
}

/// Payload of a failed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailed {
    pub order_id: String,
    #[serde(default)]
    pub reason: String,
}

impl StepFailed {
    pub fn new(order_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            reason: reason.into(),
        }
    }
}

/// An event from a worker, decoded from its envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SagaEvent {
    PaymentAuthorized(StepCompleted),
    PaymentFailed(StepFailed),
    InventoryReserved(StepCompleted),
    InventoryFailed(StepFailed),
    ShippingArranged(StepCompleted),
    ShippingFailed(StepFailed),
    PaymentRefunded(StepCompleted),
    InventoryReleased(StepCompleted),
    ShippingCancelled(StepCompleted),
}

impl SagaEvent {
    /// Returns the event type.
    pub fn kind(&self) -> EventKind {
        match self {
            SagaEvent::PaymentAuthorized(_) => EventKind::PaymentAuthorized,
            SagaEvent::PaymentFailed(_) => EventKind::PaymentFailed,
            SagaEvent::InventoryReserved(_) => EventKind::InventoryReserved,
            SagaEvent::InventoryFailed(_) => EventKind::InventoryFailed,
            SagaEvent::ShippingArranged(_) => EventKind::ShippingArranged,
            SagaEvent::ShippingFailed(_) => EventKind::ShippingFailed,
            SagaEvent::PaymentRefunded(_) => EventKind::PaymentRefunded,
            SagaEvent::InventoryReleased(_) => EventKind::InventoryReleased,
            SagaEvent::ShippingCancelled(_) => EventKind::ShippingCancelled,
        }
    }

    /// Decodes the payload for a known event type.
    pub fn from_payload(kind: EventKind, payload: Value) -> serde_json::Result<Self> {
        Ok(match kind {
            EventKind::PaymentAuthorized => SagaEvent::PaymentAuthorized(decode(payload)?),
            EventKind::PaymentFailed => SagaEvent::PaymentFailed(decode(payload)?),
            EventKind::InventoryReserved => SagaEvent::InventoryReserved(decode(payload)?),
            EventKind::InventoryFailed => SagaEvent::InventoryFailed(decode(payload)?),
            EventKind::ShippingArranged => SagaEvent::ShippingArranged(decode(payload)?),
            EventKind::ShippingFailed => SagaEvent::ShippingFailed(decode(payload)?),
            EventKind::PaymentRefunded => SagaEvent::PaymentRefunded(decode(payload)?),
            EventKind::InventoryReleased => SagaEvent::InventoryReleased(decode(payload)?),
            EventKind::ShippingCancelled => SagaEvent::ShippingCancelled(decode(payload)?),
        })
    }

    /// Encodes the payload as JSON.
    pub fn to_payload(&self) -> serde_json::Result<Value> {
        match self {
            SagaEvent::PaymentAuthorized(data)
            | SagaEvent::InventoryReserved(data)
            | SagaEvent::ShippingArranged(data)
            | SagaEvent::PaymentRefunded(data)
            | SagaEvent::InventoryReleased(data)
            | SagaEvent::ShippingCancelled(data) => serde_json::to_value(data),
            SagaEvent::PaymentFailed(data)
            | SagaEvent::InventoryFailed(data)
            | SagaEvent::ShippingFailed(data) => serde_json::to_value(data),
        }
    }

    /// Returns the order id the event refers to.
    pub fn order_id(&self) -> &str {
        match self {
            SagaEvent::PaymentAuthorized(data)
            | SagaEvent::InventoryReserved(data)
            | SagaEvent::ShippingArranged(data)
            | SagaEvent::PaymentRefunded(data)
            | SagaEvent::InventoryReleased(data)
            | SagaEvent::ShippingCancelled(data) => &data.order_id,
            SagaEvent::PaymentFailed(data)
            | SagaEvent::InventoryFailed(data)
            | SagaEvent::ShippingFailed(data) => &data.order_id,
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(payload: Value) -> serde_json::Result<T> {
    serde_json::from_value(payload)
}

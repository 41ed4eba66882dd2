use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a saga instance.
///
/// The saga id doubles as the correlation id of every command and event
/// exchanged on behalf of that saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SagaId(Uuid);

impl SagaId {
    /// Creates a new random saga ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a saga ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SagaId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SagaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SagaId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for SagaId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<SagaId> for Uuid {
    fn from(id: SagaId) -> Self {
        id.0
    }
}

/// Unique identifier for a single emitted message.
///
/// Every emission gets a fresh one, retries included. The idempotency
/// ledger is keyed on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Creates a new random message ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a message ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for MessageId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saga_id_new_creates_unique_ids() {
        assert_ne!(SagaId::new(), SagaId::new());
    }

    #[test]
    fn test_message_id_new_creates_unique_ids() {
        assert_ne!(MessageId::new(), MessageId::new());
    }

    #[test]
    fn test_saga_id_parses_simple_hex_form() {
        let id: SagaId = "a1b2c3d4e5f60718293a4b5c6d7e8f90".parse().unwrap();
        assert_eq!(id.to_string(), "a1b2c3d4-e5f6-0718-293a-4b5c6d7e8f90");
    }

    #[test]
    fn test_saga_id_serializes_as_plain_string() {
        let id = SagaId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let deserialized: SagaId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, deserialized);
    }

    #[test]
    fn test_message_id_rejects_garbage() {
        assert!("not-a-message-id".parse::<MessageId>().is_err());
    }
}

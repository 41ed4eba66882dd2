//! The saga record: single source of truth for where a transaction stands.

use chrono::{DateTime, Utc};
use protocol::{OrderRequest, SagaCommand};
use serde::{Deserialize, Serialize};

use crate::{SagaId, SagaState};

/// Version number of a saga record, used for optimistic concurrency control.
///
/// A record that was never written is at version 0; every successful `put`
/// bumps it by one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the initial version (0) of an unsaved record.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One saga instance.
///
/// The completion flags record which forward steps actually succeeded. They
/// are historical facts: there is no way to reset one once set. They, and not
/// the state, decide which compensations a failure needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaRecord {
    saga_id: SagaId,
    order: OrderRequest,
    state: SagaState,
    updated_at: DateTime<Utc>,
    payment_authorized: bool,
    inventory_reserved: bool,
    shipping_arranged: bool,
    #[serde(default)]
    version: Version,
    /// Commands decided by the engine but not yet confirmed published.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pending_commands: Vec<SagaCommand>,
}

impl SagaRecord {
    /// Creates an unsaved record in the `Started` state.
    pub fn new(saga_id: SagaId, order: OrderRequest) -> Self {
        Self {
            saga_id,
            order,
            state: SagaState::Started,
            updated_at: Utc::now(),
            payment_authorized: false,
            inventory_reserved: false,
            shipping_arranged: false,
            version: Version::initial(),
            pending_commands: Vec::new(),
        }
    }

    pub fn saga_id(&self) -> SagaId {
        self.saga_id
    }

    /// Returns the order request. It never changes after creation.
    pub fn order(&self) -> &OrderRequest {
        &self.order
    }

    pub fn state(&self) -> SagaState {
        self.state
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn payment_authorized(&self) -> bool {
        self.payment_authorized
    }

    pub fn inventory_reserved(&self) -> bool {
        self.inventory_reserved
    }

    pub fn shipping_arranged(&self) -> bool {
        self.shipping_arranged
    }

    pub fn pending_commands(&self) -> &[SagaCommand] {
        &self.pending_commands
    }

    pub fn has_pending_commands(&self) -> bool {
        !self.pending_commands.is_empty()
    }

    /// Moves to `next` if the state graph allows it.
    ///
    /// Returns false, leaving the record untouched, otherwise.
    pub fn transition_to(&mut self, next: SagaState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        true
    }

    pub fn mark_payment_authorized(&mut self) {
        self.payment_authorized = true;
    }

    pub fn mark_inventory_reserved(&mut self) {
        self.inventory_reserved = true;
    }

    pub fn mark_shipping_arranged(&mut self) {
        self.shipping_arranged = true;
    }

    /// Queues commands in the outbox. They are persisted with the record.
    pub fn queue_commands(&mut self, commands: impl IntoIterator<Item = SagaCommand>) {
        self.pending_commands.extend(commands);
    }

    /// Empties the outbox, returning what it held.
    pub fn take_pending_commands(&mut self) -> Vec<SagaCommand> {
        std::mem::take(&mut self.pending_commands)
    }

    /// Records a successful write. Called by store implementations only.
    pub fn stamp(&mut self, version: Version, updated_at: DateTime<Utc>) {
        self.version = version;
        self.updated_at = updated_at;
    }
}

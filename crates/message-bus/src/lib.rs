//! Message broker seam.
//!
//! The orchestrator and the workers only depend on [`Publisher`] for
//! outbound messages and on [`Delivery`] (ack / nack) for inbound ones.
//! [`MessageBroker`] adds the topology and consumer side so the binary can
//! pick a backend at startup:
//!
//! - [`InMemoryBroker`] keeps queues in the process. Messages survive a
//!   consumer restart but not a process restart.
//! - [`NatsBroker`] maps queues and fanout exchanges onto a NATS JetStream
//!   stream with durable pull consumers, so unsettled messages outlive the
//!   process.
//!
//! Both give at-least-once delivery: a delivery that is dropped without
//! being settled is handed out again flagged as redelivered.

pub mod broker;
pub mod delivery;
pub mod error;
pub mod memory;
pub mod nats;
pub mod publisher;

pub use broker::MessageBroker;
pub use delivery::{Consumer, Delivery};
pub use error::{BusError, Result};
pub use memory::InMemoryBroker;
pub use nats::NatsBroker;
pub use publisher::Publisher;

//! Wire protocol for the order saga.
//!
//! Every command and event travels as a JSON [`Envelope`]. The envelope's
//! `type` tag selects how its payload is decoded; tags outside the closed
//! command/event sets decode to `None` so that newer producers never break
//! older consumers.

pub mod envelope;
pub mod error;
pub mod messages;
pub mod routing;

pub use common::{MessageId, SagaId};
pub use envelope::{Envelope, EnvelopeBuilder};
pub use error::{ProtocolError, Result};
pub use messages::{
    CommandKind, EventKind, OrderRequest, SagaCommand, SagaEvent, StepCompleted, StepFailed,
};

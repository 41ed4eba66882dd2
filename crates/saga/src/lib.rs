//! Saga orchestration for order fulfillment.
//!
//! An order runs through three steps, each performed by a worker that
//! answers with an event:
//! 1. Authorize payment
//! 2. Reserve inventory
//! 3. Arrange shipping
//!
//! The [`engine`] decides transitions, the [`Orchestrator`] applies worker
//! events exactly once per message id, and [`Intake`] starts new sagas.
//! When a step fails, earlier successful steps are compensated in reverse
//! order.

pub mod dispatch;
pub mod engine;
pub mod error;
pub mod intake;
pub mod locks;
pub mod orchestrator;

pub use dispatch::Dispatcher;
pub use engine::{Outcome, Step, Transition, apply};
pub use error::{Result, SagaError};
pub use intake::{Intake, validate};
pub use locks::SagaLocks;
pub use orchestrator::{Handled, Orchestrator};

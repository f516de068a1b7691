//! Domain events and their distribution.
//!
//! - [`Event`]: the contract every aggregate event type implements
//! - [`EventEnvelope`]: stream metadata wrapped around a payload for publication
//! - [`EventBus`]: pub/sub transport (in-memory implementation for tests/dev)
//! - [`execute`]: decide-then-apply helper for running commands without a store

pub mod bus;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::execute;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};

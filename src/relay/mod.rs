//! Event relay: the transactional-outbox poller and the in-process bus it
//! publishes into.

pub mod bus;
pub mod poller;

pub use bus::{ClosureActivationHandler, EventBus, EventHandler, RecordingHandler};
pub use poller::OutboxPoller;

//! Runtime for MQTT discovery devices
//!
//! Ties a [`Device`] to a broker: the [`ConnectionManager`] owns the
//! [`MessageBus`] and tracks broker liveness, the [`Dispatcher`] routes
//! inbound messages, and the [`Scheduler`] runs the single cooperative loop.

mod bus;
mod connection;
mod device;
mod dispatcher;
mod memory;
mod mqtt;
mod scheduler;

pub use bus::{InboundMessage, MessageBus, TransportError};
pub use connection::{
    ConnectionManager, ConnectionState, InvalidTransition, LinkState, PollOutcome, PublishOutcome,
    RetryPolicy, StatusChange,
};
pub use device::{Device, ReadOutcome, StateGroups};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use memory::{MemoryBus, PublishedMessage};
pub use mqtt::{MqttSettings, RumqttBus};
pub use scheduler::{ExitProcess, LoopExit, RestartHandler, Scheduler, RESTART_EXIT_CODE};

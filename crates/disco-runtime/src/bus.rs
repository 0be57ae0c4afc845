//! Message-bus collaborator

use std::fmt;
use thiserror::Error;

/// Transport failures. Always transient from the device's point of view.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("subscribe to {topic} failed: {reason}")]
    Subscribe { topic: String, reason: String },

    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("receive failed: {0}")]
    Receive(String),

    #[error("not connected")]
    NotConnected,
}

/// A message received from the bus
#[derive(Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

impl fmt::Debug for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundMessage")
            .field("topic", &self.topic)
            .field("payload", &String::from_utf8_lossy(&self.payload))
            .finish()
    }
}

/// Publish/subscribe client primitives the device needs
///
/// Implementations are driven from the single run loop; none of the methods
/// are called concurrently.
pub trait MessageBus: Send {
    /// Establish a session with the broker
    fn connect(&mut self) -> Result<(), TransportError>;

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError>;

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), TransportError>;

    /// Take at most one pending inbound message without blocking
    fn poll(&mut self) -> Result<Option<InboundMessage>, TransportError>;
}

impl<B: MessageBus + ?Sized> MessageBus for Box<B> {
    fn connect(&mut self) -> Result<(), TransportError> {
        (**self).connect()
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        (**self).subscribe(topic)
    }

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), TransportError> {
        (**self).publish(topic, payload, retain)
    }

    fn poll(&mut self) -> Result<Option<InboundMessage>, TransportError> {
        (**self).poll()
    }
}

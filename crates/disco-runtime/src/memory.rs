//! In-memory message bus for tests and dry runs
//!
//! Clones share one broker-side state, so a test can hand one clone to the
//! device and keep another to inject messages and inspect what was sent.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::{InboundMessage, MessageBus, TransportError};

/// A message the device sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

impl PublishedMessage {
    /// Payload as text
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Payload parsed as JSON
    pub fn json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_slice(&self.payload)
    }
}

#[derive(Default)]
struct BusState {
    connected: bool,
    connects: usize,
    connect_failures: usize,
    publish_failures: usize,
    publish_attempts: usize,
    poll_failures: usize,
    subscriptions: Vec<String>,
    inbound: VecDeque<InboundMessage>,
    published: Vec<PublishedMessage>,
    echo: bool,
}

/// Scripted in-memory bus
#[derive(Clone, Default)]
pub struct MemoryBus {
    state: Arc<Mutex<BusState>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log every publish at `info`, for dry runs
    pub fn echoing() -> Self {
        let bus = Self::new();
        bus.state().echo = true;
        bus
    }

    fn state(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next `n` connection attempts
    pub fn fail_connects(&self, n: usize) {
        self.state().connect_failures = n;
    }

    /// Fail the next `n` publish attempts
    pub fn fail_publishes(&self, n: usize) {
        self.state().publish_failures = n;
    }

    /// Fail the next `n` polls and drop the session
    pub fn fail_polls(&self, n: usize) {
        self.state().poll_failures = n;
    }

    /// Queue a message as if another client published it. Delivered only
    /// when the topic is subscribed at poll time.
    pub fn inject(&self, topic: impl Into<String>, payload: impl Into<Vec<u8>>) {
        self.state()
            .inbound
            .push_back(InboundMessage::new(topic, payload));
    }

    /// Everything published so far
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state().published.clone()
    }

    /// Drain the published log
    pub fn take_published(&self) -> Vec<PublishedMessage> {
        std::mem::take(&mut self.state().published)
    }

    pub fn publish_attempts(&self) -> usize {
        self.state().publish_attempts
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.state().subscriptions.clone()
    }

    pub fn connects(&self) -> usize {
        self.state().connects
    }

    pub fn is_connected(&self) -> bool {
        self.state().connected
    }
}

impl MessageBus for MemoryBus {
    fn connect(&mut self) -> Result<(), TransportError> {
        let mut state = self.state();
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(TransportError::Connect("scripted failure".to_string()));
        }
        state.connected = true;
        state.connects += 1;
        // a fresh session starts without subscriptions
        state.subscriptions.clear();
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        let mut state = self.state();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        if !state.subscriptions.iter().any(|t| t == topic) {
            state.subscriptions.push(topic.to_string());
        }
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), TransportError> {
        let mut state = self.state();
        state.publish_attempts += 1;
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        if state.publish_failures > 0 {
            state.publish_failures -= 1;
            return Err(TransportError::Publish {
                topic: topic.to_string(),
                reason: "scripted failure".to_string(),
            });
        }

        if state.echo {
            info!(topic, retain, payload = %String::from_utf8_lossy(payload), "Publish");
        }
        state.published.push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            retain,
        });
        Ok(())
    }

    fn poll(&mut self) -> Result<Option<InboundMessage>, TransportError> {
        let mut state = self.state();
        if state.poll_failures > 0 {
            state.poll_failures -= 1;
            state.connected = false;
            return Err(TransportError::Receive("scripted failure".to_string()));
        }
        if !state.connected {
            return Err(TransportError::NotConnected);
        }

        while let Some(message) = state.inbound.pop_front() {
            if state.subscriptions.iter().any(|t| *t == message.topic) {
                return Ok(Some(message));
            }
            debug!(topic = %message.topic, "Dropping message on unsubscribed topic");
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_requires_connection() {
        let mut bus = MemoryBus::new();
        assert_eq!(bus.publish("t", b"x", false), Err(TransportError::NotConnected));

        bus.connect().unwrap();
        bus.publish("t", b"x", true).unwrap();
        let published = bus.published();
        assert_eq!(published.len(), 1);
        assert!(published[0].retain);
        assert_eq!(published[0].text(), "x");
    }

    #[test]
    fn test_inject_only_delivers_subscribed() {
        let mut bus = MemoryBus::new();
        bus.connect().unwrap();
        bus.subscribe("a/set").unwrap();

        bus.inject("b/set", "ON");
        bus.inject("a/set", "OFF");
        let message = bus.poll().unwrap().unwrap();
        assert_eq!(message.topic, "a/set");
        assert_eq!(message.payload, b"OFF");
        assert_eq!(bus.poll().unwrap(), None);
    }

    #[test]
    fn test_scripted_failures() {
        let mut bus = MemoryBus::new();
        bus.fail_connects(1);
        assert!(bus.connect().is_err());
        bus.connect().unwrap();

        bus.fail_publishes(1);
        assert!(bus.publish("t", b"1", false).is_err());
        assert!(bus.publish("t", b"2", false).is_ok());
        assert_eq!(bus.publish_attempts(), 2);

        bus.fail_polls(1);
        assert!(bus.poll().is_err());
        assert!(!bus.is_connected());
    }

    #[test]
    fn test_clones_share_state() {
        let probe = MemoryBus::new();
        let mut bus = probe.clone();
        bus.connect().unwrap();
        bus.publish("t", b"x", false).unwrap();
        assert_eq!(probe.take_published().len(), 1);
        assert!(probe.published().is_empty());
    }
}

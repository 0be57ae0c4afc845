//! Broker connection lifecycle
//!
//! ```text
//! Disconnected → Connecting → Connected ⇄ BrokerDown
//!                    ↑            │           │
//!                    └────────────┴───────────┘  (transport lost)
//! ```
//!
//! The manager exclusively owns the bus. Connecting never gives up; a publish
//! is retried a bounded number of times and then abandoned, at which point the
//! broker is considered down until it announces itself on the status topic.

use std::fmt;
use std::time::Duration;

use disco_core::{BrokerStatus, SharedClock};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::{InboundMessage, MessageBus};

/// Link state of the broker connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Session is up but the broker announced itself offline, or publishes
    /// kept failing
    BrokerDown,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::BrokerDown => "broker_down",
        };
        f.write_str(s)
    }
}

/// Error when an invalid link transition is attempted
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Invalid link transition from {from} to {to}: {reason}")]
pub struct InvalidTransition {
    pub from: LinkState,
    pub to: LinkState,
    pub reason: &'static str,
}

impl LinkState {
    /// Attempt a transition to a new state
    pub fn try_transition(self, to: LinkState) -> Result<LinkState, InvalidTransition> {
        use LinkState::*;

        let valid = match (self, to) {
            (Disconnected, Connecting) => true,
            (Connecting, Connected) => true,
            (Connected, BrokerDown) => true,
            (BrokerDown, Connected) => true,
            // transport lost, start over
            (Connected, Connecting) => true,
            (BrokerDown, Connecting) => true,
            _ => false,
        };

        if valid {
            Ok(to)
        } else {
            Err(InvalidTransition {
                from: self,
                to,
                reason: Self::transition_error_reason(self, to),
            })
        }
    }

    /// Check if a transition is valid without performing it
    pub fn can_transition_to(self, to: LinkState) -> bool {
        self.try_transition(to).is_ok()
    }

    fn transition_error_reason(from: LinkState, to: LinkState) -> &'static str {
        use LinkState::*;

        match (from, to) {
            (Disconnected, Connected) => "Cannot jump to Connected - must go through Connecting",
            (Disconnected, BrokerDown) => "No session to mark down",
            (Connecting, BrokerDown) => "Connect must complete first",
            (_, Disconnected) => "Sessions are re-established, never dropped",
            _ => "Invalid link transition",
        }
    }

    /// Whether a session with the broker exists
    pub fn has_session(self) -> bool {
        matches!(self, Self::Connected | Self::BrokerDown)
    }
}

/// Failure counters and liveness
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub broker_alive: bool,
    pub connection_failure_count: u32,
    pub read_failure_count: u32,
}

/// Backoff and threshold settings
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Pause between connection attempts
    pub connect_interval: Duration,
    /// Pause between publish attempts
    pub publish_backoff: Duration,
    /// Retries after the first failed publish attempt
    pub publish_retries: u32,
    /// Skipped reads tolerated while the broker is down before a restart
    pub read_failure_reset_threshold: u32,
    /// Sleep at the end of every loop iteration
    pub idle_sleep: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            connect_interval: Duration::from_secs(5),
            publish_backoff: Duration::from_secs(1),
            publish_retries: 3,
            read_failure_reset_threshold: 10,
            idle_sleep: Duration::from_millis(50),
        }
    }
}

/// Result of a publish request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Sent,
    /// Every attempt failed; the broker is now considered down
    Abandoned,
    /// Not attempted because the broker is down or there is no session
    Skipped,
}

/// Effect of a status-topic message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    Unchanged,
    WentDown,
    /// Broker is back; retained discovery state may be gone
    CameBack,
}

/// Result of a single poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Message(InboundMessage),
    Idle,
    /// The transport failed and a fresh session was established
    Reconnected,
}

/// Owns the bus and tracks broker liveness
pub struct ConnectionManager {
    bus: Box<dyn MessageBus>,
    clock: SharedClock,
    policy: RetryPolicy,
    status_topic: String,
    link: LinkState,
    state: ConnectionState,
    /// Topics restored on every new session, status topic first
    subscriptions: Vec<String>,
}

impl ConnectionManager {
    pub fn new(
        bus: Box<dyn MessageBus>,
        clock: SharedClock,
        policy: RetryPolicy,
        status_topic: impl Into<String>,
    ) -> Self {
        let status_topic = status_topic.into();
        Self {
            bus,
            clock,
            policy,
            subscriptions: vec![status_topic.clone()],
            status_topic,
            link: LinkState::Disconnected,
            state: ConnectionState::default(),
        }
    }

    pub fn link(&self) -> LinkState {
        self.link
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn status_topic(&self) -> &str {
        &self.status_topic
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn is_connected(&self) -> bool {
        self.link == LinkState::Connected
    }

    pub fn subscriptions(&self) -> &[String] {
        &self.subscriptions
    }

    fn enter(&mut self, to: LinkState) {
        match self.link.try_transition(to) {
            Ok(next) => {
                debug!(from = %self.link, to = %next, "Link transition");
                self.link = next;
            }
            Err(err) => warn!(%err, "Ignoring link transition"),
        }
    }

    /// Establish a session, retrying until it succeeds
    ///
    /// Every known subscription is restored before the link counts as
    /// connected.
    #[instrument(skip(self), fields(status_topic = %self.status_topic))]
    pub fn connect(&mut self) {
        self.enter(LinkState::Connecting);

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.open_session() {
                Ok(()) => break,
                Err(err) => {
                    warn!(%err, attempt, retry_in = ?self.policy.connect_interval, "Connect failed");
                    self.clock.sleep(self.policy.connect_interval);
                }
            }
        }

        self.state.connection_failure_count = 0;
        self.state.read_failure_count = 0;
        self.state.broker_alive = true;
        self.enter(LinkState::Connected);
        info!(attempts = attempt, subscriptions = self.subscriptions.len(), "Connected to broker");
    }

    fn open_session(&mut self) -> Result<(), crate::TransportError> {
        self.bus.connect()?;
        for topic in &self.subscriptions {
            self.bus.subscribe(topic)?;
            debug!(topic = %topic, "Subscribed");
        }
        Ok(())
    }

    /// Remember a topic and subscribe to it now if a session exists
    pub fn add_subscription(&mut self, topic: &str) {
        if self.subscriptions.iter().any(|t| t == topic) {
            return;
        }
        self.subscriptions.push(topic.to_string());

        if self.link.has_session() {
            if let Err(err) = self.bus.subscribe(topic) {
                // restored with the next session
                warn!(%err, topic, "Subscribe failed");
            }
        }
    }

    /// Publish with bounded retries
    ///
    /// Skipped outright unless connected. Each failure bumps the failure
    /// counter; a success resets it. When every attempt fails the payload is
    /// dropped and the broker is marked down.
    #[instrument(skip(self, payload), fields(bytes = payload.len()))]
    pub fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> PublishOutcome {
        if self.link != LinkState::Connected {
            debug!(link = %self.link, "Publish skipped");
            return PublishOutcome::Skipped;
        }

        let attempts = self.policy.publish_retries.saturating_add(1);
        for attempt in 1..=attempts {
            match self.bus.publish(topic, payload, retain) {
                Ok(()) => {
                    if self.state.connection_failure_count > 0 {
                        info!(
                            failures = self.state.connection_failure_count,
                            "Publish recovered"
                        );
                    }
                    self.state.connection_failure_count = 0;
                    return PublishOutcome::Sent;
                }
                Err(err) => {
                    self.state.connection_failure_count += 1;
                    warn!(%err, attempt, attempts, "Publish failed");
                    if attempt < attempts {
                        self.clock.sleep(self.policy.publish_backoff);
                    }
                }
            }
        }

        error!(attempts, "Publish abandoned, marking broker down");
        self.mark_down();
        PublishOutcome::Abandoned
    }

    fn mark_down(&mut self) {
        self.state.broker_alive = false;
        self.enter(LinkState::BrokerDown);
    }

    /// Apply a birth/last-will announcement
    ///
    /// `online` only matters while the broker is down; a retained `online`
    /// seen right after subscribing changes nothing.
    pub fn handle_status(&mut self, status: BrokerStatus) -> StatusChange {
        match (status, self.link) {
            (BrokerStatus::Offline, LinkState::Connected) => {
                warn!("Broker announced offline");
                self.mark_down();
                StatusChange::WentDown
            }
            (BrokerStatus::Online, LinkState::BrokerDown) => {
                info!(
                    skipped_reads = self.state.read_failure_count,
                    "Broker back online"
                );
                self.state.broker_alive = true;
                self.state.read_failure_count = 0;
                self.enter(LinkState::Connected);
                StatusChange::CameBack
            }
            (status, link) => {
                debug!(%status, %link, "Status unchanged");
                StatusChange::Unchanged
            }
        }
    }

    /// Take at most one inbound message
    ///
    /// A transport error re-runs the connect loop.
    pub fn poll(&mut self) -> PollOutcome {
        if !self.link.has_session() {
            return PollOutcome::Idle;
        }

        match self.bus.poll() {
            Ok(Some(message)) => PollOutcome::Message(message),
            Ok(None) => PollOutcome::Idle,
            Err(err) => {
                warn!(%err, "Transport lost, reconnecting");
                self.connect();
                PollOutcome::Reconnected
            }
        }
    }

    /// Count a read skipped because the broker is down
    ///
    /// Returns true once the count reaches the reset threshold.
    pub fn record_skipped_read(&mut self) -> bool {
        self.state.read_failure_count += 1;
        let count = self.state.read_failure_count;
        let threshold = self.policy.read_failure_reset_threshold;
        debug!(count, threshold, "Read skipped, broker down");
        count >= threshold
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("link", &self.link)
            .field("state", &self.state)
            .field("status_topic", &self.status_topic)
            .field("subscriptions", &self.subscriptions)
            .finish()
    }
}

//! Core types for MQTT discovery devices
//!
//! This crate provides the vocabulary shared by every other crate in the
//! workspace: entity names, integration kinds, signatures, the topic scheme,
//! device identity and the discovery payload wire format.

mod clock;
mod device;
mod discovery;
mod integration;
mod name;
mod signature;
mod status;
pub mod topics;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use device::{DeviceInfo, DevicePayload};
pub use discovery::{DiscoveryConfig, DiscoveryPayload};
pub use integration::IntegrationKind;
pub use name::{EntityName, EntityNameError};
pub use signature::{Readings, Signature, SignatureEntry, ValueTransform, ValueTransformError};
pub use status::{BrokerStatus, UnknownBrokerStatus};
pub use topics::TopicScheme;

/// Default namespace root for all discovery topics
pub const DEFAULT_DISCOVERY_PREFIX: &str = "homeassistant";

/// Default well-known topic carrying the controller's birth and last-will messages
pub const DEFAULT_STATUS_TOPIC: &str = "homeassistant/status";

/// Payload literal for a switched-on state or command
pub const PAYLOAD_ON: &str = "ON";

/// Payload literal for a switched-off state or command
pub const PAYLOAD_OFF: &str = "OFF";

/// Render a boolean as the `ON`/`OFF` state literal
pub fn on_off(state: bool) -> &'static str {
    if state {
        PAYLOAD_ON
    } else {
        PAYLOAD_OFF
    }
}

//! Device identity and the device block of discovery payloads

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{IntegrationKind, TopicScheme};

/// Identity of the physical device all entities belong to
///
/// Created once at startup. The UID and name never change afterwards.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    uid: String,
    name: String,
    /// Suggested area reported to the controller
    pub location: Option<String>,
    discovery_prefix: String,
    /// Time between scheduled reads
    pub interval: Duration,
    /// Manufacturer reported to the controller
    pub manufacturer: String,
    /// Model reported to the controller, defaults to the device name
    pub model: Option<String>,
    /// Firmware version reported to the controller
    pub sw_version: String,
}

impl DeviceInfo {
    /// Create a device identity with default metadata
    pub fn new(
        uid: impl Into<String>,
        name: impl Into<String>,
        discovery_prefix: impl Into<String>,
    ) -> Self {
        Self {
            uid: uid.into(),
            name: name.into(),
            location: None,
            discovery_prefix: discovery_prefix.into(),
            interval: Duration::from_secs(5),
            manufacturer: "disco".to_string(),
            model: None,
            sw_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Set the location
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Set the scheduled read interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// The stable device identifier
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// The display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The discovery prefix
    pub fn discovery_prefix(&self) -> &str {
        &self.discovery_prefix
    }

    /// Topic scheme for this device
    pub fn topics(&self) -> TopicScheme {
        TopicScheme::new(&self.discovery_prefix, &self.uid)
    }

    /// The device-level state topic all readable entities funnel onto
    pub fn state_topic(&self) -> String {
        self.topics().state(IntegrationKind::Sensor)
    }

    /// Device block embedded in every discovery payload
    pub fn payload(&self) -> DevicePayload {
        DevicePayload {
            identifiers: vec![self.uid.clone()],
            name: self.name.clone(),
            sw_version: self.sw_version.clone(),
            model: self.model.clone().unwrap_or_else(|| self.name.clone()),
            manufacturer: self.manufacturer.clone(),
            suggested_area: self.location.clone(),
        }
    }
}

/// Device registry information for the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevicePayload {
    pub identifiers: Vec<String>,
    pub name: String,
    pub sw_version: String,
    pub model: String,
    pub manufacturer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_area: Option<String>,
}

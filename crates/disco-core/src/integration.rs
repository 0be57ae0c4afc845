//! Integration kinds understood by the controller's discovery convention

use serde::{Deserialize, Serialize};
use std::fmt;

/// The integration (platform) an entity is discovered under
///
/// The integration is the second level of every discovery and command topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationKind {
    /// Read-only value
    Sensor,
    /// Read-only on/off value (buttons, presence detectors)
    BinarySensor,
    /// Controllable on/off output
    Switch,
    /// Controllable output with optional intensity
    Light,
}

impl IntegrationKind {
    /// Topic segment for this integration
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sensor => "sensor",
            Self::BinarySensor => "binary_sensor",
            Self::Switch => "switch",
            Self::Light => "light",
        }
    }

    /// Whether entities of this integration accept commands
    pub fn is_commandable(&self) -> bool {
        matches!(self, Self::Switch | Self::Light)
    }
}

impl fmt::Display for IntegrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_segments() {
        assert_eq!(IntegrationKind::Sensor.as_str(), "sensor");
        assert_eq!(IntegrationKind::BinarySensor.as_str(), "binary_sensor");
        assert_eq!(IntegrationKind::Switch.to_string(), "switch");
        assert_eq!(IntegrationKind::Light.to_string(), "light");
    }

    #[test]
    fn test_commandable() {
        assert!(IntegrationKind::Switch.is_commandable());
        assert!(IntegrationKind::Light.is_commandable());
        assert!(!IntegrationKind::Sensor.is_commandable());
        assert!(!IntegrationKind::BinarySensor.is_commandable());
    }

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&IntegrationKind::BinarySensor).unwrap();
        assert_eq!(json, "\"binary_sensor\"");
    }
}

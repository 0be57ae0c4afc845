//! Discovery payload wire format

use serde::{Deserialize, Serialize};

use crate::DevicePayload;

/// JSON body of one retained discovery-config message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryPayload {
    pub unique_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    pub force_update: bool,
    pub device: DevicePayload,
    pub state_topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_template: Option<String>,
    /// Present only for commandable entities
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_topic: Option<String>,
    /// Entity-specific fields merged verbatim
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A discovery payload together with the topic it is published on
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryConfig {
    pub topic: String,
    pub payload: DiscoveryPayload,
}

impl DiscoveryConfig {
    /// Serialize the payload for publishing
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn device() -> DevicePayload {
        DevicePayload {
            identifiers: vec!["abc".to_string()],
            name: "PicoTest".to_string(),
            sw_version: "0.1.1".to_string(),
            model: "PicoTest".to_string(),
            manufacturer: "disco".to_string(),
            suggested_area: None,
        }
    }

    #[test]
    fn test_optional_fields_skipped() {
        let payload = DiscoveryPayload {
            unique_id: "abc_temp".to_string(),
            name: "temp".to_string(),
            icon: None,
            force_update: true,
            device: device(),
            state_topic: "homeassistant/sensor/abc/state".to_string(),
            unit_of_measurement: None,
            value_template: Some("{{ value_json.temp }}".to_string()),
            command_topic: None,
            extra: serde_json::Map::new(),
        };

        let value = serde_json::to_value(&payload).unwrap();
        assert!(value.get("icon").is_none());
        assert!(value.get("command_topic").is_none());
        assert!(value.get("unit_of_measurement").is_none());
        assert_eq!(value["force_update"], true);
    }

    #[test]
    fn test_extra_fields_flattened() {
        let mut extra = serde_json::Map::new();
        extra.insert("brightness".to_string(), json!(true));
        extra.insert("effect_list".to_string(), json!(["solid"]));

        let config = DiscoveryConfig {
            topic: "homeassistant/light/abc/lamp/config".to_string(),
            payload: DiscoveryPayload {
                unique_id: "abc_lamp".to_string(),
                name: "lamp".to_string(),
                icon: Some("mdi:lightbulb".to_string()),
                force_update: true,
                device: device(),
                state_topic: "homeassistant/sensor/abc/state".to_string(),
                unit_of_measurement: None,
                value_template: None,
                command_topic: Some("homeassistant/light/abc/lamp/set".to_string()),
                extra,
            },
        };

        let value: serde_json::Value = serde_json::from_str(&config.to_json().unwrap()).unwrap();
        assert_eq!(value["brightness"], true);
        assert_eq!(value["effect_list"][0], "solid");
        assert_eq!(value["command_topic"], "homeassistant/light/abc/lamp/set");
    }
}

//! On/off switches

use serde_json::{json, Value};
use tracing::{info, warn};

use disco_core::{
    on_off, EntityName, IntegrationKind, Readings, Signature, SignatureEntry, PAYLOAD_OFF,
    PAYLOAD_ON,
};

use crate::{Commandable, DigitalOutput, Entity, EntityTopics, ValueTemplate, TOGGLE_ICON};

/// A commandable on/off output
///
/// Reports `{name}_state` as `ON`/`OFF`. Discovered as a `switch` by
/// default, or as an on/off-only `light` via [`Switch::as_light`].
pub struct Switch {
    name: EntityName,
    integration: IntegrationKind,
    signature: Signature,
    state_key: String,
    output: Box<dyn DigitalOutput>,
    state: bool,
    command_topic: Option<String>,
}

impl Switch {
    pub fn new(name: EntityName, output: Box<dyn DigitalOutput>) -> Self {
        let state_key = format!("{name}_state");
        let state = output.get().unwrap_or_else(|e| {
            warn!(entity = %name, error = %e, "Could not read initial output level, assuming off");
            false
        });

        Self {
            signature: Signature::single(state_key.clone(), SignatureEntry::new().icon(TOGGLE_ICON)),
            name,
            integration: IntegrationKind::Switch,
            state_key,
            output,
            state,
            command_topic: None,
        }
    }

    /// Listen on a command topic shared with other entities
    pub fn with_command_topic(mut self, topic: impl Into<String>) -> Self {
        self.command_topic = Some(topic.into());
        self
    }

    /// Discover as a light without brightness
    pub fn as_light(mut self) -> Self {
        self.integration = IntegrationKind::Light;
        self.signature = Signature::single(
            self.state_key.clone(),
            SignatureEntry::new().icon("mdi:lightbulb"),
        );
        self
    }

    /// Last level written or observed
    pub fn is_on(&self) -> bool {
        self.state
    }

    fn drive(&mut self, on: bool) {
        match self.output.set(on) {
            Ok(()) => {
                self.state = on;
                info!(entity = %self.name, state = on_off(on), "Switched");
            }
            Err(e) => warn!(entity = %self.name, error = %e, "Failed to drive output"),
        }
    }
}

impl Entity for Switch {
    fn name(&self) -> &EntityName {
        &self.name
    }

    fn integration(&self) -> IntegrationKind {
        self.integration
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn read(&mut self) -> Option<Readings> {
        // hardware is the source of truth; fall back to the cached level
        match self.output.get() {
            Ok(level) => self.state = level,
            Err(e) => warn!(entity = %self.name, error = %e, "Output read failed, reporting cached state"),
        }

        let mut readings = Readings::new();
        readings.insert(self.state_key.clone(), Value::from(on_off(self.state)));
        Some(readings)
    }

    fn value_template(&self, _subkey: &str) -> ValueTemplate {
        match self.integration {
            // lights take their state through state_value_template
            IntegrationKind::Light => ValueTemplate::Omit,
            _ => ValueTemplate::Default,
        }
    }

    fn extra_discovery_fields(&self, _topics: &EntityTopics) -> serde_json::Map<String, Value> {
        let mut extra = serde_json::Map::new();
        extra.insert("payload_on".to_string(), json!(PAYLOAD_ON));
        extra.insert("payload_off".to_string(), json!(PAYLOAD_OFF));
        if self.integration == IntegrationKind::Light {
            extra.insert(
                "state_value_template".to_string(),
                json!(self.signature.default_value_template(&self.state_key)),
            );
        }
        extra
    }

    fn as_commandable(&self) -> Option<&dyn Commandable> {
        Some(self)
    }

    fn as_commandable_mut(&mut self) -> Option<&mut dyn Commandable> {
        Some(self)
    }
}

impl Commandable for Switch {
    fn command(&mut self, payload: &str) {
        match payload {
            PAYLOAD_ON => self.drive(true),
            PAYLOAD_OFF => self.drive(false),
            other => warn!(entity = %self.name, payload = %other, "Ignoring unrecognised switch command"),
        }
    }

    fn command_topic(&self) -> Option<&str> {
        self.command_topic.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery_configs;
    use crate::hardware::memory::MemoryOutput;
    use disco_core::DeviceInfo;

    fn fan(output: &MemoryOutput) -> Switch {
        Switch::new("fan".parse().unwrap(), Box::new(output.clone()))
    }

    #[test]
    fn test_switch_commands() {
        let output = MemoryOutput::new(false);
        let mut switch = fan(&output);

        switch.command("ON");
        assert!(output.is_on());
        assert_eq!(switch.read().unwrap()["fan_state"], "ON");

        switch.command("OFF");
        assert!(!output.is_on());
        assert_eq!(switch.read().unwrap()["fan_state"], "OFF");
    }

    #[test]
    fn test_switch_ignores_unknown_payload() {
        let output = MemoryOutput::new(true);
        let mut switch = fan(&output);

        switch.command("on");
        switch.command("TOGGLE");
        switch.command("");
        assert!(output.is_on());
        assert!(switch.is_on());
    }

    #[test]
    fn test_switch_initial_state_from_hardware() {
        let output = MemoryOutput::new(true);
        assert!(fan(&output).is_on());
    }

    #[test]
    fn test_switch_discovery() {
        let device = DeviceInfo::new("abc", "PicoTest", "homeassistant");
        let switch = fan(&MemoryOutput::default());
        let topics = EntityTopics::bind(&device.topics(), &switch);
        let configs = discovery_configs(&switch, &topics, &device.payload());

        assert_eq!(configs.len(), 1);
        let config = &configs[0];
        assert_eq!(config.topic, "homeassistant/switch/abc/fan/config");
        assert_eq!(config.payload.unique_id, "abc_fan");
        assert_eq!(config.payload.state_topic, "homeassistant/sensor/abc/state");
        assert_eq!(
            config.payload.command_topic.as_deref(),
            Some("homeassistant/switch/abc/fan/set")
        );
        assert_eq!(
            config.payload.value_template.as_deref(),
            Some("{{ value_json.fan_state }}")
        );
        assert_eq!(config.payload.extra["payload_on"], "ON");
    }

    #[test]
    fn test_switch_as_light_discovery() {
        let device = DeviceInfo::new("abc", "PicoTest", "homeassistant");
        let led = Switch::new("BoardLED".parse().unwrap(), Box::new(MemoryOutput::default())).as_light();
        let topics = EntityTopics::bind(&device.topics(), &led);
        let configs = discovery_configs(&led, &topics, &device.payload());

        let config = &configs[0];
        assert_eq!(config.topic, "homeassistant/light/abc/BoardLED/config");
        assert_eq!(
            config.payload.command_topic.as_deref(),
            Some("homeassistant/light/abc/BoardLED/set")
        );
        assert!(config.payload.value_template.is_none());
        assert_eq!(
            config.payload.extra["state_value_template"],
            "{{ value_json.BoardLED_state }}"
        );
    }

    #[test]
    fn test_switch_shared_command_topic() {
        let device = DeviceInfo::new("abc", "PicoTest", "homeassistant");
        let switch = fan(&MemoryOutput::default()).with_command_topic("homeassistant/switch/abc/all/set");
        let topics = EntityTopics::bind(&device.topics(), &switch);
        let configs = discovery_configs(&switch, &topics, &device.payload());

        assert_eq!(topics.command.as_deref(), Some("homeassistant/switch/abc/all/set"));
        // config topic and unique id still follow the entity name
        assert_eq!(configs[0].topic, "homeassistant/switch/abc/fan/config");
        assert_eq!(
            configs[0].payload.command_topic.as_deref(),
            Some("homeassistant/switch/abc/all/set")
        );
    }
}

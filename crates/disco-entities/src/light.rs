//! Dimmable lights

use serde_json::{json, Value};
use tracing::{info, warn};

use disco_core::{
    on_off, EntityName, IntegrationKind, Readings, Signature, SignatureEntry, ValueTransform,
    PAYLOAD_OFF, PAYLOAD_ON,
};

use crate::{Commandable, Entity, EntityTopics, PwmOutput, ValueTemplate};

const FULL_BRIGHTNESS: u8 = u8::MAX;

/// A PWM-driven light with brightness control
///
/// Accepts `ON`, `OFF`, or a brightness level `0..=255` on its command
/// topic. `ON` restores the last non-zero brightness.
pub struct Light {
    name: EntityName,
    signature: Signature,
    state_key: String,
    brightness_key: String,
    pwm: Box<dyn PwmOutput>,
    /// Brightness restored by `ON`
    last_level: u8,
    command_topic: Option<String>,
}

impl Light {
    pub fn new(name: EntityName, pwm: Box<dyn PwmOutput>) -> Self {
        let state_key = format!("{name}_state");
        let brightness_key = format!("{name}_brightness");
        let signature = Signature::new()
            .with(state_key.clone(), SignatureEntry::new().icon("mdi:lightbulb"))
            .with(
                brightness_key.clone(),
                SignatureEntry::new().transform(ValueTransform::Int).auxiliary(),
            );

        let last_level = match pwm.duty() {
            Ok(duty) if duty > 0.0 => to_level(duty),
            _ => FULL_BRIGHTNESS,
        };

        Self {
            name,
            signature,
            state_key,
            brightness_key,
            pwm,
            last_level,
            command_topic: None,
        }
    }

    /// Listen on a command topic shared with other entities
    pub fn with_command_topic(mut self, topic: impl Into<String>) -> Self {
        self.command_topic = Some(topic.into());
        self
    }

    /// Current brightness level, `0` when off
    pub fn level(&self) -> Option<u8> {
        self.pwm.duty().ok().map(to_level)
    }

    fn set_level(&mut self, level: u8) {
        match self.pwm.set_duty(f32::from(level) / f32::from(FULL_BRIGHTNESS)) {
            Ok(()) => {
                if level > 0 {
                    self.last_level = level;
                }
                info!(entity = %self.name, level, "Brightness set");
            }
            Err(e) => warn!(entity = %self.name, error = %e, "Failed to drive PWM output"),
        }
    }
}

fn to_level(duty: f32) -> u8 {
    (duty.clamp(0.0, 1.0) * f32::from(FULL_BRIGHTNESS)).round() as u8
}

impl Entity for Light {
    fn name(&self) -> &EntityName {
        &self.name
    }

    fn integration(&self) -> IntegrationKind {
        IntegrationKind::Light
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn read(&mut self) -> Option<Readings> {
        let level = match self.pwm.duty() {
            Ok(duty) => to_level(duty),
            Err(e) => {
                warn!(entity = %self.name, error = %e, "PWM read failed");
                return None;
            }
        };

        let mut readings = Readings::new();
        readings.insert(self.state_key.clone(), Value::from(on_off(level > 0)));
        readings.insert(self.brightness_key.clone(), Value::from(level));
        Some(readings)
    }

    fn value_template(&self, _subkey: &str) -> ValueTemplate {
        ValueTemplate::Omit
    }

    fn extra_discovery_fields(&self, topics: &EntityTopics) -> serde_json::Map<String, Value> {
        let mut extra = serde_json::Map::new();
        extra.insert(
            "state_value_template".to_string(),
            json!(self.signature.default_value_template(&self.state_key)),
        );
        extra.insert("payload_on".to_string(), json!(PAYLOAD_ON));
        extra.insert("payload_off".to_string(), json!(PAYLOAD_OFF));
        extra.insert("brightness".to_string(), json!(true));
        extra.insert("brightness_scale".to_string(), json!(FULL_BRIGHTNESS));
        extra.insert("brightness_state_topic".to_string(), json!(topics.state));
        extra.insert(
            "brightness_value_template".to_string(),
            json!(self.signature.default_value_template(&self.brightness_key)),
        );
        if let Some(command) = &topics.command {
            extra.insert("brightness_command_topic".to_string(), json!(command));
        }
        extra.insert("on_command_type".to_string(), json!("brightness"));
        extra
    }

    fn as_commandable(&self) -> Option<&dyn Commandable> {
        Some(self)
    }

    fn as_commandable_mut(&mut self) -> Option<&mut dyn Commandable> {
        Some(self)
    }
}

impl Commandable for Light {
    fn command(&mut self, payload: &str) {
        match payload {
            PAYLOAD_ON => self.set_level(self.last_level),
            PAYLOAD_OFF => self.set_level(0),
            other => match other.parse::<u8>() {
                Ok(level) => self.set_level(level),
                Err(_) => {
                    warn!(entity = %self.name, payload = %other, "Ignoring unrecognised light command")
                }
            },
        }
    }

    fn command_topic(&self) -> Option<&str> {
        self.command_topic.as_deref()
    }
}

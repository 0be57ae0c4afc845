//! The entity contract and discovery-config generation

use std::sync::Arc;

use disco_core::{
    DevicePayload, DiscoveryConfig, DiscoveryPayload, EntityName, IntegrationKind, Readings,
    Signature, TopicScheme,
};

use crate::{InterruptLatch, InterruptSource};

/// How a sub-value's `value_template` is rendered in its discovery payload
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ValueTemplate {
    /// Reference into the state JSON, composed with the declared transform
    #[default]
    Default,
    /// Replace the template entirely
    Custom(String),
    /// Leave `value_template` out; the entity supplies its own state fields
    Omit,
}

/// Topics an entity was bound to when it was registered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityTopics {
    scheme: TopicScheme,
    /// Shared state topic the entity's readings are published on
    pub state: String,
    /// Command topic, for commandable entities only
    pub command: Option<String>,
}

impl EntityTopics {
    /// Derive the topics of `entity` within a device's topic scheme
    pub fn bind(scheme: &TopicScheme, entity: &dyn Entity) -> Self {
        let command = entity.as_commandable().map(|commandable| {
            commandable
                .command_topic()
                .map(str::to_string)
                .unwrap_or_else(|| scheme.command(entity.integration(), entity.name().as_str()))
        });

        Self {
            scheme: scheme.clone(),
            state: scheme.state(entity.state_integration()),
            command,
        }
    }

    /// The device topic scheme
    pub fn scheme(&self) -> &TopicScheme {
        &self.scheme
    }

    /// Discovery topics this entity will publish, in signature order
    pub fn discovery_topics(&self, entity: &dyn Entity) -> Vec<String> {
        let signature = entity.signature();
        let single = signature.is_single();

        signature
            .discoverable()
            .map(|(subkey, _)| {
                self.scheme.discovery(
                    entity.integration(),
                    entity.name().as_str(),
                    (!single).then_some(subkey),
                )
            })
            .collect()
    }
}

/// A named, typed piece of device functionality
///
/// `signature` declares the sub-values `read` produces; it is fixed for the
/// lifetime of the entity. Entities publishing under the sensor state topic
/// share one JSON document with every other readable entity of the device,
/// so read keys must be unique device-wide.
pub trait Entity: Send {
    fn name(&self) -> &EntityName;

    /// Integration the entity is discovered under
    fn integration(&self) -> IntegrationKind;

    /// Integration whose state topic carries the entity's readings
    fn state_integration(&self) -> IntegrationKind {
        IntegrationKind::Sensor
    }

    fn signature(&self) -> &Signature;

    /// Take a reading
    ///
    /// `None` means "nothing to report this cycle"; hardware failures are
    /// logged by the entity and also reported as `None`.
    fn read(&mut self) -> Option<Readings>;

    /// Template rendering for one sub-value
    fn value_template(&self, _subkey: &str) -> ValueTemplate {
        ValueTemplate::Default
    }

    /// Fields merged verbatim into every discovery payload of this entity
    fn extra_discovery_fields(
        &self,
        _topics: &EntityTopics,
    ) -> serde_json::Map<String, serde_json::Value> {
        serde_json::Map::new()
    }

    fn as_commandable(&self) -> Option<&dyn Commandable> {
        None
    }

    fn as_commandable_mut(&mut self) -> Option<&mut dyn Commandable> {
        None
    }

    fn as_interrupt_driven(&self) -> Option<&dyn InterruptDriven> {
        None
    }
}

/// Entities that accept command messages
pub trait Commandable {
    /// Apply a command payload
    ///
    /// Unrecognised payloads are logged and ignored; they never change
    /// entity state.
    fn command(&mut self, payload: &str);

    /// Topic shared with other entities, replacing the per-entity one
    fn command_topic(&self) -> Option<&str> {
        None
    }
}

/// Entities whose readings are forced by a hardware interrupt
pub trait InterruptDriven {
    /// The line this entity listens on
    fn interrupt_source(&self) -> InterruptSource;

    /// The edge the line fires on
    fn edge(&self) -> crate::Edge;

    /// Latch shared with interrupt context
    fn latch(&self) -> Arc<InterruptLatch>;

    /// Record that the line fired. Safe to call from interrupt context.
    fn on_interrupt(&self, source: InterruptSource) -> bool {
        source == self.interrupt_source() && self.latch().fire()
    }

    /// Whether a fired interrupt awaits its forced read
    fn is_pending(&self) -> bool {
        self.latch().is_pending()
    }
}

/// Build every discovery config an entity publishes
///
/// One config per discoverable sub-value. With exactly one such sub-value
/// the short naming form is used (`{uid}_{name}`, display name `{name}`),
/// otherwise every config carries the sub-key.
pub fn discovery_configs(
    entity: &dyn Entity,
    topics: &EntityTopics,
    device: &DevicePayload,
) -> Vec<DiscoveryConfig> {
    let signature = entity.signature();
    let single = signature.is_single();
    let name = entity.name().as_str();
    let uid = topics.scheme().uid();
    let extra = entity.extra_discovery_fields(topics);

    signature
        .discoverable()
        .map(|(subkey, entry)| {
            let (unique_id, display_name) = if single {
                (format!("{uid}_{name}"), name.to_string())
            } else {
                (format!("{uid}_{name}_{subkey}"), format!("{name}_{subkey}"))
            };

            let value_template = match entity.value_template(subkey) {
                ValueTemplate::Default => Some(signature.default_value_template(subkey)),
                ValueTemplate::Custom(template) => Some(template),
                ValueTemplate::Omit => None,
            };

            DiscoveryConfig {
                topic: topics.scheme().discovery(
                    entity.integration(),
                    name,
                    (!single).then_some(subkey),
                ),
                payload: DiscoveryPayload {
                    unique_id,
                    name: display_name,
                    icon: entry.icon.clone(),
                    force_update: true,
                    device: device.clone(),
                    state_topic: topics.state.clone(),
                    unit_of_measurement: entry.unit.clone(),
                    value_template,
                    command_topic: topics.command.clone(),
                    extra: extra.clone(),
                },
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use disco_core::{DeviceInfo, SignatureEntry, ValueTransform};
    use serde_json::json;

    struct Climate {
        name: EntityName,
        signature: Signature,
    }

    impl Climate {
        fn new() -> Self {
            Self {
                name: "BME280".parse().unwrap(),
                signature: Signature::new()
                    .with(
                        "temp",
                        SignatureEntry::new()
                            .icon("mdi:thermometer")
                            .unit("C")
                            .transform(ValueTransform::Round(2)),
                    )
                    .with("humidity", SignatureEntry::new().unit("%"))
                    .with("raw", SignatureEntry::new().auxiliary()),
            }
        }
    }

    impl Entity for Climate {
        fn name(&self) -> &EntityName {
            &self.name
        }

        fn integration(&self) -> IntegrationKind {
            IntegrationKind::Sensor
        }

        fn signature(&self) -> &Signature {
            &self.signature
        }

        fn read(&mut self) -> Option<Readings> {
            let mut readings = Readings::new();
            readings.insert("temp".to_string(), json!(21.456));
            readings.insert("humidity".to_string(), json!(40));
            Some(readings)
        }

        fn value_template(&self, subkey: &str) -> ValueTemplate {
            match subkey {
                "humidity" => ValueTemplate::Custom("{{ value_json.humidity | int }}".to_string()),
                _ => ValueTemplate::Default,
            }
        }
    }

    fn device() -> DeviceInfo {
        DeviceInfo::new("abc", "PicoTest", "homeassistant")
    }

    #[test]
    fn test_multi_value_naming() {
        let entity = Climate::new();
        let device = device();
        let topics = EntityTopics::bind(&device.topics(), &entity);
        let configs = discovery_configs(&entity, &topics, &device.payload());

        // auxiliary sub-values are not discovered
        assert_eq!(configs.len(), 2);

        let temp = &configs[0];
        assert_eq!(temp.topic, "homeassistant/sensor/abc/BME280_temp/config");
        assert_eq!(temp.payload.unique_id, "abc_BME280_temp");
        assert_eq!(temp.payload.name, "BME280_temp");
        assert_eq!(
            temp.payload.value_template.as_deref(),
            Some("{{ value_json.temp | round(2) }}")
        );
        assert_eq!(temp.payload.unit_of_measurement.as_deref(), Some("C"));
        assert_eq!(temp.payload.state_topic, "homeassistant/sensor/abc/state");
        assert!(temp.payload.force_update);
        assert!(temp.payload.command_topic.is_none());

        let humidity = &configs[1];
        assert_eq!(
            humidity.payload.value_template.as_deref(),
            Some("{{ value_json.humidity | int }}")
        );
    }

    #[test]
    fn test_non_commandable_has_no_command_topic() {
        let entity = Climate::new();
        let topics = EntityTopics::bind(&device().topics(), &entity);
        assert!(topics.command.is_none());
        assert_eq!(
            topics.discovery_topics(&entity),
            vec![
                "homeassistant/sensor/abc/BME280_temp/config".to_string(),
                "homeassistant/sensor/abc/BME280_humidity/config".to_string(),
            ]
        );
    }
}

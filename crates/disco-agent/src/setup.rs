//! Assemble a device from its configuration

use std::fs;
use std::net::{IpAddr, UdpSocket};
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use disco_config::{AgentConfig, EntityConfig, RetryConfig, TriggerEdge};
use disco_core::{
    DeviceInfo, EntityName, SharedClock, Signature, SignatureEntry, ValueTransform,
};
use disco_entities::hardware::memory::{MemoryOutput, MemoryPwm};
use disco_entities::{
    Calibration, DigitalOutput, Edge, Entity, InterruptSource, Light, PwmOutput, Sensor, Switch,
    Trigger,
};
use disco_runtime::{ConnectionManager, Device, MessageBus, MqttSettings, RetryPolicy};

use crate::sysfs::{gpio_value_path, FileAnalog, GpioOutput, PollingInterrupts, PwmChannel, ThermalZone};

pub const MACHINE_ID: &str = "/etc/machine-id";

/// Characters of the machine id used as the device UID
const UID_LENGTH: usize = 16;

pub fn retry_policy(retry: &RetryConfig) -> RetryPolicy {
    RetryPolicy {
        connect_interval: retry.connect_interval,
        publish_backoff: retry.publish_backoff,
        publish_retries: retry.publish_retries,
        read_failure_reset_threshold: retry.read_failure_reset_threshold,
        idle_sleep: retry.idle_sleep,
    }
}

/// Stable device UID: the configured override, else the machine id
pub fn resolve_uid(config: &AgentConfig, machine_id: &Path) -> Result<String> {
    if let Some(uid) = &config.device.uid {
        return Ok(uid.clone());
    }

    let raw = fs::read_to_string(machine_id)
        .with_context(|| format!("reading {}", machine_id.display()))?;
    let uid: String = raw
        .trim()
        .chars()
        .filter(char::is_ascii_hexdigit)
        .take(UID_LENGTH)
        .collect::<String>()
        .to_ascii_lowercase();
    if uid.is_empty() {
        bail!("{} holds no usable identifier", machine_id.display());
    }
    Ok(uid)
}

pub fn mqtt_settings(config: &AgentConfig, uid: &str) -> MqttSettings {
    let mqtt = &config.mqtt;
    let client_id = mqtt
        .client_id
        .clone()
        .unwrap_or_else(|| format!("disco-{uid}"));
    let mut settings =
        MqttSettings::new(&mqtt.host, mqtt.port, client_id).with_keep_alive(mqtt.keep_alive);
    if let Some(username) = &mqtt.username {
        settings = settings.with_credentials(username, mqtt.password.clone().unwrap_or_default());
    }
    settings
}

/// Address of the interface that routes to the broker
fn local_address(host: &str, port: u16) -> Option<IpAddr> {
    // connecting a UDP socket sends nothing; it only selects a route
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect((host, port)).ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}

fn diagnostic_name(name: &str) -> Result<EntityName> {
    name.parse()
        .with_context(|| format!("invalid diagnostic entity name '{name}'"))
}

/// Built-in constant sensors reporting the network address and UID
fn diagnostics(config: &AgentConfig, uid: &str) -> Result<Vec<Box<dyn Entity>>> {
    let mut entities: Vec<Box<dyn Entity>> = Vec::new();

    match local_address(&config.mqtt.host, config.mqtt.port) {
        Some(ip) => entities.push(Box::new(Sensor::constant(
            diagnostic_name("Network")?,
            ip.to_string(),
            Some("IP"),
            SignatureEntry::new().icon("mdi:ip-network"),
        ))),
        None => warn!(host = %config.mqtt.host, "No route to broker, IP diagnostic skipped"),
    }

    entities.push(Box::new(Sensor::constant(
        diagnostic_name("Device")?,
        uid.to_string(),
        Some("UID"),
        SignatureEntry::new().icon("mdi:identifier"),
    )));
    Ok(entities)
}

fn edge(edge: TriggerEdge) -> Edge {
    match edge {
        TriggerEdge::Rising => Edge::Rising,
        TriggerEdge::Falling => Edge::Falling,
        TriggerEdge::Both => Edge::Both,
    }
}

fn temperature_entry() -> SignatureEntry {
    SignatureEntry::new()
        .icon("mdi:thermometer")
        .unit("C")
        .transform(ValueTransform::Round(2))
}

/// Build one configured entity
///
/// Trigger lines are declared on `interrupts` so the poller can find them.
pub fn build_entity(
    entity: &EntityConfig,
    clock: &SharedClock,
    interrupts: &mut PollingInterrupts,
) -> Result<Box<dyn Entity>> {
    let built: Box<dyn Entity> = match entity {
        EntityConfig::Constant {
            name,
            value,
            subkey,
            icon,
            unit,
        } => {
            let mut entry = SignatureEntry::new();
            if let Some(icon) = icon {
                entry = entry.icon(icon);
            }
            if let Some(unit) = unit {
                entry = entry.unit(unit);
            }
            let value = serde_json::to_value(value)
                .with_context(|| format!("constant '{name}' has an unsupported value"))?;
            Box::new(Sensor::constant(name.clone(), value, subkey.as_deref(), entry))
        }
        EntityConfig::CpuTemperature {
            name,
            adc,
            calibration,
        } => Box::new(
            Sensor::cpu_temperature(name.clone(), Box::new(FileAnalog::new(adc)))
                .with_calibration(calibration.clone().into_iter().collect::<Calibration>()),
        ),
        EntityConfig::Thermal {
            name,
            path,
            calibration,
        } => {
            let key = name.as_str().to_string();
            Box::new(
                Sensor::new(
                    name.clone(),
                    Signature::single(key.clone(), temperature_entry()),
                    Box::new(ThermalZone::new(path, key)),
                )
                .with_calibration(calibration.clone().into_iter().collect::<Calibration>()),
            )
        }
        EntityConfig::Switch {
            name,
            path,
            as_light,
            command_topic,
        } => {
            let output: Box<dyn DigitalOutput> = match path {
                Some(path) => Box::new(GpioOutput::new(path)),
                None => {
                    warn!(entity = %name, "No GPIO path, switch is simulated");
                    Box::new(MemoryOutput::new(false))
                }
            };
            let mut switch = Switch::new(name.clone(), output);
            if *as_light {
                switch = switch.as_light();
            }
            if let Some(topic) = command_topic {
                switch = switch.with_command_topic(topic);
            }
            Box::new(switch)
        }
        EntityConfig::Light {
            name,
            path,
            command_topic,
        } => {
            let pwm: Box<dyn PwmOutput> = match path {
                Some(path) => Box::new(
                    PwmChannel::open(path)
                        .with_context(|| format!("opening PWM channel for '{name}'"))?,
                ),
                None => {
                    warn!(entity = %name, "No PWM path, light is simulated");
                    Box::new(MemoryPwm::new(0.0))
                }
            };
            let mut light = Light::new(name.clone(), pwm);
            if let Some(topic) = command_topic {
                light = light.with_command_topic(topic);
            }
            Box::new(light)
        }
        EntityConfig::Trigger {
            name,
            source,
            path,
            edge: trigger_edge,
            debounce_ms,
            warmup,
        } => {
            let source = InterruptSource(*source);
            let value_path = path.clone().unwrap_or_else(|| gpio_value_path(source));
            interrupts.watch(source, value_path);

            let mut trigger = Trigger::new(name.clone(), source, clock.clone())
                .with_debounce(Duration::from_millis(*debounce_ms))
                .with_edge(edge(*trigger_edge));
            if let Some(window) = warmup {
                trigger = trigger.with_warmup(*window);
            }
            Box::new(trigger)
        }
    };

    debug!(entity = %entity.name(), "Built entity");
    Ok(built)
}

/// Everything the run loop needs
pub struct Assembly {
    pub device: Device,
    pub interrupts: PollingInterrupts,
}

/// Build the device and register every entity
pub fn assemble(
    config: &AgentConfig,
    uid: &str,
    bus: Box<dyn MessageBus>,
    clock: SharedClock,
) -> Result<Assembly> {
    let mut info = DeviceInfo::new(uid, &config.device.name, &config.device.discovery_prefix)
        .with_interval(config.device.interval);
    if let Some(location) = &config.device.location {
        info = info.with_location(location);
    }
    info.manufacturer = config.device.manufacturer.clone();
    info.model = config.device.model.clone();

    let connection = ConnectionManager::new(
        bus,
        clock.clone(),
        retry_policy(&config.retry),
        &config.mqtt.status_topic,
    );
    let mut device = Device::new(info, connection);
    let mut interrupts = PollingInterrupts::new();

    if config.device.diagnostics {
        for entity in diagnostics(config, uid)? {
            device.add(entity)?;
        }
    }
    for entity in &config.entities {
        let built = build_entity(entity, &clock, &mut interrupts)?;
        device
            .add(built)
            .with_context(|| format!("registering '{}'", entity.name()))?;
    }

    device
        .interrupt_router()
        .bind(&mut interrupts)
        .context("binding interrupt lines")?;

    info!(
        uid,
        entities = device.registry().len(),
        interrupt_lines = interrupts.len(),
        "Device assembled"
    );
    Ok(Assembly { device, interrupts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use disco_config::{Secrets, Value, YamlLoader};
    use disco_core::ManualClock;
    use disco_runtime::{MemoryBus, Scheduler};
    use tempfile::TempDir;

    fn config(yaml: &str) -> AgentConfig {
        let value: Value = YamlLoader::with_secrets(".", Secrets::default())
            .load_str(yaml, Path::new("inline.yaml"))
            .unwrap();
        AgentConfig::from_yaml(&value).unwrap()
    }

    #[test]
    fn test_uid_from_machine_id() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("machine-id");
        fs::write(&path, "0A1B2C3D4E5F60718293a4b5c6d7e8f9\n").unwrap();

        let config = config("device: {name: Pico}\nmqtt: {host: broker}\n");
        assert_eq!(resolve_uid(&config, &path).unwrap(), "0a1b2c3d4e5f6071");
    }

    #[test]
    fn test_uid_override_wins() {
        let config = config("device: {name: Pico, uid: e6614c}\nmqtt: {host: broker}\n");
        assert_eq!(resolve_uid(&config, Path::new("/nonexistent")).unwrap(), "e6614c");
    }

    #[test]
    fn test_assemble_registers_entities_and_diagnostics() {
        let config = config(
            "device: {name: Pico, location: Garage}\n\
             mqtt: {host: 127.0.0.1}\n\
             entities:\n\
             \x20 - {kind: constant, name: firmware, value: 1.4, icon: \"mdi:chip\"}\n\
             \x20 - {kind: switch, name: fan}\n\
             \x20 - {kind: trigger, name: button, source: 7, path: /nonexistent/value}\n",
        );
        let bus = MemoryBus::new();
        let assembly = assemble(&config, "abc", Box::new(bus.clone()), ManualClock::shared()).unwrap();

        let names: Vec<String> = assembly
            .device
            .registry()
            .names()
            .map(|n| n.to_string())
            .collect();
        assert!(names.contains(&"Device".to_string()));
        assert!(names.ends_with(&[
            "firmware".to_string(),
            "fan".to_string(),
            "button".to_string()
        ]));
        assert_eq!(assembly.interrupts.len(), 1);

        let mut scheduler = Scheduler::new(assembly.device);
        scheduler.run_once();
        let configs: Vec<String> = bus
            .published()
            .into_iter()
            .filter(|m| m.topic.ends_with("/config"))
            .map(|m| m.topic)
            .collect();
        assert!(configs.contains(&"homeassistant/sensor/abc/Device/config".to_string()));
        assert!(configs.contains(&"homeassistant/switch/abc/fan/config".to_string()));
        assert!(configs.contains(&"homeassistant/binary_sensor/abc/button/config".to_string()));
    }

    #[test]
    fn test_diagnostics_can_be_disabled() {
        let config = config("device: {name: Pico, diagnostics: false}\nmqtt: {host: broker}\n");
        let assembly =
            assemble(&config, "abc", Box::new(MemoryBus::new()), ManualClock::shared()).unwrap();
        assert!(assembly.device.registry().is_empty());
    }
}

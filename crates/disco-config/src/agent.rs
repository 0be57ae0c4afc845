//! Agent configuration from `configuration.yaml`

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use tracing::debug;

use disco_core::{EntityName, DEFAULT_DISCOVERY_PREFIX, DEFAULT_STATUS_TOPIC};

use crate::error::{ConfigError, ConfigResult};
use crate::loader::load_yaml;

/// Main configuration file inside the config directory
pub const CONFIG_FILE: &str = "configuration.yaml";

/// Complete agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub device: DeviceConfig,
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Entities in declaration order
    #[serde(default)]
    pub entities: Vec<EntityConfig>,
}

/// The `device:` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default = "default_discovery_prefix")]
    pub discovery_prefix: String,
    /// Seconds between scheduled reads
    #[serde(default = "default_interval", with = "crate::duration")]
    pub interval: Duration,
    /// Overrides the UID derived from the host identity
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default = "default_manufacturer")]
    pub manufacturer: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Register the built-in IP address and UID sensors
    #[serde(default = "default_true")]
    pub diagnostics: bool,
}

/// The `mqtt:` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Defaults to `disco-{uid}`
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default = "default_keep_alive", with = "crate::duration")]
    pub keep_alive: Duration,
    /// Topic carrying the controller's birth and last-will messages
    #[serde(default = "default_status_topic")]
    pub status_topic: String,
}

/// The `retry:` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Wait between connection attempts
    #[serde(with = "crate::duration")]
    pub connect_interval: Duration,
    /// Wait between attempts of one publish
    #[serde(with = "crate::duration")]
    pub publish_backoff: Duration,
    /// Retries after the first failed attempt before giving up on a publish
    pub publish_retries: u32,
    /// Skipped read cycles while the broker is down before restarting
    pub read_failure_reset_threshold: u32,
    /// Idle sleep at the end of each loop iteration
    #[serde(with = "crate::duration")]
    pub idle_sleep: Duration,
}

impl Default for RetryConfig {
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

/// Edge a trigger's interrupt fires on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerEdge {
    #[default]
    Rising,
    Falling,
    Both,
}

/// One entity declaration, tagged by `kind`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityConfig {
    /// Fixed value, e.g. a firmware revision
    Constant {
        name: EntityName,
        value: Value,
        #[serde(default)]
        subkey: Option<String>,
        #[serde(default)]
        icon: Option<String>,
        #[serde(default)]
        unit: Option<String>,
    },
    /// On-die temperature from a raw 16-bit ADC sample file
    CpuTemperature {
        name: EntityName,
        adc: PathBuf,
        #[serde(default)]
        calibration: IndexMap<String, f64>,
    },
    /// Millidegree thermal zone file (`/sys/class/thermal/thermal_zone*/temp`)
    Thermal {
        name: EntityName,
        path: PathBuf,
        #[serde(default)]
        calibration: IndexMap<String, f64>,
    },
    /// On/off output. Without a path the output is virtual.
    Switch {
        name: EntityName,
        #[serde(default)]
        path: Option<PathBuf>,
        /// Discover as an on/off light
        #[serde(default)]
        as_light: bool,
        /// Command topic shared with other entities
        #[serde(default)]
        command_topic: Option<String>,
    },
    /// Dimmable output. Without a path the output is virtual.
    Light {
        name: EntityName,
        #[serde(default)]
        path: Option<PathBuf>,
        #[serde(default)]
        command_topic: Option<String>,
    },
    /// Interrupt-driven binary sensor
    Trigger {
        name: EntityName,
        /// Interrupt line number
        source: u32,
        /// Digital input file polled for edges
        #[serde(default)]
        path: Option<PathBuf>,
        #[serde(default)]
        edge: TriggerEdge,
        #[serde(default = "default_debounce_ms")]
        debounce_ms: u64,
        #[serde(default, with = "crate::duration::opt")]
        warmup: Option<Duration>,
    },
}

impl EntityConfig {
    pub fn name(&self) -> &EntityName {
        match self {
            Self::Constant { name, .. }
            | Self::CpuTemperature { name, .. }
            | Self::Thermal { name, .. }
            | Self::Switch { name, .. }
            | Self::Light { name, .. }
            | Self::Trigger { name, .. } => name,
        }
    }
}

fn default_discovery_prefix() -> String {
    DEFAULT_DISCOVERY_PREFIX.to_string()
}

fn default_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_manufacturer() -> String {
    "disco".to_string()
}

fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    1883
}

fn default_keep_alive() -> Duration {
    Duration::from_secs(60)
}

fn default_status_topic() -> String {
    DEFAULT_STATUS_TOPIC.to_string()
}

fn default_debounce_ms() -> u64 {
    500
}

impl AgentConfig {
    /// Load and validate `configuration.yaml` from a config directory
    pub fn load(config_dir: impl AsRef<Path>) -> ConfigResult<Self> {
        let config_dir = config_dir.as_ref();
        let yaml = load_yaml(config_dir, CONFIG_FILE)?;
        let config = Self::from_yaml(&yaml)?;
        debug!(
            device = %config.device.name,
            entities = config.entities.len(),
            "Loaded agent configuration"
        );
        Ok(config)
    }

    /// Parse and validate an already resolved YAML value
    pub fn from_yaml(yaml: &Value) -> ConfigResult<Self> {
        if !yaml.is_mapping() {
            return Err(ConfigError::InvalidValue {
                key: "root".to_string(),
                reason: "configuration must be a mapping".to_string(),
            });
        }

        let config: AgentConfig =
            serde_yaml::from_value(yaml.clone()).map_err(|e| ConfigError::InvalidValue {
                key: "configuration".to_string(),
                reason: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express
    pub fn validate(&self) -> ConfigResult<()> {
        let fail = |message: String| Err(ConfigError::ValidationFailed { message });

        if self.device.name.trim().is_empty() {
            return fail("device.name cannot be empty".to_string());
        }
        if self.device.discovery_prefix.is_empty()
            || self.device.discovery_prefix.contains(['+', '#'])
        {
            return fail(format!(
                "device.discovery_prefix '{}' is not a valid topic prefix",
                self.device.discovery_prefix
            ));
        }
        if self.device.interval.is_zero() {
            return fail("device.interval must be greater than zero".to_string());
        }
        if self.mqtt.host.trim().is_empty() {
            return fail("mqtt.host cannot be empty".to_string());
        }
        if self.mqtt.port == 0 {
            return fail("mqtt.port cannot be 0".to_string());
        }
        if self.mqtt.status_topic.is_empty() {
            return fail("mqtt.status_topic cannot be empty".to_string());
        }

        let mut names = HashSet::new();
        let mut sources = HashSet::new();
        for entity in &self.entities {
            if !names.insert(entity.name().as_str()) {
                return fail(format!("entity '{}' is declared twice", entity.name()));
            }
            if let EntityConfig::Trigger { source, .. } = entity {
                if !sources.insert(*source) {
                    return fail(format!("interrupt source {source} is used twice"));
                }
            }
        }

        Ok(())
    }
}

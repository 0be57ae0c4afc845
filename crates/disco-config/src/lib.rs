//! YAML configuration for the discovery agent
//!
//! `configuration.yaml` in the config directory is loaded with three custom
//! tags:
//!
//! - `!include path` - Include another YAML file, relative to the including file
//! - `!secret key` - Substitute from `secrets.yaml`
//! - `!env_var VAR` - Environment variable substitution
//!
//! # Example
//!
//! ```ignore
//! use disco_config::AgentConfig;
//!
//! let config = AgentConfig::load("/etc/disco")?;
//! println!("{} reports every {:?}", config.device.name, config.device.interval);
//! ```

mod agent;
mod duration;
mod error;
mod loader;
mod secrets;

pub use agent::{
    AgentConfig, DeviceConfig, EntityConfig, MqttConfig, RetryConfig, TriggerEdge,
    CONFIG_FILE,
};
pub use error::{ConfigError, ConfigResult};
pub use loader::{load_yaml, YamlLoader};
pub use secrets::Secrets;

pub use serde_yaml::Value;

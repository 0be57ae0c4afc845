//! Topic scheme
//!
//! Pure functions deriving every topic a device uses from its discovery
//! prefix and UID:
//!
//! ```text
//! {prefix}/{integration}/{uid}/{object_id}/config   discovery config
//! {prefix}/{integration}/{uid}/state                shared state
//! {prefix}/{integration}/{uid}/{name}/set           commands
//! ```
//!
//! `object_id` is the entity name, or `{name}_{subkey}` when an entity
//! exposes several discoverable sub-values.

use crate::IntegrationKind;

/// Discovery config topic for one discoverable sub-value
pub fn discovery_topic(
    prefix: &str,
    integration: IntegrationKind,
    uid: &str,
    object_id: &str,
) -> String {
    format!("{prefix}/{integration}/{uid}/{object_id}/config")
}

/// Shared state topic for every entity publishing under `integration`
pub fn state_topic(prefix: &str, integration: IntegrationKind, uid: &str) -> String {
    format!("{prefix}/{integration}/{uid}/state")
}

/// Command topic for a commandable entity
pub fn command_topic(prefix: &str, integration: IntegrationKind, uid: &str, name: &str) -> String {
    format!("{prefix}/{integration}/{uid}/{name}/set")
}

/// Object id of a discoverable sub-value
///
/// `None` is used when the entity has a single discoverable sub-value, which
/// keeps the bare entity name in topics and unique ids.
pub fn object_id(name: &str, subkey: Option<&str>) -> String {
    match subkey {
        Some(subkey) => format!("{name}_{subkey}"),
        None => name.to_string(),
    }
}

/// Topic scheme bound to one device's prefix and UID
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicScheme {
    prefix: String,
    uid: String,
}

impl TopicScheme {
    /// Create a scheme for a device
    pub fn new(prefix: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            uid: uid.into(),
        }
    }

    /// The discovery prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The device UID
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Discovery config topic for an entity sub-value
    pub fn discovery(&self, integration: IntegrationKind, name: &str, subkey: Option<&str>) -> String {
        discovery_topic(&self.prefix, integration, &self.uid, &object_id(name, subkey))
    }

    /// Shared state topic
    pub fn state(&self, integration: IntegrationKind) -> String {
        state_topic(&self.prefix, integration, &self.uid)
    }

    /// Command topic
    pub fn command(&self, integration: IntegrationKind, name: &str) -> String {
        command_topic(&self.prefix, integration, &self.uid, name)
    }
}

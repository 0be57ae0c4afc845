//! The device: identity, entities and the broker connection

use indexmap::IndexMap;
use tracing::{debug, error, info, instrument, warn};

use disco_core::{DeviceInfo, Readings};
use disco_entities::Entity;
use disco_registry::{EntityRegistry, InterruptRouter, RegistryResult};

use crate::{ConnectionManager, LinkState, PublishOutcome};

/// Readings grouped by the state topic they are published on
pub type StateGroups = IndexMap<String, Readings>;

/// Result of a scheduled or forced read cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Number of state payloads sent
    Published(usize),
    /// Connected, but no entity had anything to report
    Empty,
    /// Not connected; nothing was read
    Skipped,
    /// Broker has been down for too many cycles
    RestartRequired,
}

/// A physical device exposing entities to the controller
pub struct Device {
    info: DeviceInfo,
    registry: EntityRegistry,
    connection: ConnectionManager,
    discovered: bool,
    last_readings: StateGroups,
}

impl Device {
    pub fn new(info: DeviceInfo, connection: ConnectionManager) -> Self {
        let registry = EntityRegistry::new(info.topics());
        Self {
            info,
            registry,
            connection,
            discovered: false,
            last_readings: StateGroups::new(),
        }
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub(crate) fn registry_mut(&mut self) -> &mut EntityRegistry {
        &mut self.registry
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut ConnectionManager {
        &mut self.connection
    }

    pub fn is_discovered(&self) -> bool {
        self.discovered
    }

    /// Register an entity and subscribe to its command topic
    ///
    /// Fails once discovery has run.
    pub fn add(&mut self, entity: Box<dyn Entity>) -> RegistryResult<()> {
        let name = entity.name().clone();
        self.registry.add(entity)?;

        let command = self
            .registry
            .get(name.as_str())
            .and_then(|registration| registration.topics().command.clone());
        if let Some(topic) = command {
            self.connection.add_subscription(&topic);
        }
        Ok(())
    }

    /// Router for binding trigger latches to an interrupt controller
    pub fn interrupt_router(&self) -> InterruptRouter {
        self.registry.interrupt_router()
    }

    /// Publish a retained discovery config for every entity
    ///
    /// Freezes the registry. Safe to repeat; the controller treats
    /// republished configs as updates.
    #[instrument(skip(self), fields(device = %self.info.name()))]
    pub fn discover(&mut self) -> usize {
        self.registry.freeze();

        let configs = self.registry.discovery_configs(&self.info.payload());
        let total = configs.len();
        let mut sent = 0;
        for config in configs {
            let json = match config.to_json() {
                Ok(json) => json,
                Err(err) => {
                    error!(%err, topic = %config.topic, "Discovery config not encodable");
                    continue;
                }
            };
            if self.connection.publish(&config.topic, json.as_bytes(), true) == PublishOutcome::Sent {
                sent += 1;
            }
        }

        self.discovered = true;
        if sent == total {
            info!(configs = sent, "Discovery published");
        } else {
            warn!(sent, total, "Discovery incomplete");
        }
        sent
    }

    /// Make the controller forget this device
    ///
    /// Publishes an empty retained payload on every discovery topic.
    pub fn retract_discovery(&mut self) -> usize {
        let mut cleared = 0;
        for topic in self.registry.discovery_topics() {
            if self.connection.publish(&topic, &[], true) == PublishOutcome::Sent {
                cleared += 1;
            }
        }
        info!(cleared, "Discovery retracted");
        cleared
    }

    /// Read every entity and group the results by state topic
    ///
    /// Keys an entity did not declare in its signature are dropped. With
    /// `dry_run` the groups are only logged.
    pub fn read_entities(&mut self, dry_run: bool) -> usize {
        let groups = self.collect_readings();
        let sent = self.publish_groups(&groups, dry_run);
        if !groups.is_empty() {
            self.last_readings = groups;
        }
        sent
    }

    fn publish_groups(&mut self, groups: &StateGroups, dry_run: bool) -> usize {
        let mut sent = 0;
        for (topic, readings) in groups {
            let payload = match serde_json::to_vec(readings) {
                Ok(payload) => payload,
                Err(err) => {
                    error!(%err, topic = %topic, "State payload not encodable");
                    continue;
                }
            };

            if dry_run {
                info!(topic = %topic, payload = %String::from_utf8_lossy(&payload), "Dry-run state");
                sent += 1;
            } else if self.connection.publish(topic, &payload, false) == PublishOutcome::Sent {
                sent += 1;
            }
        }
        sent
    }

    fn collect_readings(&mut self) -> StateGroups {
        let mut groups = StateGroups::new();

        for registration in self.registry.iter_mut() {
            let (entity, topics) = registration.split_mut();
            let Some(readings) = entity.read() else {
                continue;
            };

            let group = groups.entry(topics.state.clone()).or_default();
            for (key, value) in readings {
                if entity.signature().contains(&key) {
                    group.insert(key, value);
                } else {
                    error!(entity = %entity.name(), key = %key, "Undeclared state key dropped");
                }
            }
        }

        groups.retain(|_, readings| !readings.is_empty());
        debug!(groups = groups.len(), "Collected readings");
        groups
    }

    /// Read and publish, unless the broker is unavailable
    ///
    /// While the broker is down each call counts as a skipped read; once the
    /// threshold is reached a restart is requested instead.
    pub fn read_and_publish(&mut self) -> ReadOutcome {
        match self.connection.link() {
            LinkState::Connected => {}
            LinkState::BrokerDown => {
                if self.connection.record_skipped_read() {
                    error!(
                        skipped = self.connection.state().read_failure_count,
                        "Broker unreachable for too long, restart required"
                    );
                    return ReadOutcome::RestartRequired;
                }
                return ReadOutcome::Skipped;
            }
            LinkState::Disconnected | LinkState::Connecting => return ReadOutcome::Skipped,
        }

        let groups = self.collect_readings();
        if groups.is_empty() {
            return ReadOutcome::Empty;
        }
        let sent = self.publish_groups(&groups, false);
        self.last_readings = groups;
        ReadOutcome::Published(sent)
    }

    /// The most recent non-empty readings, by state topic
    pub fn last_readings(&self) -> &StateGroups {
        &self.last_readings
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("uid", &self.info.uid())
            .field("entities", &self.registry.len())
            .field("discovered", &self.discovered)
            .field("connection", &self.connection)
            .finish()
    }
}

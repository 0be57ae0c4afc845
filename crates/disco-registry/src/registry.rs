//! Entity registry with command-topic and interrupt indexes

use std::collections::HashMap;

use indexmap::IndexMap;
use tracing::{debug, error, info, instrument};

use disco_core::{DevicePayload, DiscoveryConfig, EntityName, TopicScheme};
use disco_entities::{discovery_configs, Entity, EntityTopics, InterruptSource};

use crate::{InterruptRouter, RegistryError, RegistryResult};

/// An entity together with the topics it was bound to at registration
pub struct Registration {
    entity: Box<dyn Entity>,
    topics: EntityTopics,
}

impl Registration {
    pub fn entity(&self) -> &dyn Entity {
        self.entity.as_ref()
    }

    pub fn entity_mut(&mut self) -> &mut dyn Entity {
        self.entity.as_mut()
    }

    pub fn topics(&self) -> &EntityTopics {
        &self.topics
    }

    /// Borrow the entity mutably alongside its topics
    pub fn split_mut(&mut self) -> (&mut dyn Entity, &EntityTopics) {
        (self.entity.as_mut(), &self.topics)
    }

    /// Discovery configs for this entity
    pub fn discovery_configs(&self, device: &DevicePayload) -> Vec<DiscoveryConfig> {
        discovery_configs(self.entity.as_ref(), &self.topics, device)
    }
}

/// Entity registry
///
/// Keyed by entity name. Insertion order is the device's declaration order
/// and drives both read order and discovery order.
pub struct EntityRegistry {
    scheme: TopicScheme,
    /// Primary index: name → entity
    entities: IndexMap<EntityName, Registration>,
    /// Command topic → entity names, in registration order
    by_command_topic: IndexMap<String, Vec<EntityName>>,
    /// Interrupt source → entity name
    by_interrupt: IndexMap<InterruptSource, EntityName>,
    /// Discovery topic → entity name
    by_discovery_topic: HashMap<String, EntityName>,
    /// (state topic, state key) → entity name
    by_state_key: HashMap<(String, String), EntityName>,
    frozen: bool,
}

impl EntityRegistry {
    /// Create an empty registry for a device topic scheme
    pub fn new(scheme: TopicScheme) -> Self {
        Self {
            scheme,
            entities: IndexMap::new(),
            by_command_topic: IndexMap::new(),
            by_interrupt: IndexMap::new(),
            by_discovery_topic: HashMap::new(),
            by_state_key: HashMap::new(),
            frozen: false,
        }
    }

    /// The device topic scheme every entity is bound to
    pub fn scheme(&self) -> &TopicScheme {
        &self.scheme
    }

    /// Register an entity
    ///
    /// Binds the entity to the device's prefix and UID, then indexes its
    /// command topic and interrupt source. Nothing is indexed when any check
    /// fails.
    #[instrument(skip_all, fields(entity = %entity.name()))]
    pub fn add(&mut self, entity: Box<dyn Entity>) -> RegistryResult<()> {
        let name = entity.name().clone();

        if self.frozen {
            error!("Registration after discovery");
            return Err(RegistryError::Frozen(name));
        }
        if self.entities.contains_key(&name) {
            error!("Duplicate entity name");
            return Err(RegistryError::DuplicateName(name));
        }

        let topics = EntityTopics::bind(&self.scheme, entity.as_ref());
        let discovery_topics = topics.discovery_topics(entity.as_ref());
        let state_keys: Vec<(String, String)> = entity
            .signature()
            .keys()
            .map(|key| (topics.state.clone(), key.to_string()))
            .collect();
        let interrupt = entity.as_interrupt_driven().map(|i| i.interrupt_source());

        self.check_collisions(&name, &discovery_topics, &state_keys, interrupt)?;

        for topic in discovery_topics {
            self.by_discovery_topic.insert(topic, name.clone());
        }
        for key in state_keys {
            self.by_state_key.insert(key, name.clone());
        }
        if let Some(command) = &topics.command {
            self.by_command_topic
                .entry(command.clone())
                .or_default()
                .push(name.clone());
            debug!(topic = %command, "Indexed command topic");
        }
        if let Some(source) = interrupt {
            self.by_interrupt.insert(source, name.clone());
            debug!(%source, "Indexed interrupt source");
        }

        info!(integration = %entity.integration(), "Registered entity");
        self.entities.insert(name, Registration { entity, topics });
        Ok(())
    }

    fn check_collisions(
        &self,
        name: &EntityName,
        discovery_topics: &[String],
        state_keys: &[(String, String)],
        interrupt: Option<InterruptSource>,
    ) -> RegistryResult<()> {
        for topic in discovery_topics {
            if let Some(existing) = self.by_discovery_topic.get(topic) {
                error!(topic = %topic, existing = %existing, "Discovery topic collision");
                return Err(RegistryError::TopicCollision {
                    topic: topic.clone(),
                    entity: name.clone(),
                    existing: existing.clone(),
                });
            }
        }

        for (state_topic, key) in state_keys {
            if let Some(existing) = self.by_state_key.get(&(state_topic.clone(), key.clone())) {
                error!(key = %key, existing = %existing, "State key collision");
                return Err(RegistryError::StateKeyCollision {
                    key: key.clone(),
                    state_topic: state_topic.clone(),
                    entity: name.clone(),
                    existing: existing.clone(),
                });
            }
        }

        if let Some(source) = interrupt {
            if let Some(existing) = self.by_interrupt.get(&source) {
                error!(%source, existing = %existing, "Interrupt source collision");
                return Err(RegistryError::InterruptInUse {
                    interrupt: source,
                    entity: name.clone(),
                    existing: existing.clone(),
                });
            }
        }

        Ok(())
    }

    /// Reject further registrations
    pub fn freeze(&mut self) {
        if !self.frozen {
            debug!(entities = self.entities.len(), "Registry frozen");
        }
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn get(&self, name: &str) -> Option<&Registration> {
        self.entities.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Registration> {
        self.entities.get_mut(name)
    }

    /// All entities in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &Registration> {
        self.entities.values()
    }

    /// All entities in declaration order, mutably
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Registration> {
        self.entities.values_mut()
    }

    /// Switches and lights
    pub fn commandable(&self) -> impl Iterator<Item = &Registration> {
        self.iter()
            .filter(|r| r.entity().as_commandable().is_some())
    }

    /// Entities that only report values and never need a subscription
    pub fn read_only(&self) -> impl Iterator<Item = &Registration> {
        self.iter()
            .filter(|r| r.entity().as_commandable().is_none())
    }

    /// Names in declaration order
    pub fn names(&self) -> impl Iterator<Item = &EntityName> {
        self.entities.keys()
    }

    /// Every command topic, in first-registration order
    pub fn command_topics(&self) -> impl Iterator<Item = &str> {
        self.by_command_topic.keys().map(String::as_str)
    }

    /// Entities commanded through `topic`, in registration order
    pub fn command_targets(&self, topic: &str) -> &[EntityName] {
        self.by_command_topic
            .get(topic)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Entity bound to an interrupt source
    pub fn interrupt_target(&self, source: InterruptSource) -> Option<&EntityName> {
        self.by_interrupt.get(&source)
    }

    /// Route table for every interrupt-driven entity
    pub fn interrupt_router(&self) -> InterruptRouter {
        let routes = self
            .by_interrupt
            .iter()
            .filter_map(|(source, name)| {
                let driven = self.entities.get(name)?.entity().as_interrupt_driven()?;
                Some((*source, (driven.edge(), driven.latch())))
            })
            .collect();
        InterruptRouter::new(routes)
    }

    /// Whether any interrupt-driven entity awaits a forced read
    pub fn interrupt_pending(&self) -> bool {
        self.by_interrupt.values().any(|name| {
            self.entities
                .get(name)
                .and_then(|r| r.entity().as_interrupt_driven())
                .is_some_and(|driven| driven.is_pending())
        })
    }

    /// Discovery configs of every entity, in declaration order
    pub fn discovery_configs(&self, device: &DevicePayload) -> Vec<DiscoveryConfig> {
        self.iter()
            .flat_map(|r| r.discovery_configs(device))
            .collect()
    }

    /// Every discovery topic the device publishes
    pub fn discovery_topics(&self) -> Vec<String> {
        self.iter()
            .flat_map(|r| r.topics().discovery_topics(r.entity()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

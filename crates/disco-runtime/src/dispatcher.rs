//! Routing of inbound messages

use tracing::{debug, instrument, warn};

use disco_core::BrokerStatus;

use crate::{Device, InboundMessage, ReadOutcome, StatusChange};

/// What a dispatched message led to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Broker status message, with its effect on the link
    Status(StatusChange),
    /// Command delivered to `entities`, followed by a forced read while
    /// connected
    Commanded { entities: usize, read: ReadOutcome },
    /// No entity listens on the topic
    Unmapped,
    /// Payload was not UTF-8
    Undecodable,
}

/// Routes inbound messages to the connection or to entities
#[derive(Debug, Clone, Copy, Default)]
pub struct Dispatcher;

impl Dispatcher {
    pub fn new() -> Self {
        Self
    }

    /// Handle one inbound message
    ///
    /// Status messages update broker liveness, and a broker coming back
    /// triggers a full rediscovery. Command messages reach every entity
    /// registered on the topic, in registration order, then force a read so
    /// the controller sees the new state straight away. Anything else is
    /// dropped, since other devices may share the bus.
    #[instrument(skip_all, fields(topic = %message.topic))]
    pub fn dispatch(&self, device: &mut Device, message: InboundMessage) -> DispatchOutcome {
        let InboundMessage { topic, payload } = message;
        let text = match String::from_utf8(payload) {
            Ok(text) => text,
            Err(err) => {
                warn!(%err, "Payload is not UTF-8");
                return DispatchOutcome::Undecodable;
            }
        };

        if topic == device.connection().status_topic() {
            let change = match text.parse::<BrokerStatus>() {
                Ok(status) => device.connection_mut().handle_status(status),
                Err(err) => {
                    warn!(%err, "Ignoring status message");
                    StatusChange::Unchanged
                }
            };
            if change == StatusChange::CameBack {
                device.discover();
            }
            return DispatchOutcome::Status(change);
        }

        let targets = device.registry().command_targets(&topic).to_vec();
        if targets.is_empty() {
            debug!("No entity on topic");
            return DispatchOutcome::Unmapped;
        }

        let mut entities = 0;
        for name in &targets {
            let commandable = device
                .registry_mut()
                .get_mut(name.as_str())
                .and_then(|registration| registration.entity_mut().as_commandable_mut());
            if let Some(entity) = commandable {
                debug!(entity = %name, payload = %text, "Command");
                entity.command(&text);
                entities += 1;
            }
        }

        // an outage is measured in scheduled reads only
        let read = if device.connection().is_connected() {
            device.read_and_publish()
        } else {
            debug!(link = %device.connection().link(), "Forced read skipped");
            ReadOutcome::Skipped
        };
        DispatchOutcome::Commanded { entities, read }
    }
}

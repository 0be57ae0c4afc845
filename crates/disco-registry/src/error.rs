//! Configuration errors raised while assembling a device

use disco_core::{EntityName, EntityNameError};
use disco_entities::InterruptSource;
use thiserror::Error;

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors in device setup
///
/// All of these are programmer mistakes in the device declaration. They are
/// raised at registration time and never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("cannot register '{0}': registry is frozen after discovery")]
    Frozen(EntityName),

    #[error("an entity named '{0}' is already registered")]
    DuplicateName(EntityName),

    #[error(transparent)]
    InvalidName(#[from] EntityNameError),

    #[error("discovery topic '{topic}' of '{entity}' is already used by '{existing}'")]
    TopicCollision {
        topic: String,
        entity: EntityName,
        existing: EntityName,
    },

    #[error("state key '{key}' of '{entity}' is already reported by '{existing}' on {state_topic}")]
    StateKeyCollision {
        key: String,
        state_topic: String,
        entity: EntityName,
        existing: EntityName,
    },

    #[error("interrupt source {interrupt} of '{entity}' is already bound to '{existing}'")]
    InterruptInUse {
        interrupt: InterruptSource,
        entity: EntityName,
        existing: EntityName,
    },
}

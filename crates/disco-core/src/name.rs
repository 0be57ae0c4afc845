//! Entity name type, unique within a device and embedded in topics

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for invalid entity names
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EntityNameError {
    #[error("entity name cannot be empty")]
    Empty,

    #[error("entity name '{0}' cannot contain whitespace")]
    Whitespace(String),

    #[error("entity name '{0}' cannot contain MQTT topic separators or wildcards ('/', '+', '#')")]
    TopicCharacter(String),
}

/// The name of an entity (e.g., "cputemp", "BoardLED")
///
/// Names become a topic level and part of every `unique_id`, so they must not
/// contain whitespace, `/`, or the MQTT wildcards `+` and `#`. Case is kept as
/// declared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityName(String);

impl EntityName {
    /// Validate and wrap a name
    pub fn new(name: impl Into<String>) -> Result<Self, EntityNameError> {
        let name = name.into();

        if name.is_empty() {
            return Err(EntityNameError::Empty);
        }
        if name.chars().any(char::is_whitespace) {
            return Err(EntityNameError::Whitespace(name));
        }
        if name.contains(['/', '+', '#']) {
            return Err(EntityNameError::TopicCharacter(name));
        }

        Ok(Self(name))
    }

    /// Get the name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for EntityName {
    type Err = EntityNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for EntityName {
    type Error = EntityNameError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl TryFrom<&str> for EntityName {
    type Error = EntityNameError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<EntityName> for String {
    fn from(name: EntityName) -> String {
        name.0
    }
}

impl AsRef<str> for EntityName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lets maps keyed by name be queried with a plain `&str`
impl Borrow<str> for EntityName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

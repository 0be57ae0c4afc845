//! Broker birth/last-will status payloads

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Payload on the status topic that is neither literal
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown broker status payload '{0}'")]
pub struct UnknownBrokerStatus(pub String);

/// Liveness announced on the well-known status topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrokerStatus {
    Online,
    Offline,
}

impl BrokerStatus {
    /// The payload literal
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

impl FromStr for BrokerStatus {
    type Err = UnknownBrokerStatus;

    /// Only the exact literals are accepted
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(Self::Online),
            "offline" => Ok(Self::Offline),
            other => Err(UnknownBrokerStatus(other.to_string())),
        }
    }
}

impl fmt::Display for BrokerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

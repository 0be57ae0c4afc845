//! Entity registry
//!
//! Owns every entity of a device in declaration order together with the
//! secondary indexes used at runtime:
//! - command topic → entity names (one topic may drive several entities)
//! - interrupt source → entity name (exactly one trigger per source)
//!
//! The registry is frozen when discovery first runs. Registering afterwards
//! is a configuration error.

mod error;
mod interrupts;
mod registry;

pub use error::{RegistryError, RegistryResult};
pub use interrupts::InterruptRouter;
pub use registry::{EntityRegistry, Registration};

//! Entity kinds for MQTT discovery devices
//!
//! Every entity is [`Readable`](Entity) and may opt into two further
//! capabilities:
//! - [`Commandable`]: accepts inbound command messages (switches, lights)
//! - [`InterruptDriven`]: forces an out-of-schedule read when a hardware
//!   interrupt fires (buttons, presence detectors)
//!
//! Hardware access goes through the collaborator traits in [`hardware`].

mod entity;
pub mod hardware;
mod light;
mod sensor;
mod switch;
mod trigger;

pub use entity::{
    discovery_configs, Commandable, Entity, EntityTopics, InterruptDriven, ValueTemplate,
};
pub use hardware::{
    AnalogInput, DigitalOutput, Edge, HardwareError, InterruptController, InterruptHandler,
    InterruptSource, PwmOutput,
};
pub use light::Light;
pub use sensor::{rp2040_temperature, AdcTemperature, Calibration, Sensor, SensorSource};
pub use switch::Switch;
pub use trigger::{InterruptLatch, Trigger, DEFAULT_DEBOUNCE};

/// Icon used for on/off sub-values without a more specific icon
pub const TOGGLE_ICON: &str = "mdi:toggle-switch";

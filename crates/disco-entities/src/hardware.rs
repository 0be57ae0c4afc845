//! Hardware collaborators
//!
//! Entities never touch pins or buses directly. They are handed one of these
//! traits at construction, which keeps them testable off-device. In-memory
//! implementations live in [`memory`].

use std::fmt;
use thiserror::Error;

/// Errors raised by hardware collaborators
#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("I/O error on {device}: {source}")]
    Io {
        device: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid reading from {device}: {reason}")]
    InvalidReading { device: String, reason: String },

    #[error("{0} is not available")]
    Unavailable(String),

    #[error("interrupt source {0} is already registered")]
    InterruptInUse(InterruptSource),
}

/// Analog-to-digital converter channel
pub trait AnalogInput: Send {
    /// Raw sample scaled to the full `u16` range
    fn read_u16(&mut self) -> Result<u16, HardwareError>;
}

/// On/off output line
pub trait DigitalOutput: Send {
    fn set(&mut self, on: bool) -> Result<(), HardwareError>;

    /// The level currently driven
    fn get(&self) -> Result<bool, HardwareError>;
}

/// Pulse-width modulated output
pub trait PwmOutput: Send {
    /// Set the duty cycle, clamped to `0.0..=1.0`
    fn set_duty(&mut self, duty: f32) -> Result<(), HardwareError>;

    fn duty(&self) -> Result<f32, HardwareError>;
}

/// Identifier of an interrupt line, usually the GPIO number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InterruptSource(pub u32);

impl fmt::Display for InterruptSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gpio{}", self.0)
    }
}

/// Signal edge an interrupt fires on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Edge {
    #[default]
    Rising,
    Falling,
    Both,
}

/// Callback run in interrupt context. It must not block.
pub type InterruptHandler = Box<dyn Fn(InterruptSource) + Send + Sync>;

/// Registers callbacks against interrupt lines
pub trait InterruptController {
    fn register(
        &mut self,
        source: InterruptSource,
        edge: Edge,
        handler: InterruptHandler,
    ) -> Result<(), HardwareError>;
}

pub mod memory {
    //! In-memory collaborators for tests and dry runs
    //!
    //! Each type hands out cheap clones that share state, so a test can keep
    //! a handle and inspect what an entity drove.

    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    /// Digital output backed by a shared flag
    #[derive(Debug, Clone, Default)]
    pub struct MemoryOutput {
        level: Arc<AtomicBool>,
    }

    impl MemoryOutput {
        pub fn new(initial: bool) -> Self {
            Self {
                level: Arc::new(AtomicBool::new(initial)),
            }
        }

        pub fn is_on(&self) -> bool {
            self.level.load(Ordering::SeqCst)
        }
    }

    impl DigitalOutput for MemoryOutput {
        fn set(&mut self, on: bool) -> Result<(), HardwareError> {
            self.level.store(on, Ordering::SeqCst);
            Ok(())
        }

        fn get(&self) -> Result<bool, HardwareError> {
            Ok(self.is_on())
        }
    }

    /// PWM output backed by a shared duty cycle
    #[derive(Debug, Clone, Default)]
    pub struct MemoryPwm {
        duty_bits: Arc<AtomicU32>,
    }

    impl MemoryPwm {
        pub fn new(duty: f32) -> Self {
            Self {
                duty_bits: Arc::new(AtomicU32::new(duty.clamp(0.0, 1.0).to_bits())),
            }
        }

        pub fn current(&self) -> f32 {
            f32::from_bits(self.duty_bits.load(Ordering::SeqCst))
        }
    }

    impl PwmOutput for MemoryPwm {
        fn set_duty(&mut self, duty: f32) -> Result<(), HardwareError> {
            self.duty_bits
                .store(duty.clamp(0.0, 1.0).to_bits(), Ordering::SeqCst);
            Ok(())
        }

        fn duty(&self) -> Result<f32, HardwareError> {
            Ok(self.current())
        }
    }

    /// Analog input returning whatever sample was last stored
    #[derive(Debug, Clone, Default)]
    pub struct MemoryAnalog {
        raw: Arc<AtomicU16>,
        failing: Arc<AtomicBool>,
    }

    impl MemoryAnalog {
        pub fn new(raw: u16) -> Self {
            Self {
                raw: Arc::new(AtomicU16::new(raw)),
                failing: Arc::default(),
            }
        }

        pub fn store(&self, raw: u16) {
            self.raw.store(raw, Ordering::SeqCst);
        }

        /// Make subsequent reads fail
        pub fn fail(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }
    }

    impl AnalogInput for MemoryAnalog {
        fn read_u16(&mut self) -> Result<u16, HardwareError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(HardwareError::Unavailable("memory adc".to_string()));
            }
            Ok(self.raw.load(Ordering::SeqCst))
        }
    }

    /// Interrupt controller that fires handlers on demand
    #[derive(Clone, Default)]
    pub struct MemoryInterrupts {
        handlers: Arc<Mutex<Vec<(InterruptSource, Edge, Arc<InterruptHandler>)>>>,
    }

    impl MemoryInterrupts {
        pub fn new() -> Self {
            Self::default()
        }

        /// Simulate the line going active. Returns false when nothing is
        /// registered for `source`.
        pub fn fire(&self, source: InterruptSource) -> bool {
            let Ok(handlers) = self.handlers.lock() else {
                return false;
            };
            let handler = handlers
                .iter()
                .find(|(s, _, _)| *s == source)
                .map(|(_, _, h)| h.clone());
            // handlers may re-enter the table
            drop(handlers);

            match handler {
                Some(handler) => {
                    (**handler)(source);
                    true
                }
                None => false,
            }
        }

        /// Edge a source was registered with
        pub fn edge(&self, source: InterruptSource) -> Option<Edge> {
            let handlers = self.handlers.lock().ok()?;
            let edge = handlers
                .iter()
                .find(|(s, _, _)| *s == source)
                .map(|(_, edge, _)| *edge);
            edge
        }
    }

    impl InterruptController for MemoryInterrupts {
        fn register(
            &mut self,
            source: InterruptSource,
            edge: Edge,
            handler: InterruptHandler,
        ) -> Result<(), HardwareError> {
            let mut handlers = self
                .handlers
                .lock()
                .map_err(|_| HardwareError::Unavailable("interrupt table".to_string()))?;

            if handlers.iter().any(|(s, _, _)| *s == source) {
                return Err(HardwareError::InterruptInUse(source));
            }
            handlers.push((source, edge, Arc::new(handler)));
            Ok(())
        }
    }

}

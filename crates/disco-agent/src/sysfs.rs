//! File-backed hardware for Linux boards
//!
//! Covers the sysfs interfaces a single-board computer exposes: GPIO value
//! files, PWM channels, thermal zones and IIO ADC channels. Interrupts are
//! emulated by polling GPIO value files from a background thread.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use disco_core::Readings;
use disco_entities::{
    AnalogInput, DigitalOutput, Edge, HardwareError, InterruptController, InterruptHandler,
    InterruptSource, PwmOutput, SensorSource,
};
use serde_json::Value;
use tracing::{debug, trace, warn};

fn read_trimmed(path: &Path) -> Result<String, HardwareError> {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|source| HardwareError::Io {
            device: path.display().to_string(),
            source,
        })
}

fn write_value(path: &Path, value: &str) -> Result<(), HardwareError> {
    fs::write(path, value).map_err(|source| HardwareError::Io {
        device: path.display().to_string(),
        source,
    })
}

fn parse<T: std::str::FromStr>(path: &Path, raw: &str) -> Result<T, HardwareError> {
    raw.parse().map_err(|_| HardwareError::InvalidReading {
        device: path.display().to_string(),
        reason: format!("'{raw}' is not a number"),
    })
}

/// ADC channel whose file holds a raw 16-bit sample
#[derive(Debug, Clone)]
pub struct FileAnalog {
    path: PathBuf,
}

impl FileAnalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl AnalogInput for FileAnalog {
    fn read_u16(&mut self) -> Result<u16, HardwareError> {
        let raw = read_trimmed(&self.path)?;
        parse(&self.path, &raw)
    }
}

/// Thermal zone reporting millidegrees Celsius
#[derive(Debug, Clone)]
pub struct ThermalZone {
    path: PathBuf,
    key: String,
}

impl ThermalZone {
    pub fn new(path: impl Into<PathBuf>, key: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            key: key.into(),
        }
    }
}

impl SensorSource for ThermalZone {
    fn sample(&mut self) -> Result<Readings, HardwareError> {
        let raw = read_trimmed(&self.path)?;
        let millidegrees: i64 = parse(&self.path, &raw)?;

        let mut readings = Readings::new();
        readings.insert(self.key.clone(), Value::from(millidegrees as f64 / 1000.0));
        Ok(readings)
    }
}

/// GPIO output driven through its `value` file
#[derive(Debug, Clone)]
pub struct GpioOutput {
    path: PathBuf,
}

impl GpioOutput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DigitalOutput for GpioOutput {
    fn set(&mut self, on: bool) -> Result<(), HardwareError> {
        write_value(&self.path, if on { "1" } else { "0" })
    }

    fn get(&self) -> Result<bool, HardwareError> {
        Ok(read_trimmed(&self.path)? != "0")
    }
}

/// PWM channel directory holding `period` and `duty_cycle` in nanoseconds
#[derive(Debug, Clone)]
pub struct PwmChannel {
    dir: PathBuf,
    period_ns: u64,
}

impl PwmChannel {
    /// Open a channel, reading its configured period
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, HardwareError> {
        let dir = dir.into();
        let period_path = dir.join("period");
        let period_ns: u64 = parse(&period_path, &read_trimmed(&period_path)?)?;
        if period_ns == 0 {
            return Err(HardwareError::InvalidReading {
                device: period_path.display().to_string(),
                reason: "period is zero".to_string(),
            });
        }
        Ok(Self { dir, period_ns })
    }
}

impl PwmOutput for PwmChannel {
    fn set_duty(&mut self, duty: f32) -> Result<(), HardwareError> {
        let duty = duty.clamp(0.0, 1.0) as f64;
        let duty_ns = (self.period_ns as f64 * duty).round() as u64;
        write_value(&self.dir.join("duty_cycle"), &duty_ns.to_string())
    }

    fn duty(&self) -> Result<f32, HardwareError> {
        let path = self.dir.join("duty_cycle");
        let duty_ns: u64 = parse(&path, &read_trimmed(&path)?)?;
        Ok((duty_ns as f64 / self.period_ns as f64).clamp(0.0, 1.0) as f32)
    }
}

/// Default value file for a GPIO line
pub fn gpio_value_path(source: InterruptSource) -> PathBuf {
    PathBuf::from(format!("/sys/class/gpio/gpio{}/value", source.0))
}

struct Watch {
    source: InterruptSource,
    path: PathBuf,
    edge: Edge,
    handler: InterruptHandler,
    level: Option<bool>,
}

impl Watch {
    fn sample(&mut self) {
        let level = match read_trimmed(&self.path) {
            Ok(raw) => raw != "0",
            Err(err) => {
                trace!(source = %self.source, %err, "Interrupt line unreadable");
                return;
            }
        };

        let previous = self.level.replace(level);
        let fired = match (previous, level, self.edge) {
            (Some(false), true, Edge::Rising | Edge::Both) => true,
            (Some(true), false, Edge::Falling | Edge::Both) => true,
            _ => false,
        };
        if fired {
            (self.handler)(self.source);
        }
    }
}

/// Interrupt controller that polls GPIO value files for edges
///
/// Lines are declared with [`watch`](Self::watch) before handlers are
/// registered; [`start`](Self::start) hands everything to a polling thread.
#[derive(Default)]
pub struct PollingInterrupts {
    paths: HashMap<InterruptSource, PathBuf>,
    watches: Vec<Watch>,
}

impl PollingInterrupts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the value file backing a line
    pub fn watch(&mut self, source: InterruptSource, path: impl Into<PathBuf>) {
        self.paths.insert(source, path.into());
    }

    pub fn len(&self) -> usize {
        self.watches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }

    /// Sample every line once
    fn poll(&mut self) {
        for watch in &mut self.watches {
            watch.sample();
        }
    }

    /// Poll on a background thread for the life of the process
    pub fn start(mut self, period: Duration) -> std::io::Result<Option<thread::JoinHandle<()>>> {
        if self.watches.is_empty() {
            return Ok(None);
        }
        debug!(lines = self.watches.len(), ?period, "Starting interrupt poller");
        thread::Builder::new()
            .name("interrupts".to_string())
            .spawn(move || loop {
                self.poll();
                thread::sleep(period);
            })
            .map(Some)
    }
}

impl InterruptController for PollingInterrupts {
    fn register(
        &mut self,
        source: InterruptSource,
        edge: Edge,
        handler: InterruptHandler,
    ) -> Result<(), HardwareError> {
        if self.watches.iter().any(|w| w.source == source) {
            return Err(HardwareError::InterruptInUse(source));
        }
        let Some(path) = self.paths.get(&source).cloned() else {
            warn!(%source, "No value file declared for interrupt line");
            return Err(HardwareError::Unavailable(source.to_string()));
        };

        self.watches.push(Watch {
            source,
            path,
            edge,
            handler,
            level: None,
        });
        Ok(())
    }
}

//! Read-only sensors

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, warn};

use disco_core::{EntityName, IntegrationKind, Readings, Signature, SignatureEntry, ValueTransform};

use crate::{AnalogInput, Entity, HardwareError};

/// Something a [`Sensor`] samples
pub trait SensorSource: Send {
    /// Produce one set of raw values keyed by signature sub-key
    fn sample(&mut self) -> Result<Readings, HardwareError>;
}

impl<F> SensorSource for F
where
    F: FnMut() -> Result<Readings, HardwareError> + Send,
{
    fn sample(&mut self) -> Result<Readings, HardwareError> {
        self()
    }
}

/// Per-sub-key offsets added to numeric readings
///
/// Calibration is explicit configuration handed to the sensor at
/// construction, never state shared between instances.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Calibration {
    offsets: IndexMap<String, f64>,
}

impl Calibration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `offset` to every reading of `key`
    pub fn offset(mut self, key: impl Into<String>, offset: f64) -> Self {
        self.offsets.insert(key.into(), offset);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Apply offsets in place. Non-numeric values are left alone.
    pub fn apply(&self, readings: &mut Readings) {
        for (key, offset) in &self.offsets {
            let Some(value) = readings.get_mut(key) else {
                continue;
            };
            match value.as_f64() {
                Some(raw) => *value = Value::from(raw + offset),
                None => debug!(key = %key, "Skipping calibration of non-numeric reading"),
            }
        }
    }
}

impl FromIterator<(String, f64)> for Calibration {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self {
            offsets: iter.into_iter().collect(),
        }
    }
}

/// Convert a raw RP2040 temperature-channel sample to degrees Celsius
pub fn rp2040_temperature(raw: u16) -> f64 {
    let volts = f64::from(raw) * 3.3 / 65536.0;
    27.0 - (volts - 0.706) / 0.001721
}

/// On-die temperature read through an ADC channel
pub struct AdcTemperature {
    key: String,
    adc: Box<dyn AnalogInput>,
}

impl AdcTemperature {
    pub fn new(key: impl Into<String>, adc: Box<dyn AnalogInput>) -> Self {
        Self {
            key: key.into(),
            adc,
        }
    }
}

impl SensorSource for AdcTemperature {
    fn sample(&mut self) -> Result<Readings, HardwareError> {
        let raw = self.adc.read_u16()?;
        let mut readings = Readings::new();
        readings.insert(self.key.clone(), Value::from(rp2040_temperature(raw)));
        Ok(readings)
    }
}

/// A readable entity backed by a [`SensorSource`]
pub struct Sensor {
    name: EntityName,
    signature: Signature,
    source: Box<dyn SensorSource>,
    calibration: Calibration,
}

impl Sensor {
    pub fn new(name: EntityName, signature: Signature, source: Box<dyn SensorSource>) -> Self {
        Self {
            name,
            signature,
            source,
            calibration: Calibration::new(),
        }
    }

    /// Set the calibration offsets
    pub fn with_calibration(mut self, calibration: Calibration) -> Self {
        self.calibration = calibration;
        self
    }

    /// A sensor that always reports the same value
    ///
    /// Used for diagnostics such as the device IP address or UID. The single
    /// sub-key is `subkey` when given, otherwise the entity name.
    pub fn constant(
        name: EntityName,
        value: impl Into<Value>,
        subkey: Option<&str>,
        entry: SignatureEntry,
    ) -> Self {
        let key = subkey.unwrap_or(name.as_str()).to_string();
        let value = value.into();
        let signature = Signature::single(key.clone(), entry);

        let source = move || -> Result<Readings, HardwareError> {
            let mut readings = Readings::new();
            readings.insert(key.clone(), value.clone());
            Ok(readings)
        };

        Self::new(name, signature, Box::new(source))
    }

    /// On-die temperature sensor, reported in degrees Celsius rounded to
    /// two places by the controller
    pub fn cpu_temperature(name: EntityName, adc: Box<dyn AnalogInput>) -> Self {
        let key = name.as_str().to_string();
        let signature = Signature::single(
            key.clone(),
            SignatureEntry::new()
                .icon("mdi:thermometer")
                .unit("C")
                .transform(ValueTransform::Round(2)),
        );
        Self::new(name, signature, Box::new(AdcTemperature::new(key, adc)))
    }
}

impl Entity for Sensor {
    fn name(&self) -> &EntityName {
        &self.name
    }

    fn integration(&self) -> IntegrationKind {
        IntegrationKind::Sensor
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn read(&mut self) -> Option<Readings> {
        match self.source.sample() {
            Ok(mut readings) if !readings.is_empty() => {
                self.calibration.apply(&mut readings);
                Some(readings)
            }
            Ok(_) => None,
            Err(e) => {
                warn!(entity = %self.name, error = %e, "Sensor read failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::memory::MemoryAnalog;
    use serde_json::json;

    fn name(s: &str) -> EntityName {
        s.parse().unwrap()
    }

    #[test]
    fn test_constant_sensor() {
        let mut sensor = Sensor::constant(
            name("IP"),
            "192.168.1.20",
            None,
            SignatureEntry::new().icon("mdi:ip-network"),
        );

        assert!(sensor.signature().contains("IP"));
        let readings = sensor.read().unwrap();
        assert_eq!(readings["IP"], json!("192.168.1.20"));
        assert_eq!(sensor.read(), Some(readings));
    }

    #[test]
    fn test_constant_sensor_subkey() {
        let mut sensor = Sensor::constant(name("board"), 3, Some("revision"), SignatureEntry::new());
        assert_eq!(sensor.read().unwrap()["revision"], json!(3));
    }

    #[test]
    fn test_rp2040_temperature() {
        // 0.706 V is 27 C by definition
        let raw = (0.706 / 3.3 * 65536.0) as u16;
        assert!((rp2040_temperature(raw) - 27.0).abs() < 0.1);
        // hotter die, lower voltage
        assert!(rp2040_temperature(raw - 200) > 27.0);
    }

    #[test]
    fn test_cpu_temperature_read() {
        let adc = MemoryAnalog::new(14000);
        let mut sensor = Sensor::cpu_temperature(name("cputemp"), Box::new(adc.clone()));

        let readings = sensor.read().unwrap();
        let temp = readings["cputemp"].as_f64().unwrap();
        assert!((temp - rp2040_temperature(14000)).abs() < f64::EPSILON);

        adc.fail(true);
        assert_eq!(sensor.read(), None);
    }

    #[test]
    fn test_calibration_applied() {
        let source = || -> Result<Readings, HardwareError> {
            let mut readings = Readings::new();
            readings.insert("co2".to_string(), json!(400));
            readings.insert("label".to_string(), json!("scd40"));
            Ok(readings)
        };
        let mut sensor = Sensor::new(
            name("scd40"),
            Signature::new()
                .with("co2", SignatureEntry::new().unit("ppm"))
                .with("label", SignatureEntry::new()),
            Box::new(source),
        )
        .with_calibration(Calibration::new().offset("co2", -25.0).offset("label", 1.0));

        let readings = sensor.read().unwrap();
        assert_eq!(readings["co2"].as_f64(), Some(375.0));
        assert_eq!(readings["label"], json!("scd40"));
    }

    #[test]
    fn test_calibration_per_instance() {
        let source = || -> Result<Readings, HardwareError> {
            let mut readings = Readings::new();
            readings.insert("t".to_string(), json!(20.0));
            Ok(readings)
        };
        let mut calibrated = Sensor::new(
            name("a"),
            Signature::single("t", SignatureEntry::new()),
            Box::new(source),
        )
        .with_calibration([("t".to_string(), 1.5)].into_iter().collect());
        let mut plain = Sensor::new(
            name("b"),
            Signature::single("t", SignatureEntry::new()),
            Box::new(source),
        );

        assert_eq!(calibrated.read().unwrap()["t"].as_f64(), Some(21.5));
        assert_eq!(plain.read().unwrap()["t"].as_f64(), Some(20.0));
    }

    #[test]
    fn test_empty_sample_is_nothing_to_report() {
        let mut sensor = Sensor::new(
            name("idle"),
            Signature::single("idle", SignatureEntry::new()),
            Box::new(|| -> Result<Readings, HardwareError> { Ok(Readings::new()) }),
        );
        assert_eq!(sensor.read(), None);
    }
}

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::Result;

/// One conversion as reported by the sensor, before validation. A missing temperature or a
/// gas resistance of zero marks the conversion as unusable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSample {
    pub temperature: Option<f64>,
    /// Relative humidity in percent.
    pub humidity: f64,
    /// Pressure in hPa.
    pub pressure: f64,
    /// Gas resistance in ohms.
    pub gas_resistance: f64,
}

/// Anything that can produce a temperature/humidity/pressure/gas snapshot on demand.
pub trait EnvironmentSensor {
    fn sample(&mut self) -> Result<RawSample>;
}

/// A validated snapshot. `timestamp` is wall-clock time for display, `uptime` the clock's
/// monotonic time, which is what elapsed-time checks use.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    pub uptime: Duration,
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub gas_resistance: f64,
}

impl Reading {
    /// Stamps `sample` with the current time of `clock`. Returns `None` for samples that must
    /// not be scored.
    pub fn from_sample(clock: &(impl Clock + ?Sized), sample: RawSample) -> Option<Self> {
        let temperature = sample.temperature.filter(|t| t.is_finite())?;
        if !sample.humidity.is_finite() || !sample.pressure.is_finite() {
            return None;
        }
        if !(sample.gas_resistance.is_finite() && sample.gas_resistance > 0.0) {
            return None;
        }
        Some(Self {
            timestamp: clock.now(),
            uptime: clock.monotonic(),
            temperature,
            humidity: sample.humidity,
            pressure: sample.pressure,
            gas_resistance: sample.gas_resistance,
        })
    }
}

//! Runtime configuration, read from `AMBIENT_*` environment variables.

use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use crate::bme680::{FilterSize, Oversampling, SensorSettings, SECONDARY_ADDRESS};
use crate::calibration::Baseline;
use crate::iaq::{IaqScale, IaqScorer, DEFAULT_HUMIDITY_BASELINE, DEFAULT_HUMIDITY_WEIGHT};
use crate::{Error, Result};

pub const DEFAULT_GAS_BASELINE: f64 = 180_000.0;

/// How the clean-air gas baseline is obtained.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BaselineMode {
    /// Use a known resistance, no calibration.
    Fixed(Baseline),
    /// Average `samples` readings taken `interval` apart before monitoring starts.
    Blocking { samples: u32, interval: Duration },
    /// Accumulate `samples` readings at most one per `delay` while monitoring.
    TimeGated { samples: u32, delay: Duration },
}

impl BaselineMode {
    /// How long start-up calibration blocks for. Zero for the other modes.
    pub fn blocking_wait(&self) -> Duration {
        match *self {
            BaselineMode::Blocking { samples, interval } => interval.saturating_mul(samples),
            BaselineMode::Fixed(_) | BaselineMode::TimeGated { .. } => Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub i2c_address: u16,
    pub sensor: SensorSettings,
    pub baseline: BaselineMode,
    pub humidity_baseline: f64,
    pub humidity_weight: f64,
    pub iaq_scale: IaqScale,
    pub poll_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from `lookup`, which maps a variable name to its value.
    /// Unset variables take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let vars = Vars(&lookup);

        let i2c_address = match vars.get("AMBIENT_I2C_ADDRESS") {
            Some(value) => parse_address(&value)
                .ok_or_else(|| Error::config("AMBIENT_I2C_ADDRESS", format!("{:?}", value)))?,
            None => SECONDARY_ADDRESS,
        };

        let defaults = SensorSettings::default();
        let sensor = SensorSettings {
            humidity_oversampling: vars.oversampling(
                "AMBIENT_HUMIDITY_OVERSAMPLING",
                defaults.humidity_oversampling,
            )?,
            pressure_oversampling: vars.oversampling(
                "AMBIENT_PRESSURE_OVERSAMPLING",
                defaults.pressure_oversampling,
            )?,
            temperature_oversampling: vars.oversampling(
                "AMBIENT_TEMPERATURE_OVERSAMPLING",
                defaults.temperature_oversampling,
            )?,
            filter: match vars.parse::<u8>("AMBIENT_FILTER_SIZE")? {
                Some(size) => FilterSize::from_coefficient(size).ok_or_else(|| {
                    Error::config("AMBIENT_FILTER_SIZE", "expected 0, 1, 3, 7, 15, 31, 63 or 127")
                })?,
                None => defaults.filter,
            },
            heater_temperature: vars
                .parse("AMBIENT_HEATER_TEMPERATURE")?
                .unwrap_or(defaults.heater_temperature),
            heater_duration: vars
                .parse("AMBIENT_HEATER_DURATION_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.heater_duration),
        };

        let baseline = match vars.get("AMBIENT_BASELINE_MODE").as_deref() {
            None | Some("blocking") => BaselineMode::Blocking {
                samples: vars.samples(120)?,
                interval: vars.secs("AMBIENT_CALIBRATION_INTERVAL_SECS", 1)?,
            },
            Some("timed") => BaselineMode::TimeGated {
                samples: vars.samples(60)?,
                delay: vars.secs("AMBIENT_CALIBRATION_INTERVAL_SECS", 5)?,
            },
            Some("fixed") => {
                let ohms = vars
                    .parse("AMBIENT_GAS_BASELINE")?
                    .unwrap_or(DEFAULT_GAS_BASELINE);
                BaselineMode::Fixed(Baseline::new(ohms)?)
            }
            Some(other) => {
                return Err(Error::config(
                    "AMBIENT_BASELINE_MODE",
                    format!("{:?} is not one of blocking, timed, fixed", other),
                ))
            }
        };

        let iaq_scale = match vars.get("AMBIENT_IAQ_SCALE").as_deref() {
            None | Some("percent") => IaqScale::Percent,
            Some("index") => IaqScale::Index,
            Some(other) => {
                return Err(Error::config(
                    "AMBIENT_IAQ_SCALE",
                    format!("{:?} is not one of percent, index", other),
                ))
            }
        };

        let config = Self {
            i2c_address,
            sensor,
            baseline,
            humidity_baseline: vars
                .parse("AMBIENT_HUMIDITY_BASELINE")?
                .unwrap_or(DEFAULT_HUMIDITY_BASELINE),
            humidity_weight: vars
                .parse("AMBIENT_HUMIDITY_WEIGHT")?
                .unwrap_or(DEFAULT_HUMIDITY_WEIGHT),
            iaq_scale,
            poll_interval: vars.secs("AMBIENT_POLL_INTERVAL_SECS", 1)?,
        };
        // reject bad tunables now rather than after a long calibration
        config.scorer()?;
        Ok(config)
    }

    pub fn scorer(&self) -> Result<IaqScorer> {
        IaqScorer::new(self.humidity_baseline, self.humidity_weight, self.iaq_scale)
    }
}

struct Vars<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Vars<'_, F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
    }

    fn parse<T>(&self, key: &'static str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.get(key)
            .map(|value| {
                value
                    .parse()
                    .map_err(|e| Error::config(key, format!("{:?}: {}", value, e)))
            })
            .transpose()
    }

    fn secs(&self, key: &'static str, default: u64) -> Result<Duration> {
        Ok(Duration::from_secs(self.parse(key)?.unwrap_or(default)))
    }

    fn samples(&self, default: u32) -> Result<u32> {
        let samples = self
            .parse("AMBIENT_CALIBRATION_SAMPLES")?
            .unwrap_or(default);
        if samples == 0 {
            return Err(Error::config(
                "AMBIENT_CALIBRATION_SAMPLES",
                "at least one sample is required",
            ));
        }
        Ok(samples)
    }

    fn oversampling(&self, key: &'static str, default: Oversampling) -> Result<Oversampling> {
        match self.parse::<u8>(key)? {
            Some(factor) => Oversampling::from_factor(factor)
                .ok_or_else(|| Error::config(key, "expected 0, 1, 2, 4, 8 or 16")),
            None => Ok(default),
        }
    }
}

fn parse_address(value: &str) -> Option<u16> {
    let address = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u16::from_str_radix(hex, 16).ok()?,
        None => value.parse().ok()?,
    };
    // 7-bit addressing only
    (address <= 0x7f).then_some(address)
}

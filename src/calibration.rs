//! Gas baseline calibration.
//!
//! The baseline is the gas resistance the sensor reports in clean air. It is either configured
//! up front, averaged over a blocking warm-up period, or accumulated from readings taken
//! during normal polling. Once established it never changes.

use std::fmt;
use std::time::Duration;

use log::{debug, info};

use crate::clock::Clock;
use crate::sensor::{EnvironmentSensor, Reading};
use crate::{Error, Result};

/// Clean-air gas resistance in ohms. Always positive and finite.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Baseline(f64);

impl Baseline {
    pub fn new(ohms: f64) -> Result<Self> {
        if ohms.is_finite() && ohms > 0.0 {
            Ok(Self(ohms))
        } else {
            Err(Error::InvalidBaseline(ohms))
        }
    }

    pub fn ohms(self) -> f64 {
        self.0
    }
}

impl fmt::Display for Baseline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.0} Ω", self.0)
    }
}

/// Averages `samples` gas readings taken `interval` apart. Blocks for the whole period.
///
/// Samples the sensor flags as invalid are left out of the average. `progress` is called after
/// every attempt with the number of attempts made so far and the total.
pub fn calibrate_blocking<S, C>(
    sensor: &mut S,
    clock: &C,
    samples: u32,
    interval: Duration,
    mut progress: impl FnMut(u32, u32),
) -> Result<Baseline>
where
    S: EnvironmentSensor + ?Sized,
    C: Clock + ?Sized,
{
    info!("calibrating gas baseline from {} samples", samples);
    let mut total_gas = 0.0;
    let mut accepted = 0u32;
    for attempt in 1..=samples {
        let sample = sensor.sample()?;
        match Reading::from_sample(clock, sample) {
            Some(reading) => {
                total_gas += reading.gas_resistance;
                accepted += 1;
            }
            None => debug!("ignoring invalid calibration sample {:?}", sample),
        }
        progress(attempt, samples);
        clock.sleep(interval);
    }

    if accepted == 0 {
        return Err(Error::NoCalibrationSamples);
    }
    let baseline = Baseline::new(total_gas / accepted as f64)?;
    info!(
        "gas baseline {} from {}/{} samples",
        baseline, accepted, samples
    );
    Ok(baseline)
}

#[derive(Debug, Clone, PartialEq)]
enum CalibrationState {
    Calibrating {
        /// Monotonic stamp of the last accepted sample.
        last_sample_time: Option<Duration>,
        total_gas: f64,
        sample_count: u32,
    },
    Calibrated(Baseline),
}

/// Builds the baseline from the readings the polling loop already takes, accepting at most
/// one sample per `delay`. Never sleeps.
#[derive(Debug, Clone)]
pub struct TimeGatedCalibrator {
    target: u32,
    delay: Duration,
    state: CalibrationState,
}

impl TimeGatedCalibrator {
    pub fn new(target: u32, delay: Duration) -> Result<Self> {
        if target == 0 {
            return Err(Error::config(
                "AMBIENT_CALIBRATION_SAMPLES",
                "at least one sample is required",
            ));
        }
        Ok(Self {
            target,
            delay,
            state: CalibrationState::Calibrating {
                last_sample_time: None,
                total_gas: 0.0,
                sample_count: 0,
            },
        })
    }

    #[cfg(test)]
    fn state(&self) -> &CalibrationState {
        &self.state
    }

    pub fn baseline(&self) -> Option<Baseline> {
        match self.state {
            CalibrationState::Calibrated(baseline) => Some(baseline),
            CalibrationState::Calibrating { .. } => None,
        }
    }

    /// Offers `reading` to the accumulator. The first reading is always taken; later ones only
    /// once `delay` has passed since the previously accepted one.
    pub fn observe(&mut self, reading: &Reading) -> BaselineStatus {
        let CalibrationState::Calibrating {
            last_sample_time,
            total_gas,
            sample_count,
        } = &mut self.state
        else {
            return self.status();
        };

        let due = match *last_sample_time {
            None => true,
            Some(last) => reading
                .uptime
                .checked_sub(last)
                .is_some_and(|elapsed| elapsed >= self.delay),
        };
        if !due {
            return self.status();
        }

        *last_sample_time = Some(reading.uptime);
        *total_gas += reading.gas_resistance;
        *sample_count += 1;
        debug!(
            "calibration sample {}/{}: {:.0} Ω",
            sample_count, self.target, reading.gas_resistance
        );

        if *sample_count >= self.target {
            // readings always carry a positive gas resistance, so the mean is positive too
            let baseline = Baseline(*total_gas / *sample_count as f64);
            info!("gas baseline {} from {} samples", baseline, sample_count);
            self.state = CalibrationState::Calibrated(baseline);
        }
        self.status()
    }

    fn status(&self) -> BaselineStatus {
        match self.state {
            CalibrationState::Calibrated(baseline) => BaselineStatus::Ready(baseline),
            CalibrationState::Calibrating { sample_count, .. } => BaselineStatus::Calibrating {
                accepted: sample_count,
                target: self.target,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BaselineStatus {
    Ready(Baseline),
    Calibrating { accepted: u32, target: u32 },
}

/// Baseline source owned by the polling loop. Blocking calibration finishes before the loop
/// starts and is represented here by its result.
#[derive(Debug, Clone)]
pub enum Calibrator {
    Fixed(Baseline),
    TimeGated(TimeGatedCalibrator),
}

impl Calibrator {
    pub fn observe(&mut self, reading: &Reading) -> BaselineStatus {
        match self {
            Calibrator::Fixed(baseline) => BaselineStatus::Ready(*baseline),
            Calibrator::TimeGated(calibrator) => calibrator.observe(reading),
        }
    }
}

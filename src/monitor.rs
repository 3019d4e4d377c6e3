use std::fmt;
use std::time::Duration;

use log::{debug, warn};

use crate::calibration::{BaselineStatus, Calibrator};
use crate::clock::Clock;
use crate::iaq::{IaqScore, IaqScorer};
use crate::sensor::{EnvironmentSensor, Reading};
use crate::session::SessionClock;
use crate::Result;

/// Air quality part of a report. No score is produced until the baseline is known.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IaqStatus {
    Score(IaqScore),
    Calibrating { accepted: u32, target: u32 },
}

/// Outcome of one successful polling cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub elapsed: String,
    pub reading: Reading,
    pub iaq: IaqStatus,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = &self.reading;
        write!(
            f,
            "[{}] T: {:.1} °C | RH: {:.1} % | P: {:.1} hPa | Gas: {:.0} Ω | IAQ: ",
            self.elapsed, r.temperature, r.humidity, r.pressure, r.gas_resistance
        )?;
        match &self.iaq {
            IaqStatus::Score(score) => write!(f, "{} ({})", score, score.category()),
            IaqStatus::Calibrating { accepted, target } => {
                write!(f, "calibrating ({}/{})", accepted, target)
            }
        }
    }
}

/// Single-threaded polling loop: read, calibrate, score, report, sleep.
pub struct Monitor<S, C> {
    sensor: S,
    clock: C,
    calibrator: Calibrator,
    scorer: IaqScorer,
    session: SessionClock,
}

impl<S: EnvironmentSensor, C: Clock> Monitor<S, C> {
    pub fn new(sensor: S, clock: C, calibrator: Calibrator, scorer: IaqScorer) -> Self {
        Self {
            sensor,
            clock,
            calibrator,
            scorer,
            session: SessionClock::default(),
        }
    }

    pub fn calibrator(&self) -> &Calibrator {
        &self.calibrator
    }

    /// Takes one reading. Returns `Ok(None)` when the sensor flagged the sample as invalid.
    pub fn poll(&mut self) -> Result<Option<Report>> {
        let sample = self.sensor.sample()?;
        let reading = match Reading::from_sample(&self.clock, sample) {
            Some(reading) => reading,
            None => {
                debug!("dropping invalid sample {:?}", sample);
                return Ok(None);
            }
        };

        let iaq = match self.calibrator.observe(&reading) {
            BaselineStatus::Ready(baseline) => IaqStatus::Score(self.scorer.score(
                reading.gas_resistance,
                reading.humidity,
                baseline,
            )),
            BaselineStatus::Calibrating { accepted, target } => {
                IaqStatus::Calibrating { accepted, target }
            }
        };

        Ok(Some(Report {
            elapsed: self.session.elapsed(reading.uptime),
            reading,
            iaq,
        }))
    }

    fn cycle(&mut self, interval: Duration, emit: &mut impl FnMut(&Report)) {
        match self.poll() {
            Ok(Some(report)) => emit(&report),
            Ok(None) => {}
            Err(e) => warn!("sensor read failed: {}", e),
        }
        self.clock.sleep(interval);
    }

    /// Runs `cycles` polling cycles, sleeping `interval` after each.
    pub fn run_cycles(&mut self, cycles: usize, interval: Duration, mut emit: impl FnMut(&Report)) {
        for _ in 0..cycles {
            self.cycle(interval, &mut emit);
        }
    }

    /// Polls forever. Read failures are logged and the cycle skipped.
    pub fn run(&mut self, interval: Duration, mut emit: impl FnMut(&Report)) -> ! {
        loop {
            self.cycle(interval, &mut emit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bme680::fake::FakeBme680;
    use crate::bme680::{Bme680, SensorSettings, SECONDARY_ADDRESS};
    use crate::calibration::{Baseline, TimeGatedCalibrator};
    use crate::clock::manual::ManualClock;
    use crate::iaq::IaqScale;
    use crate::sensor::scripted::{sample, ScriptedSensor};
    use crate::Error;

    fn fixed(ohms: f64) -> Calibrator {
        Calibrator::Fixed(Baseline::new(ohms).unwrap())
    }

    #[test]
    fn scores_with_fixed_baseline() {
        let mut sensor = ScriptedSensor::default();
        sensor.push(sample(90_000.0, 40.0));
        let mut monitor = Monitor::new(
            sensor,
            ManualClock::new(),
            fixed(180_000.0),
            IaqScorer::default(),
        );

        let report = monitor.poll().unwrap().unwrap();
        match report.iaq {
            IaqStatus::Score(score) => assert_eq!(score.percent(), 62.5),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            report.to_string(),
            "[0 sec.] T: 22.5 °C | RH: 40.0 % | P: 1013.2 hPa | Gas: 90000 Ω | \
             IAQ: 62.5 % (moderately polluted)"
        );
    }

    #[test]
    fn invalid_sample_produces_no_report() {
        let mut sensor = ScriptedSensor::default();
        sensor.push(sample(0.0, 40.0));
        let mut monitor = Monitor::new(
            sensor,
            ManualClock::new(),
            fixed(180_000.0),
            IaqScorer::default(),
        );
        assert_eq!(monitor.poll().unwrap(), None);
    }

    #[test]
    fn dropped_readings_do_not_start_session() {
        let clock = ManualClock::new();
        let mut sensor = ScriptedSensor::default();
        sensor.push(sample(0.0, 40.0)).push(sample(150_000.0, 40.0));
        let mut monitor =
            Monitor::new(sensor, clock.clone(), fixed(150_000.0), IaqScorer::default());

        let mut reports = Vec::new();
        monitor.run_cycles(2, Duration::from_secs(1), |r| reports.push(r.clone()));
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].elapsed, "0 sec.");
    }

    #[test]
    fn suppresses_score_while_calibrating() {
        let clock = ManualClock::new();
        let mut sensor = ScriptedSensor::default();
        for gas in [100_000.0, 100_000.0, 200_000.0, 200_000.0, 75_000.0] {
            sensor.push(sample(gas, 40.0));
        }
        let calibrator =
            Calibrator::TimeGated(TimeGatedCalibrator::new(2, Duration::from_secs(2)).unwrap());
        let scorer = IaqScorer::new(40.0, 0.25, IaqScale::Index).unwrap();
        let mut monitor = Monitor::new(sensor, clock, calibrator, scorer);

        let mut reports = Vec::new();
        monitor.run_cycles(5, Duration::from_secs(1), |r| reports.push(r.clone()));

        let iaq: Vec<_> = reports.iter().map(|r| r.iaq).collect();
        // t=0 accepted, t=1 inside the gate, t=2 accepted and completes at 150 kΩ
        assert_eq!(
            iaq[0],
            IaqStatus::Calibrating {
                accepted: 1,
                target: 2
            }
        );
        assert_eq!(
            iaq[1],
            IaqStatus::Calibrating {
                accepted: 1,
                target: 2
            }
        );
        for status in &iaq[2..4] {
            match status {
                IaqStatus::Score(score) => assert_eq!(score.value(), 0.0),
                other => panic!("unexpected {:?}", other),
            }
        }
        match iaq[4] {
            IaqStatus::Score(score) => assert_eq!(score.value(), 187.5),
            other => panic!("unexpected {:?}", other),
        }
        assert!(reports[1].to_string().ends_with("IAQ: calibrating (1/2)"));
        assert_eq!(reports[4].elapsed, "4 sec.");
    }

    #[test]
    fn wall_clock_step_back_keeps_session_and_calibration_going() {
        let clock = ManualClock::new();
        let mut sensor = ScriptedSensor::default();
        for gas in [100_000.0, 200_000.0, 150_000.0] {
            sensor.push(sample(gas, 40.0));
        }
        let calibrator =
            Calibrator::TimeGated(TimeGatedCalibrator::new(2, Duration::from_secs(60)).unwrap());
        let mut monitor = Monitor::new(sensor, clock.clone(), calibrator, IaqScorer::default());

        let first = monitor.poll().unwrap().unwrap();
        clock.advance_secs(60);
        clock.step_wall_back_secs(3600);
        let second = monitor.poll().unwrap().unwrap();
        clock.advance_secs(15);
        let third = monitor.poll().unwrap().unwrap();

        assert!(second.reading.timestamp < first.reading.timestamp);
        assert_eq!(second.elapsed, "01:00");
        assert_eq!(third.elapsed, "01:15");
        // baseline is the mean of the two readings 60 s apart, i.e. 150 kΩ
        match third.iaq {
            IaqStatus::Score(score) => assert_eq!(score.percent(), 100.0),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn read_errors_skip_the_cycle() {
        let clock = ManualClock::new();
        let start = clock.now();
        let mut sensor = ScriptedSensor::default();
        sensor.push_error(Error::Nack).push(sample(180_000.0, 40.0));
        let mut monitor =
            Monitor::new(sensor, clock.clone(), fixed(180_000.0), IaqScorer::default());

        let mut reports = Vec::new();
        monitor.run_cycles(2, Duration::from_secs(1), |r| reports.push(r.clone()));
        assert_eq!(reports.len(), 1);
        assert_eq!((clock.now() - start).num_seconds(), 2);
    }

    #[test]
    fn end_to_end_with_simulated_sensor() {
        let clock = ManualClock::new();
        let mut sensor = Bme680::new(
            FakeBme680::new(SECONDARY_ADDRESS),
            SECONDARY_ADDRESS,
            clock.clone(),
        )
        .unwrap();
        sensor.configure(SensorSettings::default()).unwrap();

        let baseline = crate::calibration::calibrate_blocking(
            &mut sensor,
            &clock,
            3,
            Duration::from_secs(1),
            |_, _| {},
        )
        .unwrap();
        assert!((baseline.ohms() - 217_446.58).abs() < 0.1);

        let mut monitor = Monitor::new(
            sensor,
            clock,
            Calibrator::Fixed(baseline),
            IaqScorer::default(),
        );
        let report = monitor.poll().unwrap().unwrap();
        match report.iaq {
            // gas at baseline, humidity slightly above the optimum
            IaqStatus::Score(score) => {
                assert!(score.percent() > 99.0 && score.percent() < 100.0)
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}

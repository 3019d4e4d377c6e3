//! Polls a BME680 attached through an i2c-tiny-usb adapter and prints one status line per
//! reading, including the derived indoor air quality score.
//!
//! ```text
//! $ RUST_LOG=info AMBIENT_BASELINE_MODE=timed cargo run
//! [0 sec.] T: 23.1 °C | RH: 41.8 % | P: 1008.4 hPa | Gas: 152340 Ω | IAQ: calibrating (1/60)
//! ```
//!
//! Settings are read from `AMBIENT_*` environment variables, see `ambient_monitor::config`.

use std::io::Write;

use ambient_monitor::bme680::Bme680;
use ambient_monitor::calibration::{calibrate_blocking, Calibrator, TimeGatedCalibrator};
use ambient_monitor::clock::SystemClock;
use ambient_monitor::config::{BaselineMode, Config};
use ambient_monitor::monitor::Monitor;
use ambient_monitor::UsbI2cBus;
use anyhow::{Context, Result};
use log::info;

fn main() -> Result<()> {
    pretty_env_logger::init();
    color_backtrace::install();

    let config = Config::from_env().context("invalid configuration")?;
    let scorer = config.scorer()?;

    let bus = UsbI2cBus::open_single_device().context("failed to open USB-to-I2C adapter")?;
    let mut sensor = Bme680::new(bus, config.i2c_address, SystemClock)
        .with_context(|| format!("no BME680 at address {:#04x}", config.i2c_address))?;
    sensor
        .configure(config.sensor)
        .context("failed to configure BME680")?;

    let calibrator = match config.baseline {
        BaselineMode::Fixed(baseline) => Calibrator::Fixed(baseline),
        BaselineMode::Blocking { samples, interval } => {
            println!(
                "Calibrating gas baseline. Please wait {:?}...",
                config.baseline.blocking_wait()
            );
            let baseline =
                calibrate_blocking(&mut sensor, &SystemClock, samples, interval, |done, _| {
                    print!("\rElapsed samples: {}", done);
                    let _ = std::io::stdout().flush();
                })
                .context("gas baseline calibration failed")?;
            println!("\nDone, gas baseline {}", baseline);
            Calibrator::Fixed(baseline)
        }
        BaselineMode::TimeGated { samples, delay } => {
            Calibrator::TimeGated(TimeGatedCalibrator::new(samples, delay)?)
        }
    };

    info!("monitoring every {:?}", config.poll_interval);
    let mut monitor = Monitor::new(sensor, SystemClock, calibrator, scorer);
    monitor.run(config.poll_interval, |report| println!("{}", report))
}

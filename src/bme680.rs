//! Bosch BME680 gas/temperature/humidity/pressure sensor.
//!
//! Only forced mode with a single heater profile is supported, which is all the monitor needs:
//! one conversion per poll, triggered on demand.

use std::time::Duration;

use i2c::{BulkTransfer, Message};
use log::{debug, info, warn};

use crate::clock::Clock;
use crate::sensor::{EnvironmentSensor, RawSample};
use crate::{Error, Result};

/// Address with SDO pulled low.
pub const PRIMARY_ADDRESS: u16 = 0x76;
/// Address with SDO pulled high, the default on most breakout boards.
pub const SECONDARY_ADDRESS: u16 = 0x77;

const CHIP_ID: u8 = 0x61;
const SOFT_RESET_CMD: u8 = 0xb6;

mod reg {
    pub const RES_HEAT_VAL: u8 = 0x00;
    pub const RES_HEAT_RANGE: u8 = 0x02;
    pub const RANGE_SW_ERR: u8 = 0x04;
    pub const FIELD0: u8 = 0x1d;
    pub const RES_HEAT0: u8 = 0x5a;
    pub const GAS_WAIT0: u8 = 0x64;
    pub const CTRL_GAS0: u8 = 0x70;
    pub const CTRL_GAS1: u8 = 0x71;
    pub const CTRL_HUM: u8 = 0x72;
    pub const CTRL_MEAS: u8 = 0x74;
    pub const CONFIG: u8 = 0x75;
    pub const COEFF1: u8 = 0x89;
    pub const CHIP_ID: u8 = 0xd0;
    pub const SOFT_RESET: u8 = 0xe0;
    pub const COEFF2: u8 = 0xe1;
}

const COEFF1_LEN: usize = 25;
const COEFF2_LEN: usize = 16;
const FIELD_LEN: usize = 15;

const NEW_DATA: u8 = 0x80;
const GAS_VALID: u8 = 0x20;
const HEAT_STAB: u8 = 0x10;
const GAS_RANGE_MASK: u8 = 0x0f;
const MODE_FORCED: u8 = 0x01;
const RUN_GAS: u8 = 0x10;

const RESET_DELAY: Duration = Duration::from_millis(10);
const POLL_INTERVAL: Duration = Duration::from_millis(10);
const POLL_ATTEMPTS: u32 = 10;

/// Heater target temperatures above this damage the sensing element.
const MAX_HEATER_TEMPERATURE: u16 = 400;
/// Ambient temperature assumed when computing the heater resistance.
const AMBIENT_TEMPERATURE: f64 = 25.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Oversampling {
    Skipped,
    X1,
    X2,
    X4,
    X8,
    X16,
}

impl Oversampling {
    pub fn from_factor(factor: u8) -> Option<Self> {
        Some(match factor {
            0 => Self::Skipped,
            1 => Self::X1,
            2 => Self::X2,
            4 => Self::X4,
            8 => Self::X8,
            16 => Self::X16,
            _ => return None,
        })
    }

    fn bits(self) -> u8 {
        self as u8
    }

    fn cycles(self) -> u32 {
        match self {
            Self::Skipped => 0,
            other => 1 << (other.bits() - 1),
        }
    }
}

/// IIR filter coefficient applied to temperature and pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterSize {
    Off,
    Size1,
    Size3,
    Size7,
    Size15,
    Size31,
    Size63,
    Size127,
}

impl FilterSize {
    pub fn from_coefficient(coefficient: u8) -> Option<Self> {
        Some(match coefficient {
            0 => Self::Off,
            1 => Self::Size1,
            3 => Self::Size3,
            7 => Self::Size7,
            15 => Self::Size15,
            31 => Self::Size31,
            63 => Self::Size63,
            127 => Self::Size127,
            _ => return None,
        })
    }

    fn bits(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSettings {
    pub humidity_oversampling: Oversampling,
    pub pressure_oversampling: Oversampling,
    pub temperature_oversampling: Oversampling,
    pub filter: FilterSize,
    /// Gas heater target in °C.
    pub heater_temperature: u16,
    pub heater_duration: Duration,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            humidity_oversampling: Oversampling::X2,
            pressure_oversampling: Oversampling::X4,
            temperature_oversampling: Oversampling::X8,
            filter: FilterSize::Size3,
            heater_temperature: 320,
            heater_duration: Duration::from_millis(150),
        }
    }
}

impl SensorSettings {
    fn ctrl_meas(&self) -> u8 {
        (self.temperature_oversampling.bits() << 5) | (self.pressure_oversampling.bits() << 2)
    }

    /// Time from triggering a forced conversion until its results are expected.
    pub fn measurement_duration(&self) -> Duration {
        let cycles = self.temperature_oversampling.cycles()
            + self.pressure_oversampling.cycles()
            + self.humidity_oversampling.cycles();
        // TPH conversion, gas conversion and wake-up overheads in microseconds
        let micros = cycles * 1963 + 477 * 4 + 477 * 5 + 500;
        Duration::from_millis(u64::from(micros / 1000 + 1)) + self.heater_duration
    }
}

/// Encodes a heater-on time into the gas_wait register format: 6 bits of value and a 2-bit
/// multiplier of 1, 4, 16 or 64 ms.
fn heater_duration_code(duration: Duration) -> u8 {
    let mut millis = duration.as_millis();
    if millis >= 0xfc0 {
        return 0xff;
    }
    let mut factor = 0u8;
    while millis > 0x3f {
        millis /= 4;
        factor += 1;
    }
    millis as u8 + factor * 64
}

const GAS_RANGE_K1: [f64; 16] = [
    0.0, 0.0, 0.0, 0.0, 0.0, -1.0, 0.0, -0.8, 0.0, 0.0, -0.2, -0.5, 0.0, -1.0, 0.0, 0.0,
];
const GAS_RANGE_K2: [f64; 16] = [
    0.0, 0.0, 0.0, 0.0, 0.1, 0.7, 0.0, -0.8, -0.1, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
];

/// Factory trimming parameters, read once after reset.
#[derive(Debug, Default, Clone, PartialEq)]
struct Coefficients {
    t1: f64,
    t2: f64,
    t3: f64,
    p1: f64,
    p2: f64,
    p3: f64,
    p4: f64,
    p5: f64,
    p6: f64,
    p7: f64,
    p8: f64,
    p9: f64,
    p10: f64,
    h1: f64,
    h2: f64,
    h3: f64,
    h4: f64,
    h5: f64,
    h6: f64,
    h7: f64,
    gh1: f64,
    gh2: f64,
    gh3: f64,
    res_heat_range: f64,
    res_heat_val: f64,
    range_sw_err: f64,
}

impl Coefficients {
    /// `raw` is the 0x89 block followed by the 0xe1 block.
    fn parse(
        raw: &[u8; COEFF1_LEN + COEFF2_LEN],
        res_heat_range: u8,
        res_heat_val: u8,
        range_sw_err: u8,
    ) -> Self {
        let unsigned = |lsb: usize| f64::from(u16::from_le_bytes([raw[lsb], raw[lsb + 1]]));
        let signed = |lsb: usize| f64::from(i16::from_le_bytes([raw[lsb], raw[lsb + 1]]));
        let byte = |i: usize| f64::from(raw[i] as i8);

        Self {
            t1: unsigned(33),
            t2: signed(1),
            t3: byte(3),
            p1: unsigned(5),
            p2: signed(7),
            p3: byte(9),
            p4: signed(11),
            p5: signed(13),
            p6: byte(16),
            p7: byte(15),
            p8: signed(19),
            p9: signed(21),
            p10: f64::from(raw[23]),
            h1: f64::from((u16::from(raw[27]) << 4) | u16::from(raw[26] & 0x0f)),
            h2: f64::from((u16::from(raw[25]) << 4) | u16::from(raw[26] >> 4)),
            h3: byte(28),
            h4: byte(29),
            h5: byte(30),
            h6: f64::from(raw[31]),
            h7: byte(32),
            gh1: byte(37),
            gh2: signed(35),
            gh3: byte(38),
            res_heat_range: f64::from((res_heat_range & 0x30) >> 4),
            res_heat_val: f64::from(res_heat_val as i8),
            range_sw_err: f64::from((range_sw_err as i8 & 0xf0u8 as i8) / 16),
        }
    }

    /// Returns °C and the fine temperature the other channels are compensated with.
    fn temperature(&self, adc: u32) -> (f64, f64) {
        let adc = f64::from(adc);
        let var1 = (adc / 16384.0 - self.t1 / 1024.0) * self.t2;
        let var2 = (adc / 131072.0 - self.t1 / 8192.0).powi(2) * (self.t3 * 16.0);
        let t_fine = var1 + var2;
        (t_fine / 5120.0, t_fine)
    }

    /// Pressure in Pa.
    fn pressure(&self, adc: u32, t_fine: f64) -> f64 {
        let mut var1 = t_fine / 2.0 - 64000.0;
        let mut var2 = var1 * var1 * (self.p6 / 131072.0);
        var2 += var1 * self.p5 * 2.0;
        var2 = var2 / 4.0 + self.p4 * 65536.0;
        var1 = (self.p3 * var1 * var1 / 16384.0 + self.p2 * var1) / 524288.0;
        var1 = (1.0 + var1 / 32768.0) * self.p1;
        if var1 == 0.0 {
            return 0.0;
        }

        let mut pressure = 1048576.0 - f64::from(adc);
        pressure = (pressure - var2 / 4096.0) * 6250.0 / var1;
        let var1 = self.p9 * pressure * pressure / 2147483648.0;
        let var2 = pressure * (self.p8 / 32768.0);
        let var3 = (pressure / 256.0).powi(3) * (self.p10 / 131072.0);
        pressure + (var1 + var2 + var3 + self.p7 * 128.0) / 16.0
    }

    /// Relative humidity in percent, clamped to 0..=100.
    fn humidity(&self, adc: u16, t_fine: f64) -> f64 {
        let temperature = t_fine / 5120.0;
        let var1 = f64::from(adc) - (self.h1 * 16.0 + self.h3 / 2.0 * temperature);
        let var2 = var1
            * (self.h2 / 262144.0
                * (1.0
                    + self.h4 / 16384.0 * temperature
                    + self.h5 / 1048576.0 * temperature * temperature));
        let var3 = self.h6 / 16384.0;
        let var4 = self.h7 / 2097152.0;
        (var2 + (var3 + var4 * temperature) * var2 * var2).clamp(0.0, 100.0)
    }

    /// Gas resistance in ohms.
    fn gas_resistance(&self, adc: u16, range: u8) -> f64 {
        let range = usize::from(range & GAS_RANGE_MASK);
        let var1 = 1340.0 + 5.0 * self.range_sw_err;
        let var2 = var1 * (1.0 + GAS_RANGE_K1[range] / 100.0);
        let var3 = 1.0 + GAS_RANGE_K2[range] / 100.0;
        let var4 = (f64::from(adc) - 512.0) / var2 + 1.0;
        1.0 / (var3 * 0.000000125 * f64::from(1u32 << range) * var4)
    }

    /// Register value that makes the heater reach `target` °C.
    fn heater_resistance(&self, target: u16, ambient: f64) -> u8 {
        let target = f64::from(target.min(MAX_HEATER_TEMPERATURE));
        let var1 = self.gh1 / 16.0 + 49.0;
        let var2 = self.gh2 / 32768.0 * 0.0005 + 0.00235;
        let var3 = self.gh3 / 1024.0;
        let var4 = var1 * (1.0 + var2 * target);
        let var5 = var4 + var3 * ambient;
        let range_factor = 4.0 / (4.0 + self.res_heat_range);
        let val_factor = 1.0 / (1.0 + self.res_heat_val * 0.002);
        let code = 3.4 * (var5 * range_factor * val_factor - 25.0);
        code.clamp(0.0, 255.0) as u8
    }
}

pub struct Bme680<B, C> {
    bus: B,
    address: u16,
    clock: C,
    coefficients: Coefficients,
    settings: SensorSettings,
}

impl<B, C> Bme680<B, C>
where
    B: BulkTransfer<Error = Error>,
    C: Clock,
{
    /// Resets the sensor at `address`, checks that it is a BME680 and loads its calibration.
    /// The sensor is left unconfigured, see [`Bme680::configure`].
    pub fn new(bus: B, address: u16, clock: C) -> Result<Self> {
        let mut sensor = Self {
            bus,
            address,
            clock,
            coefficients: Coefficients::default(),
            settings: SensorSettings::default(),
        };

        sensor.write_register(reg::SOFT_RESET, SOFT_RESET_CMD)?;
        sensor.clock.sleep(RESET_DELAY);

        let chip_id = sensor.read_register(reg::CHIP_ID)?;
        if chip_id != CHIP_ID {
            return Err(Error::UnexpectedChipId(chip_id));
        }

        let mut raw = [0u8; COEFF1_LEN + COEFF2_LEN];
        sensor.read_registers(reg::COEFF1, &mut raw[..COEFF1_LEN])?;
        sensor.read_registers(reg::COEFF2, &mut raw[COEFF1_LEN..])?;
        let res_heat_range = sensor.read_register(reg::RES_HEAT_RANGE)?;
        let res_heat_val = sensor.read_register(reg::RES_HEAT_VAL)?;
        let range_sw_err = sensor.read_register(reg::RANGE_SW_ERR)?;
        sensor.coefficients =
            Coefficients::parse(&raw, res_heat_range, res_heat_val, range_sw_err);

        info!("found BME680 at {:#04x}", address);
        Ok(sensor)
    }

    pub fn settings(&self) -> &SensorSettings {
        &self.settings
    }

    /// Applies oversampling, filter and heater settings. Takes effect from the next sample.
    pub fn configure(&mut self, settings: SensorSettings) -> Result<()> {
        let res_heat = self
            .coefficients
            .heater_resistance(settings.heater_temperature, AMBIENT_TEMPERATURE);
        let gas_wait = heater_duration_code(settings.heater_duration);

        self.write_register(reg::CTRL_HUM, settings.humidity_oversampling.bits())?;
        self.write_register(reg::CONFIG, settings.filter.bits() << 2)?;
        self.write_register(reg::CTRL_MEAS, settings.ctrl_meas())?;
        self.write_register(reg::RES_HEAT0, res_heat)?;
        self.write_register(reg::GAS_WAIT0, gas_wait)?;
        self.write_register(reg::CTRL_GAS1, RUN_GAS)?;
        self.write_register(reg::CTRL_GAS0, 0)?;

        debug!(
            "BME680 configured: {:?}, res_heat {:#04x}, gas_wait {:#04x}",
            settings, res_heat, gas_wait
        );
        self.settings = settings;
        Ok(())
    }

    /// Runs one forced-mode conversion. A conversion that does not finish in time is returned
    /// without a temperature, and an unusable gas conversion with zero gas resistance.
    pub fn measure(&mut self) -> Result<RawSample> {
        self.write_register(reg::CTRL_MEAS, self.settings.ctrl_meas() | MODE_FORCED)?;
        self.clock.sleep(self.settings.measurement_duration());

        let mut field = [0u8; FIELD_LEN];
        for _ in 0..POLL_ATTEMPTS {
            self.read_registers(reg::FIELD0, &mut field)?;
            if field[0] & NEW_DATA != 0 {
                return Ok(self.compensate(&field));
            }
            self.clock.sleep(POLL_INTERVAL);
        }

        warn!("BME680 conversion did not complete");
        Ok(RawSample {
            temperature: None,
            humidity: 0.0,
            pressure: 0.0,
            gas_resistance: 0.0,
        })
    }

    fn compensate(&self, field: &[u8; FIELD_LEN]) -> RawSample {
        let adc_pressure =
            (u32::from(field[2]) << 12) | (u32::from(field[3]) << 4) | (u32::from(field[4]) >> 4);
        let adc_temperature =
            (u32::from(field[5]) << 12) | (u32::from(field[6]) << 4) | (u32::from(field[7]) >> 4);
        let adc_humidity = u16::from_be_bytes([field[8], field[9]]);
        let adc_gas = (u16::from(field[13]) << 2) | (u16::from(field[14]) >> 6);
        let gas_status = field[14];

        let c = &self.coefficients;
        let (temperature, t_fine) = c.temperature(adc_temperature);
        let gas_resistance = if gas_status & GAS_VALID == 0 {
            debug!("gas conversion not valid");
            0.0
        } else if gas_status & HEAT_STAB == 0 {
            debug!("gas heater did not stabilise");
            0.0
        } else {
            c.gas_resistance(adc_gas, gas_status & GAS_RANGE_MASK)
        };

        RawSample {
            temperature: Some(temperature),
            humidity: c.humidity(adc_humidity, t_fine),
            pressure: c.pressure(adc_pressure, t_fine) / 100.0,
            gas_resistance,
        }
    }

    fn read_registers(&mut self, start: u8, buf: &mut [u8]) -> Result<()> {
        self.bus.i2c_transfer(&mut [
            Message::Write {
                address: self.address,
                data: &[start],
                flags: Default::default(),
            },
            Message::Read {
                address: self.address,
                data: buf,
                flags: Default::default(),
            },
        ])
    }

    fn read_register(&mut self, register: u8) -> Result<u8> {
        let mut value = [0u8];
        self.read_registers(register, &mut value)?;
        Ok(value[0])
    }

    fn write_register(&mut self, register: u8, value: u8) -> Result<()> {
        self.bus.i2c_transfer(&mut [Message::Write {
            address: self.address,
            data: &[register, value],
            flags: Default::default(),
        }])
    }
}

impl<B, C> EnvironmentSensor for Bme680<B, C>
where
    B: BulkTransfer<Error = Error>,
    C: Clock,
{
    fn sample(&mut self) -> Result<RawSample> {
        self.measure()
    }
}


#[cfg(test)]
mod tests {
    use super::fake::{coefficient_bytes, FakeBme680};
    use super::*;
    use crate::clock::manual::ManualClock;

    fn close(actual: f64, expected: f64, tolerance: f64) -> bool {
        (actual - expected).abs() <= tolerance
    }

    fn sensor() -> Bme680<FakeBme680, ManualClock> {
        Bme680::new(
            FakeBme680::new(SECONDARY_ADDRESS),
            SECONDARY_ADDRESS,
            ManualClock::new(),
        )
        .unwrap()
    }

    #[test]
    fn init_resets_and_reads_trimming() {
        let sensor = sensor();
        assert_eq!(
            sensor.bus.register_writes(reg::SOFT_RESET),
            vec![SOFT_RESET_CMD]
        );
        let c = &sensor.coefficients;
        assert_eq!(c.t1, 25975.0);
        assert_eq!(c.t2, 26277.0);
        assert_eq!(c.p2, -10456.0);
        assert_eq!(c.p6, 30.0);
        assert_eq!(c.p7, 52.0);
        assert_eq!(c.h1, 805.0);
        assert_eq!(c.h2, 1010.0);
        assert_eq!(c.h7, -100.0);
        assert_eq!(c.gh1, -30.0);
        assert_eq!(c.res_heat_range, 1.0);
        assert_eq!(c.res_heat_val, 41.0);
    }

    #[test]
    fn init_rejects_other_chips() {
        let mut bus = FakeBme680::new(SECONDARY_ADDRESS);
        bus.regs[reg::CHIP_ID as usize] = 0x60; // BME280
        let result = Bme680::new(bus, SECONDARY_ADDRESS, ManualClock::new());
        assert!(matches!(result, Err(Error::UnexpectedChipId(0x60))));
    }

    #[test]
    fn init_at_wrong_address_is_nack() {
        let bus = FakeBme680::new(SECONDARY_ADDRESS);
        let result = Bme680::new(bus, PRIMARY_ADDRESS, ManualClock::new());
        assert!(matches!(result, Err(Error::Nack)));
    }

    #[test]
    fn range_switching_error_is_signed() {
        let c = Coefficients::parse(&coefficient_bytes(), 0, 0, 0xf0);
        assert_eq!(c.range_sw_err, -1.0);
        let c = Coefficients::parse(&coefficient_bytes(), 0, 0, 0x30);
        assert_eq!(c.range_sw_err, 3.0);
    }

    #[test]
    fn configure_writes_control_registers() {
        let mut sensor = sensor();
        sensor.configure(SensorSettings::default()).unwrap();
        let bus = &sensor.bus;
        assert_eq!(bus.register_writes(reg::CTRL_HUM), vec![0b010]);
        assert_eq!(bus.register_writes(reg::CONFIG), vec![0b010 << 2]);
        assert_eq!(bus.register_writes(reg::CTRL_MEAS), vec![(0b100 << 5) | (0b011 << 2)]);
        assert_eq!(bus.register_writes(reg::RES_HEAT0), vec![120]);
        assert_eq!(bus.register_writes(reg::GAS_WAIT0), vec![0x65]);
        assert_eq!(bus.register_writes(reg::CTRL_GAS1), vec![RUN_GAS]);
        assert_eq!(bus.register_writes(reg::CTRL_GAS0), vec![0]);
    }

    #[test]
    fn heater_duration_encoding() {
        assert_eq!(heater_duration_code(Duration::from_millis(0)), 0);
        assert_eq!(heater_duration_code(Duration::from_millis(63)), 63);
        assert_eq!(heater_duration_code(Duration::from_millis(100)), 0x59);
        assert_eq!(heater_duration_code(Duration::from_millis(150)), 0x65);
        assert_eq!(heater_duration_code(Duration::from_millis(4032)), 0xff);
    }

    #[test]
    fn measurement_duration_covers_oversampling_and_heater() {
        assert_eq!(
            SensorSettings::default().measurement_duration(),
            Duration::from_millis(33 + 150)
        );
    }

    #[test]
    fn forced_measurement_is_compensated() {
        let mut sensor = sensor();
        sensor.configure(SensorSettings::default()).unwrap();
        let start = sensor.clock.now();

        let sample = sensor.sample().unwrap();
        let temperature = sample.temperature.unwrap();
        assert!(close(temperature, 24.5619, 1e-3), "{temperature}");
        assert!(close(sample.pressure, 996.7538, 1e-3), "{}", sample.pressure);
        assert!(close(sample.humidity, 40.7666, 1e-3), "{}", sample.humidity);
        assert!(
            close(sample.gas_resistance, 217_446.58, 0.1),
            "{}",
            sample.gas_resistance
        );

        let waited = (sensor.clock.now() - start).num_milliseconds();
        assert_eq!(waited, 183);
        assert_eq!(
            sensor.bus.register_writes(reg::CTRL_MEAS).last(),
            Some(&((0b100 << 5) | (0b011 << 2) | MODE_FORCED))
        );
    }

    #[test]
    fn invalid_gas_conversion_reports_zero_resistance() {
        let mut sensor = sensor();
        sensor
            .bus
            .set_conversion(494_000, 360_000, 21_000, 700, 5, false);
        let sample = sensor.sample().unwrap();
        assert!(sample.temperature.is_some());
        assert_eq!(sample.gas_resistance, 0.0);
    }

    #[test]
    fn unfinished_conversion_has_no_temperature() {
        let mut sensor = sensor();
        sensor.bus.completes = false;
        let sample = sensor.sample().unwrap();
        assert_eq!(sample.temperature, None);
        assert_eq!(sample.gas_resistance, 0.0);
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("no acknowledgement from the i2c device")]
    Nack,

    #[error("no i2c-tiny-usb adapter found")]
    AdapterNotFound,

    #[error("found {0} i2c-tiny-usb adapters, expected exactly one")]
    MultipleAdapters(usize),

    #[error("unexpected chip id {0:#04x}, not a BME680")]
    UnexpectedChipId(u8),

    #[error("gas baseline must be a positive resistance, got {0}")]
    InvalidBaseline(f64),

    #[error("baseline calibration collected no valid gas samples")]
    NoCalibrationSamples,

    #[error("invalid value for {key}: {reason}")]
    Config { key: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn config(key: &'static str, reason: impl Into<String>) -> Self {
        Error::Config {
            key,
            reason: reason.into(),
        }
    }
}

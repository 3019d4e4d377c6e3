mod error;
mod link;
mod protocol;
mod usb_bus;

pub mod bme680;
pub mod calibration;
pub mod clock;
pub mod config;
pub mod iaq;
pub mod monitor;
pub mod sensor;
pub mod session;


pub use error::*;
pub use protocol::KNOWN_ADAPTER_IDS;
pub use rusb;
pub use usb_bus::*;

use log::info;
use rusb::{Device, DeviceHandle, GlobalContext, UsbContext};

use crate::protocol::{self, KNOWN_ADAPTER_IDS};
use crate::{Error, Result};

/// I2C bus reached through an i2c-tiny-usb adapter.
pub struct UsbI2cBus<T: UsbContext> {
    handle: DeviceHandle<T>,
    supported_flags: (i2c::ReadFlags, i2c::WriteFlags),
}

impl<T: UsbContext> UsbI2cBus<T> {
    fn open(device: &Device<T>) -> Result<Self> {
        let handle = device.open()?;
        handle.claim_interface(0)?;
        let supported_flags = protocol::probe(&handle)?;
        info!(
            "opened i2c-tiny-usb adapter on bus {:03} address {:03}",
            device.bus_number(),
            device.address()
        );
        Ok(Self {
            handle,
            supported_flags,
        })
    }
}

/// Lists attached USB devices that enumerate as a known i2c-tiny-usb adapter.
pub fn adapters() -> Result<Vec<Device<GlobalContext>>> {
    let mut found = Vec::new();
    for device in rusb::devices()?.iter() {
        let descriptor = match device.device_descriptor() {
            Ok(descriptor) => descriptor,
            Err(_) => continue,
        };
        let ids = (descriptor.vendor_id(), descriptor.product_id());
        if KNOWN_ADAPTER_IDS.contains(&ids) {
            found.push(device);
        }
    }
    Ok(found)
}

impl UsbI2cBus<GlobalContext> {
    /// Opens the only attached adapter. Having none or several attached is an error since
    /// there is no way to tell which bus the sensor sits on.
    pub fn open_single_device() -> Result<Self> {
        let devices = adapters()?;
        match devices.as_slice() {
            [] => Err(Error::AdapterNotFound),
            [device] => Self::open(device),
            _ => Err(Error::MultipleAdapters(devices.len())),
        }
    }
}

impl<T: UsbContext> i2c::Master for UsbI2cBus<T> {
    type Error = Error;
}

impl<T: UsbContext> i2c::BulkTransfer for UsbI2cBus<T> {
    fn i2c_transfer_support(&mut self) -> Result<(i2c::ReadFlags, i2c::WriteFlags)> {
        Ok(self.supported_flags)
    }

    fn i2c_transfer(&mut self, messages: &mut [i2c::Message]) -> Result<()> {
        protocol::transfer(&self.handle, messages)
    }
}

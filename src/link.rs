use std::time::Duration;

use rusb::{DeviceHandle, UsbContext};

/// Timeout applied to every control transfer sent to the adapter.
pub(crate) const TIMEOUT: Duration = Duration::from_secs(1);

/// A vendor request addressed to the adapter's interface. `command` goes into `bRequest`,
/// `value` and `index` into `wValue` and `wIndex`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Request {
    pub command: u8,
    pub value: u16,
    pub index: u16,
}

/// Control-transfer channel to an i2c-tiny-usb adapter. The protocol only ever uses vendor
/// control transfers, so that is all this exposes. Tests substitute `mock::MockLink`.
pub(crate) trait ControlLink {
    fn control_in(&self, request: Request, buf: &mut [u8]) -> rusb::Result<usize>;

    fn control_out(&self, request: Request, buf: &[u8]) -> rusb::Result<usize>;
}

impl<T: UsbContext> ControlLink for DeviceHandle<T> {
    fn control_in(&self, request: Request, buf: &mut [u8]) -> rusb::Result<usize> {
        use rusb::constants::*;
        let request_type =
            LIBUSB_REQUEST_TYPE_VENDOR | LIBUSB_RECIPIENT_INTERFACE | LIBUSB_ENDPOINT_IN;
        self.read_control(
            request_type,
            request.command,
            request.value,
            request.index,
            buf,
            TIMEOUT,
        )
    }

    fn control_out(&self, request: Request, buf: &[u8]) -> rusb::Result<usize> {
        use rusb::constants::*;
        let request_type =
            LIBUSB_REQUEST_TYPE_VENDOR | LIBUSB_RECIPIENT_INTERFACE | LIBUSB_ENDPOINT_OUT;
        self.write_control(
            request_type,
            request.command,
            request.value,
            request.index,
            buf,
            TIMEOUT,
        )
    }
}

//! Wire protocol of i2c-tiny-usb compatible adapters. Each I2C message becomes one vendor
//! control transfer, and after every message the adapter status is queried so that a missing
//! acknowledgement can be told apart from a USB failure.

use i2c::{Message, ReadFlags, WriteFlags};

use crate::link::{ControlLink, Request};
use crate::{Error, Result};

/// USB vendor and product IDs under which compatible adapters enumerate.
pub const KNOWN_ADAPTER_IDS: [(u16, u16); 2] = [
    (0x0403, 0xc631), // FTDI
    (0x1c40, 0x0534), // EZPrototypes
];

pub(crate) const CMD_ECHO: u8 = 0;
pub(crate) const CMD_GET_FUNC: u8 = 1;
pub(crate) const CMD_GET_STATUS: u8 = 3;
pub(crate) const CMD_I2C_IO: u8 = 4;
pub(crate) const CMD_I2C_BEGIN: u8 = 1;
pub(crate) const CMD_I2C_END: u8 = 2;

pub(crate) const STATUS_IDLE: u8 = 0;
pub(crate) const STATUS_ADDRESS_NAK: u8 = 2;

const I2C_FUNC_I2C: u32 = 0x0000_0001;
const I2C_FUNC_PROTOCOL_MANGLING: u32 = 0x0000_0004;

pub(crate) const I2C_M_RD: u16 = 0x0001;
const I2C_M_NOSTART: u16 = 0x4000;
const I2C_M_REV_DIR_ADDR: u16 = 0x2000;
const I2C_M_IGNORE_NAK: u16 = 0x1000;
const I2C_M_NO_RD_ACK: u16 = 0x0800;

const ECHO_PATTERNS: [u16; 8] = [0, 0xaaaa, 0x5555, 0xffff, 0x55aa, 0xaa55, 0x0f0f, 0xf0f0];

fn read_flag_bits(flags: ReadFlags) -> u16 {
    let mut bits = I2C_M_RD;
    if flags.contains(ReadFlags::NACK) {
        bits |= I2C_M_NO_RD_ACK;
    }
    if flags.contains(ReadFlags::REVERSE_RW) {
        bits |= I2C_M_REV_DIR_ADDR;
    }
    if flags.contains(ReadFlags::NO_START) {
        bits |= I2C_M_NOSTART;
    }
    bits
}

fn write_flag_bits(flags: WriteFlags) -> u16 {
    let mut bits = 0;
    if flags.contains(WriteFlags::IGNORE_NACK) {
        bits |= I2C_M_IGNORE_NAK;
    }
    if flags.contains(WriteFlags::REVERSE_RW) {
        bits |= I2C_M_REV_DIR_ADDR;
    }
    if flags.contains(WriteFlags::NO_START) {
        bits |= I2C_M_NOSTART;
    }
    bits
}

fn read_exact(link: &impl ControlLink, request: Request, buf: &mut [u8]) -> Result<()> {
    if link.control_in(request, buf)? != buf.len() {
        return Err(rusb::Error::Io.into());
    }
    Ok(())
}

fn write_exact(link: &impl ControlLink, request: Request, buf: &[u8]) -> Result<()> {
    if link.control_out(request, buf)? != buf.len() {
        return Err(rusb::Error::Io.into());
    }
    Ok(())
}

fn status(link: &impl ControlLink) -> Result<u8> {
    let mut status = [STATUS_IDLE];
    let request = Request {
        command: CMD_GET_STATUS,
        value: I2C_M_RD,
        index: 0,
    };
    read_exact(link, request, &mut status)?;
    Ok(status[0])
}

/// Runs `messages` as a single I2C transaction: START before the first message, STOP after
/// the last one.
pub(crate) fn transfer(link: &impl ControlLink, messages: &mut [Message]) -> Result<()> {
    let last = match messages.len().checked_sub(1) {
        Some(last) => last,
        None => return Ok(()),
    };

    for (i, message) in messages.iter_mut().enumerate() {
        let mut command = CMD_I2C_IO;
        if i == 0 {
            command |= CMD_I2C_BEGIN;
        }
        if i == last {
            command |= CMD_I2C_END;
        }

        let outcome = match message {
            Message::Read {
                address,
                data,
                flags,
            } => {
                let request = Request {
                    command,
                    value: read_flag_bits(*flags),
                    index: *address,
                };
                read_exact(link, request, data)
            }
            Message::Write {
                address,
                data,
                flags,
            } => {
                let request = Request {
                    command,
                    value: write_flag_bits(*flags),
                    index: *address,
                };
                write_exact(link, request, data)
            }
        };

        // A NACK usually also fails the control transfer itself, so the status decides which
        // error is reported.
        if status(link)? == STATUS_ADDRESS_NAK {
            return Err(Error::Nack);
        }
        outcome?;
    }

    Ok(())
}

/// Checks that the adapter speaks plain I2C and answers echo requests, returning the message
/// flags it can honour.
pub(crate) fn probe(link: &impl ControlLink) -> Result<(ReadFlags, WriteFlags)> {
    let mut func = [0u8; 4];
    let request = Request {
        command: CMD_GET_FUNC,
        value: I2C_M_RD,
        index: 0,
    };
    read_exact(link, request, &mut func)?;
    let func = u32::from_le_bytes(func);
    if func & I2C_FUNC_I2C == 0 {
        return Err(rusb::Error::NotSupported.into());
    }

    let flags = if func & I2C_FUNC_PROTOCOL_MANGLING != 0 {
        (
            ReadFlags::NACK | ReadFlags::REVERSE_RW | ReadFlags::NO_START,
            WriteFlags::IGNORE_NACK | WriteFlags::REVERSE_RW | WriteFlags::NO_START,
        )
    } else {
        Default::default()
    };

    for pattern in ECHO_PATTERNS {
        let mut echo = [0u8; 2];
        // CMD_ECHO carries its argument in wValue where other commands put the flags
        let request = Request {
            command: CMD_ECHO,
            value: pattern,
            index: 0,
        };
        read_exact(link, request, &mut echo)?;
        if u16::from_le_bytes(echo) != pattern {
            return Err(rusb::Error::Other.into());
        }
    }

    Ok(flags)
}

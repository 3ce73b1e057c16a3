//! Control transfer descriptors
//!
//! A [`TransferDescriptor`] carries the setup parameters of one control
//! transfer on the device's default pipe: direction, request type,
//! recipient, request code, value, index and length.
//!
//! Descriptors are plain values, built fresh for every request by the
//! constructors below and handed to the [`Transport`](super::Transport).

use serde::{Deserialize, Serialize};
use std::fmt;

const DIR_BIT: u8 = 1 << 7;
const REQ_TYPE_SHIFT: u8 = 5;

/// Data stage direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Host to device
    Out,
    /// Device to host
    In,
}

/// Request type field of `bmRequestType`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum RequestType {
    /// Standard USB request
    Standard = 0,
    /// Class-specific request
    Class = 1,
    /// Vendor-specific request
    Vendor = 2,
}

/// Recipient field of `bmRequestType`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Recipient {
    /// Addressed to the device
    Device = 0,
    /// Addressed to an interface
    Interface = 1,
    /// Addressed to an endpoint
    Endpoint = 2,
    /// Other recipient
    Other = 3,
}

/// Setup parameters for a single control transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferDescriptor {
    /// Data stage direction
    pub direction: Direction,
    /// Standard, class or vendor
    pub request_type: RequestType,
    /// Device, interface, endpoint or other
    pub recipient: Recipient,
    /// `bRequest`
    pub request: u8,
    /// `wValue`
    pub value: u16,
    /// `wIndex`
    pub index: u16,
    /// Expected length for IN transfers, payload length for OUT transfers
    pub length: u16,
}

impl TransferDescriptor {
    /// Device-to-host vendor request addressed to the device
    pub const fn vendor_in(request: u8, value: u16, index: u16, length: u16) -> Self {
        Self::new(
            Direction::In,
            RequestType::Vendor,
            Recipient::Device,
            request,
            value,
            index,
            length,
        )
    }

    /// Host-to-device vendor request addressed to the device, no data stage
    pub const fn vendor_out(request: u8, value: u16, index: u16) -> Self {
        Self::new(
            Direction::Out,
            RequestType::Vendor,
            Recipient::Device,
            request,
            value,
            index,
            0,
        )
    }

    /// Device-to-host class request addressed to the interface
    pub const fn class_in(request: u8, value: u16, index: u16, length: u16) -> Self {
        Self::new(
            Direction::In,
            RequestType::Class,
            Recipient::Interface,
            request,
            value,
            index,
            length,
        )
    }

    /// Host-to-device class request addressed to the interface
    ///
    /// `length` is the size of the payload sent in the data stage.
    pub const fn class_out(request: u8, value: u16, index: u16, length: u16) -> Self {
        Self::new(
            Direction::Out,
            RequestType::Class,
            Recipient::Interface,
            request,
            value,
            index,
            length,
        )
    }

    const fn new(
        direction: Direction,
        request_type: RequestType,
        recipient: Recipient,
        request: u8,
        value: u16,
        index: u16,
        length: u16,
    ) -> Self {
        Self {
            direction,
            request_type,
            recipient,
            request,
            value,
            index,
            length,
        }
    }

    /// Packed `bmRequestType` byte as it appears on the wire
    pub const fn request_type_byte(&self) -> u8 {
        let dir = match self.direction {
            Direction::Out => 0,
            Direction::In => DIR_BIT,
        };
        dir | ((self.request_type as u8) << REQ_TYPE_SHIFT) | self.recipient as u8
    }
}

impl fmt::Display for TransferDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x} {:02x} {:04x} {:04x} {:04x}",
            self.request_type_byte(),
            self.request,
            self.value,
            self.index,
            self.length
        )
    }
}

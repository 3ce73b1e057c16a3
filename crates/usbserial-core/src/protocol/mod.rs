//! USB Serial Bridge Protocol
//!
//! Encodes serial port operations into the control transfers understood by
//! CP210x-style and CH341-style USB-to-serial bridges.
//!
//! The encoders are pure where they can be (descriptor builders, baud and
//! line control arithmetic) and submit their transfers in the order each
//! chip's firmware requires.

pub mod baud;
pub mod ch341;
mod chip;
mod config;
pub mod cp210x;
mod descriptor;
mod error;
mod line;
mod port;
mod transport;

pub use chip::{ChipProtocol, ChipVariant, DeviceId, Endpoints};
pub use config::PortConfig;
pub use descriptor::{Direction, Recipient, RequestType, TransferDescriptor};
pub use error::{PortError, Result, TransportError};
pub use line::{ControlLines, DataBits, LineConfig, ModemStatus, Parity, StopBits};
pub use port::{Port, PortState};
pub use transport::{Transport, TransportResult};

/// Default baud rate applied during initialization
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Configuration value selected when the device has none active
pub const DEFAULT_CONFIGURATION: u8 = 1;

/// Interface carrying the serial function on both chip families
pub const DEFAULT_INTERFACE: u8 = 0;

//! # usbserial Core Library
//!
//! Serial ports over USB control and bulk transfers.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Control transfer descriptors for vendor and class requests
//! - CP210x-style and CH341-style chip encoders
//! - CH341 baud rate divisor arithmetic
//! - A port state machine that serializes access to the command channel
//!
//! The USB stack itself is a collaborator: hosts implement
//! [`protocol::Transport`] on whatever executes transfers.
//!
//! ## Supported bridges
//!
//! - `067b:2303` (CP210x-style request set)
//! - `1a86:7523` (CH341)
//!
//! ## Example
//!
//! ```rust,ignore
//! use usbserial_core::prelude::*;
//!
//! let port = Port::new(Box::new(transport), DeviceId::new(0x1a86, 0x7523), PortConfig::default());
//! port.open().await?;
//! port.set_line_config(LineConfig::new(9600, DataBits::Eight, Parity::None, StopBits::One)).await?;
//! port.write(b"AT\r\n").await?;
//! let reply = port.read(64).await?;
//! ```

pub mod protocol;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::protocol::{
        ChipVariant, ControlLines, DataBits, DeviceId, LineConfig, ModemStatus, Parity, Port,
        PortConfig, PortError, PortState, StopBits, Transport, TransportError,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

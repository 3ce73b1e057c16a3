//! Chip variants and the encoder interface
//!
//! A [`ChipVariant`] is resolved once from the device's vendor/product pair.
//! Every chip family implements [`ChipProtocol`]; the port only ever talks to
//! the chip through that trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use super::{
    ch341::Ch341, cp210x::Cp210x, ControlLines, LineConfig, ModemStatus, PortConfig, PortError,
    Result, TransferDescriptor, Transport,
};

/// USB vendor/product identifier pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId {
    /// USB vendor ID
    pub vendor_id: u16,
    /// USB product ID
    pub product_id: u16,
}

impl DeviceId {
    /// Pair from raw IDs
    pub const fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

/// Supported bridge chip families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChipVariant {
    /// CP210x-style bridge, `067b:2303`
    Cp210x,
    /// CH341 bridge, `1a86:7523`
    Ch341,
}

/// Devices this crate knows how to drive
const SUPPORTED_DEVICES: [(DeviceId, ChipVariant); 2] = [
    (DeviceId::new(0x067b, 0x2303), ChipVariant::Cp210x),
    (DeviceId::new(0x1a86, 0x7523), ChipVariant::Ch341),
];

impl ChipVariant {
    /// Look up the chip family for a vendor/product pair
    pub fn from_device(id: DeviceId) -> Option<Self> {
        SUPPORTED_DEVICES
            .iter()
            .find(|(known, _)| *known == id)
            .map(|(_, variant)| *variant)
    }

    /// Endpoint numbers the chip's firmware exposes
    pub fn default_endpoints(self) -> Endpoints {
        match self {
            ChipVariant::Cp210x => Endpoints {
                bulk_in: 3,
                bulk_out: 2,
                status: 1,
            },
            ChipVariant::Ch341 => Endpoints {
                bulk_in: 2,
                bulk_out: 2,
                status: 1,
            },
        }
    }

    /// Build the encoder for this chip family
    pub fn protocol(self, config: &PortConfig) -> Box<dyn ChipProtocol> {
        match self {
            ChipVariant::Cp210x => Box::new(Cp210x::new(config.vendor_init)),
            ChipVariant::Ch341 => Box::new(Ch341),
        }
    }
}

/// Endpoint numbers used for serial data and modem status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    /// Bulk IN endpoint for received data
    pub bulk_in: u8,
    /// Bulk OUT endpoint for transmitted data
    pub bulk_out: u8,
    /// Interrupt endpoint carrying status notifications
    pub status: u8,
}

/// Chip-specific encoding of the serial operations
///
/// Implementations issue their transfers strictly in order and return the
/// first failure without issuing anything further.
#[async_trait]
pub trait ChipProtocol: Send + Sync {
    /// Chip family this encoder drives
    fn variant(&self) -> ChipVariant;

    /// Reject line configurations the chip cannot express
    fn validate(&self, line: &LineConfig) -> Result<()>;

    /// Bring the chip from freshly opened to configured
    ///
    /// Returns the firmware version when the chip reports one.
    async fn initialize(
        &self,
        transport: &dyn Transport,
        line: &LineConfig,
        lines: ControlLines,
    ) -> Result<Option<u16>>;

    /// Program baud rate and framing
    async fn set_line_config(&self, transport: &dyn Transport, line: &LineConfig) -> Result<()>;

    /// Change only the rate; `line` carries the full configuration for chips
    /// that cannot program the rate on its own
    async fn set_baud_rate(&self, transport: &dyn Transport, line: &LineConfig) -> Result<()>;

    /// Drive DTR and RTS
    async fn set_control_lines(&self, transport: &dyn Transport, lines: ControlLines)
        -> Result<()>;

    /// Start or stop a break condition
    async fn send_break(&self, transport: &dyn Transport, enable: bool) -> Result<()>;

    /// Read the modem status inputs
    async fn read_status(
        &self,
        transport: &dyn Transport,
        endpoints: &Endpoints,
    ) -> Result<ModemStatus>;

    /// Line configuration as currently programmed into the chip
    async fn read_line_config(&self, transport: &dyn Transport) -> Result<LineConfig>;
}

/// Submit an OUT control transfer and check the whole payload was accepted
pub(crate) async fn control_out(
    transport: &dyn Transport,
    descriptor: TransferDescriptor,
    payload: &[u8],
) -> Result<()> {
    debug!("control out {} payload {:02x?}", descriptor, payload);
    let written = transport.control_transfer_out(&descriptor, payload).await?;
    if written < payload.len() {
        return Err(PortError::ProtocolViolation {
            expected: payload.len(),
            actual: written,
        });
    }
    Ok(())
}

/// Submit an IN control transfer and require the full expected length
pub(crate) async fn control_in(
    transport: &dyn Transport,
    descriptor: TransferDescriptor,
) -> Result<Vec<u8>> {
    let data = transport.control_transfer_in(&descriptor).await?;
    debug!("control in {} -> {:02x?}", descriptor, data);
    if data.len() < descriptor.length as usize {
        return Err(PortError::ProtocolViolation {
            expected: descriptor.length as usize,
            actual: data.len(),
        });
    }
    Ok(data)
}

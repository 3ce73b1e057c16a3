//! Transport abstraction
//!
//! The protocol layer never talks to a USB stack directly. Hosts implement
//! [`Transport`] on top of whatever executes transfers (WebUSB, libusb,
//! nusb, a mock in tests) and hand it to a [`Port`](super::Port).

use async_trait::async_trait;

use super::{TransferDescriptor, TransportError};

/// Result of a transport operation
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// USB primitives consumed by the chip encoders
///
/// Methods take `&self` so bulk transfers on separate endpoints may be in
/// flight at the same time. Ordering of control transfers is enforced by
/// the port, not by implementations.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the device handle
    async fn open(&self) -> TransportResult<()>;

    /// Release the device handle
    async fn close(&self) -> TransportResult<()>;

    /// Currently active configuration value, if any
    fn configuration(&self) -> Option<u8>;

    /// Make `configuration` the active configuration
    async fn select_configuration(&self, configuration: u8) -> TransportResult<()>;

    /// Claim `interface` for exclusive use
    async fn claim_interface(&self, interface: u8) -> TransportResult<()>;

    /// Select an alternate setting on a claimed interface
    async fn select_alternate_interface(
        &self,
        interface: u8,
        alternate_setting: u8,
    ) -> TransportResult<()>;

    /// Port reset of the device; configuration state on the chip is lost
    async fn reset(&self) -> TransportResult<()>;

    /// Host-to-device control transfer, returns the number of bytes accepted
    async fn control_transfer_out(
        &self,
        descriptor: &TransferDescriptor,
        payload: &[u8],
    ) -> TransportResult<usize>;

    /// Device-to-host control transfer of up to `descriptor.length` bytes
    async fn control_transfer_in(&self, descriptor: &TransferDescriptor)
        -> TransportResult<Vec<u8>>;

    /// Send `data` on a bulk OUT endpoint, returns the bytes written
    async fn bulk_transfer_out(&self, endpoint: u8, data: &[u8]) -> TransportResult<usize>;

    /// Receive up to `max_length` bytes from a bulk IN endpoint
    async fn bulk_transfer_in(&self, endpoint: u8, max_length: usize) -> TransportResult<Vec<u8>>;
}

//! Protocol errors

use thiserror::Error;

/// Failures reported by the transport collaborator
#[derive(Error, Debug)]
pub enum TransportError {
    /// The endpoint returned STALL
    #[error("Endpoint stalled")]
    Stall,

    /// The transfer did not complete in time
    #[error("Transfer timed out")]
    Timeout,

    /// The device is gone
    #[error("Device disconnected")]
    Disconnected,

    /// The host stack refused the request
    #[error("Transfer rejected: {0}")]
    Rejected(String),

    /// Host I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by a [`Port`](super::Port)
#[derive(Error, Debug)]
pub enum PortError {
    /// Opening or claiming the device failed
    #[error("Connection failed: {0}")]
    ConnectionError(String),

    /// A transfer failed in the transport
    #[error("Transfer failed: {0}")]
    TransferFailure(#[from] TransportError),

    /// The chip cannot be programmed for this rate
    #[error("Unsupported baud rate: {0}")]
    UnsupportedBaudRate(u32),

    /// The chip cannot express this framing
    #[error("Unsupported line configuration: {0}")]
    UnsupportedLineConfig(String),

    /// Vendor/product pair is not a known bridge chip
    #[error("Unsupported device {vendor_id:04x}:{product_id:04x}")]
    UnsupportedDevice {
        /// USB vendor ID
        vendor_id: u16,
        /// USB product ID
        product_id: u16,
    },

    /// Operation on a closed port
    #[error("Port is closed")]
    PortClosed,

    /// The device returned fewer bytes than the request needs
    #[error("Protocol violation: expected {expected} bytes, got {actual}")]
    ProtocolViolation {
        /// Bytes the request requires
        expected: usize,
        /// Bytes actually transferred
        actual: usize,
    },

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PortError {
    /// True when the underlying transport reported the device as gone
    pub fn is_disconnect(&self) -> bool {
        matches!(self, PortError::TransferFailure(TransportError::Disconnected))
    }
}

/// Result alias used throughout the protocol layer
pub type Result<T> = std::result::Result<T, PortError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_device_display() {
        let err = PortError::UnsupportedDevice {
            vendor_id: 0x0403,
            product_id: 0x6001,
        };
        assert_eq!(err.to_string(), "Unsupported device 0403:6001");
    }

    #[test]
    fn test_transport_error_conversion() {
        let err: PortError = TransportError::Disconnected.into();
        assert!(err.is_disconnect());
        let err: PortError = TransportError::Stall.into();
        assert!(!err.is_disconnect());
    }
}

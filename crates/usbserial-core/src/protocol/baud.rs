//! CH341 baud rate divisor arithmetic
//!
//! The chip derives its bit clock from a fixed base factor. A requested
//! rate is encoded as a 16-bit register pair value:
//!
//! - bits 15..8: high byte of `0x10000 - factor`
//! - bit 7: set, marks the value as a divisor (and disables the chip's
//!   32-byte receive buffering)
//! - bits 1..0: prescaler index, 3 = no prescaling, each step down
//!   divides the factor by 8
//!
//! The low byte of the factor is discarded by the encoding, so decoded rates
//! differ from the requested ones by up to `256 / factor`. Rates the chip
//! would run more than [`MAX_ERROR_PERMILLE`] off are rejected.

use super::{PortError, Result};

/// Base clock factor of the CH341
pub const BASE_FACTOR: u32 = 1_532_620_800;

/// Largest prescaler index (no prescaling)
pub const MAX_PRESCALER: u8 = 3;

/// Largest factor that fits the divisor register
const MAX_FACTOR: u32 = 0xfff0;

/// Largest accepted deviation of the programmed rate, in parts per thousand
pub const MAX_ERROR_PERMILLE: u64 = 35;

const DIVISOR_FLAG: u16 = 0x80;
const PRESCALER_MASK: u16 = 0x03;

/// Encode a baud rate into the CH341 divisor register value
pub fn encode(baud_rate: u32) -> Result<u16> {
    if baud_rate == 0 {
        return Err(PortError::UnsupportedBaudRate(baud_rate));
    }

    let mut factor = BASE_FACTOR / baud_rate;
    let mut prescaler = MAX_PRESCALER;

    while factor > MAX_FACTOR && prescaler > 0 {
        factor >>= 3;
        prescaler -= 1;
    }

    if factor == 0 || factor > MAX_FACTOR {
        return Err(PortError::UnsupportedBaudRate(baud_rate));
    }

    let scaled = ((0x10000 - factor) as u16) & 0xff00;
    let encoded = scaled | prescaler as u16 | DIVISOR_FLAG;

    // Small factors lose most of their precision to the dropped low byte
    let actual = decode(encoded).ok_or(PortError::UnsupportedBaudRate(baud_rate))?;
    if actual.abs_diff(baud_rate) as u64 * 1000 > baud_rate as u64 * MAX_ERROR_PERMILLE {
        return Err(PortError::UnsupportedBaudRate(baud_rate));
    }
    Ok(encoded)
}

/// Recover the baud rate a divisor register value selects
///
/// Returns `None` for values that do not carry the divisor flag.
pub fn decode(encoded: u16) -> Option<u32> {
    if encoded & DIVISOR_FLAG == 0 {
        return None;
    }

    let prescaler = (encoded & PRESCALER_MASK) as u32;
    let factor = 0x10000 - (encoded & 0xff00) as u32;
    let shift = 3 * (MAX_PRESCALER as u32 - prescaler);

    Some(BASE_FACTOR / (factor << shift))
}

//! CH341-style bridge encoder
//!
//! All requests are vendor requests addressed to the device. Registers are
//! accessed in pairs: `value = (hi << 8) | lo` selects the pair, a write
//! stores the low byte of `index` into `lo` and the high byte into `hi`,
//! and a 2-byte read returns `[lo, hi]`.
//!
//! The firmware must see its initialization in a fixed order after open:
//!
//! 1. read firmware version
//! 2. serial init
//! 3. baud divisor write
//! 4. line control write
//! 5. modem control write
//!
//! Skipping or reordering steps leaves the chip unresponsive.

use async_trait::async_trait;
use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, info};

use super::chip::{control_in, control_out, ChipProtocol, ChipVariant, Endpoints};
use super::{
    baud, ControlLines, DataBits, LineConfig, ModemStatus, Parity, PortError, Result, StopBits,
    TransferDescriptor, Transport,
};

/// Read the two-byte firmware version
pub const REQ_READ_VERSION: u8 = 0x5f;
/// Write a register pair
pub const REQ_WRITE_REG: u8 = 0x9a;
/// Read a register pair
pub const REQ_READ_REG: u8 = 0x95;
/// Reset the UART side of the chip
pub const REQ_SERIAL_INIT: u8 = 0xa1;
/// Drive the modem control outputs (inverted)
pub const REQ_MODEM_CTRL: u8 = 0xa4;

/// Break control register
pub const REG_BREAK: u8 = 0x05;
/// Modem status inputs, active-low
pub const REG_STATUS: u8 = 0x06;
/// Second status register, read together with `REG_STATUS`
pub const REG_STATUS2: u8 = 0x07;
/// Baud prescaler, low byte of the divisor pair
pub const REG_PRESCALER: u8 = 0x12;
/// Baud divisor, high byte of the divisor pair
pub const REG_DIVISOR: u8 = 0x13;
/// Line control register
pub const REG_LCR: u8 = 0x18;
/// Second line control register, written as zero
pub const REG_LCR2: u8 = 0x25;

/// Receiver enable
pub const LCR_ENABLE_RX: u8 = 0x80;
/// Transmitter enable
pub const LCR_ENABLE_TX: u8 = 0x40;
/// Sticky parity (mark or space)
pub const LCR_MARK_SPACE: u8 = 0x20;
/// Even parity, space when combined with `LCR_MARK_SPACE`
pub const LCR_PAR_EVEN: u8 = 0x10;
/// Parity enable
pub const LCR_ENABLE_PAR: u8 = 0x08;
/// Two stop bits
pub const LCR_STOP_BITS_2: u8 = 0x04;
/// 8 data bits
pub const LCR_CS8: u8 = 0x03;
/// 7 data bits
pub const LCR_CS7: u8 = 0x02;
/// 6 data bits
pub const LCR_CS6: u8 = 0x01;
/// 5 data bits
pub const LCR_CS5: u8 = 0x00;

/// Break register bit, active-low: cleared while a break is on the line
pub const NBREAK_BITS: u8 = 0x01;

/// DTR in the modem control value before inversion
pub const BIT_DTR: u16 = 1 << 5;
/// RTS in the modem control value before inversion
pub const BIT_RTS: u16 = 1 << 6;

/// CTS in the status byte
pub const BIT_CTS: u8 = 0x01;
/// DSR in the status byte
pub const BIT_DSR: u8 = 0x02;
/// Ring indicator in the status byte
pub const BIT_RI: u8 = 0x04;
/// Carrier detect in the status byte
pub const BIT_DCD: u8 = 0x08;

const VERSION_LEN: u16 = 2;
const REG_PAIR_LEN: u16 = 2;

/// Selector for a register pair
pub const fn reg_pair(hi: u8, lo: u8) -> u16 {
    ((hi as u16) << 8) | lo as u16
}

/// Divisor and prescaler
pub const BAUD_REGS: u16 = reg_pair(REG_DIVISOR, REG_PRESCALER);
/// Both line control registers
pub const LCR_REGS: u16 = reg_pair(REG_LCR2, REG_LCR);
/// Break register and line control, as used for break
pub const BREAK_REGS: u16 = reg_pair(REG_LCR, REG_BREAK);
/// Both status registers
pub const STATUS_REGS: u16 = reg_pair(REG_STATUS2, REG_STATUS);

/// Firmware version read, 2 bytes
pub fn read_version_request() -> TransferDescriptor {
    TransferDescriptor::vendor_in(REQ_READ_VERSION, 0, 0, VERSION_LEN)
}

/// UART initialization
pub fn serial_init_request() -> TransferDescriptor {
    TransferDescriptor::vendor_out(REQ_SERIAL_INIT, 0, 0)
}

/// Write `contents` into the register pair `regs`
pub fn write_reg_request(regs: u16, contents: u16) -> TransferDescriptor {
    TransferDescriptor::vendor_out(REQ_WRITE_REG, regs, contents)
}

/// Read the register pair `regs`, 2 bytes
pub fn read_reg_request(regs: u16) -> TransferDescriptor {
    TransferDescriptor::vendor_in(REQ_READ_REG, regs, 0, REG_PAIR_LEN)
}

/// Divisor register write for a baud rate
pub fn baud_request(baud_rate: u32) -> Result<TransferDescriptor> {
    Ok(write_reg_request(BAUD_REGS, baud::encode(baud_rate)?))
}

/// Line control register write
pub fn lcr_request(line: &LineConfig) -> Result<TransferDescriptor> {
    Ok(write_reg_request(LCR_REGS, encode_lcr(line)? as u16))
}

/// Modem control write; the chip asserts a line when its bit is cleared
pub fn modem_ctrl_request(lines: ControlLines) -> TransferDescriptor {
    let mut mcr = 0u16;
    if lines.dtr {
        mcr |= BIT_DTR;
    }
    if lines.rts {
        mcr |= BIT_RTS;
    }
    TransferDescriptor::vendor_out(REQ_MODEM_CTRL, !mcr, 0)
}

/// Read the modem status registers
pub fn status_request() -> TransferDescriptor {
    read_reg_request(STATUS_REGS)
}

/// Line control register value for a configuration
pub fn encode_lcr(line: &LineConfig) -> Result<u8> {
    let mut lcr = LCR_ENABLE_RX | LCR_ENABLE_TX;

    lcr |= match line.data_bits {
        DataBits::Five => LCR_CS5,
        DataBits::Six => LCR_CS6,
        DataBits::Seven => LCR_CS7,
        DataBits::Eight => LCR_CS8,
    };

    lcr |= match line.parity {
        Parity::None => 0,
        Parity::Odd => LCR_ENABLE_PAR,
        Parity::Even => LCR_ENABLE_PAR | LCR_PAR_EVEN,
        Parity::Mark => LCR_ENABLE_PAR | LCR_MARK_SPACE,
        Parity::Space => LCR_ENABLE_PAR | LCR_MARK_SPACE | LCR_PAR_EVEN,
    };

    lcr |= match line.stop_bits {
        StopBits::One => 0,
        StopBits::Two => LCR_STOP_BITS_2,
        StopBits::OnePointFive => {
            return Err(PortError::UnsupportedLineConfig(
                "CH341 has no 1.5 stop bit mode".to_string(),
            ))
        }
    };

    Ok(lcr)
}

/// Framing fields of a line control register value
pub fn decode_lcr(lcr: u8) -> (DataBits, Parity, StopBits) {
    let data_bits = match lcr & 0x03 {
        LCR_CS5 => DataBits::Five,
        LCR_CS6 => DataBits::Six,
        LCR_CS7 => DataBits::Seven,
        _ => DataBits::Eight,
    };

    let parity = if lcr & LCR_ENABLE_PAR == 0 {
        Parity::None
    } else {
        match (lcr & LCR_MARK_SPACE != 0, lcr & LCR_PAR_EVEN != 0) {
            (false, false) => Parity::Odd,
            (false, true) => Parity::Even,
            (true, false) => Parity::Mark,
            (true, true) => Parity::Space,
        }
    };

    let stop_bits = if lcr & LCR_STOP_BITS_2 != 0 {
        StopBits::Two
    } else {
        StopBits::One
    };

    (data_bits, parity, stop_bits)
}

/// Decode the modem status register pair
///
/// Inputs are active-low in the first byte.
pub fn decode_status(data: &[u8]) -> Result<ModemStatus> {
    if data.len() < REG_PAIR_LEN as usize {
        return Err(PortError::ProtocolViolation {
            expected: REG_PAIR_LEN as usize,
            actual: data.len(),
        });
    }

    let msr = !data[0];
    Ok(ModemStatus {
        cts: msr & BIT_CTS != 0,
        dsr: msr & BIT_DSR != 0,
        ri: msr & BIT_RI != 0,
        dcd: msr & BIT_DCD != 0,
    })
}

/// Break/LCR register contents with the break state applied
///
/// Only `NBREAK_BITS` in the break register and `LCR_ENABLE_TX` in the
/// line control register change.
pub fn apply_break(current: [u8; 2], enable: bool) -> u16 {
    let mut regs = current;
    if enable {
        regs[0] &= !NBREAK_BITS;
        regs[1] &= !LCR_ENABLE_TX;
    } else {
        regs[0] |= NBREAK_BITS;
        regs[1] |= LCR_ENABLE_TX;
    }
    LittleEndian::read_u16(&regs)
}

/// CH341 encoder
#[derive(Debug, Clone, Copy, Default)]
pub struct Ch341;

impl Ch341 {
    /// Firmware version, little-endian
    pub async fn read_version(&self, transport: &dyn Transport) -> Result<u16> {
        let data = control_in(transport, read_version_request()).await?;
        Ok(LittleEndian::read_u16(&data[..2]))
    }

    /// Read a register pair as `[lo, hi]`
    pub async fn read_registers(&self, transport: &dyn Transport, regs: u16) -> Result<[u8; 2]> {
        let data = control_in(transport, read_reg_request(regs)).await?;
        Ok([data[0], data[1]])
    }

    /// Write a register pair
    pub async fn write_registers(
        &self,
        transport: &dyn Transport,
        regs: u16,
        contents: u16,
    ) -> Result<()> {
        control_out(transport, write_reg_request(regs, contents), &[]).await
    }
}

#[async_trait]
impl ChipProtocol for Ch341 {
    fn variant(&self) -> ChipVariant {
        ChipVariant::Ch341
    }

    fn validate(&self, line: &LineConfig) -> Result<()> {
        baud::encode(line.baud_rate)?;
        encode_lcr(line)?;
        Ok(())
    }

    async fn initialize(
        &self,
        transport: &dyn Transport,
        line: &LineConfig,
        lines: ControlLines,
    ) -> Result<Option<u16>> {
        // Encode everything up front so a bad config never starts the sequence
        let baud = baud_request(line.baud_rate)?;
        let lcr = lcr_request(line)?;

        let version = self.read_version(transport).await?;
        debug!("CH341 firmware version {:#06x}", version);

        control_out(transport, serial_init_request(), &[]).await?;
        control_out(transport, baud, &[]).await?;
        control_out(transport, lcr, &[]).await?;
        control_out(transport, modem_ctrl_request(lines), &[]).await?;

        info!("CH341 initialized at {} (firmware {:#06x})", line, version);
        Ok(Some(version))
    }

    async fn set_line_config(&self, transport: &dyn Transport, line: &LineConfig) -> Result<()> {
        let baud = baud_request(line.baud_rate)?;
        let lcr = lcr_request(line)?;
        control_out(transport, baud, &[]).await?;
        control_out(transport, lcr, &[]).await
    }

    async fn set_baud_rate(&self, transport: &dyn Transport, line: &LineConfig) -> Result<()> {
        control_out(transport, baud_request(line.baud_rate)?, &[]).await
    }

    async fn set_control_lines(
        &self,
        transport: &dyn Transport,
        lines: ControlLines,
    ) -> Result<()> {
        control_out(transport, modem_ctrl_request(lines), &[]).await
    }

    async fn send_break(&self, transport: &dyn Transport, enable: bool) -> Result<()> {
        let current = self.read_registers(transport, BREAK_REGS).await?;
        let contents = apply_break(current, enable);
        debug!(
            "break {} {:02x?} -> {:#06x}",
            if enable { "on" } else { "off" },
            current,
            contents
        );
        self.write_registers(transport, BREAK_REGS, contents).await
    }

    async fn read_status(
        &self,
        transport: &dyn Transport,
        _endpoints: &Endpoints,
    ) -> Result<ModemStatus> {
        let data = control_in(transport, status_request()).await?;
        decode_status(&data)
    }

    async fn read_line_config(&self, transport: &dyn Transport) -> Result<LineConfig> {
        let baud_regs = self.read_registers(transport, BAUD_REGS).await?;
        let lcr_regs = self.read_registers(transport, LCR_REGS).await?;

        let divisor = LittleEndian::read_u16(&baud_regs);
        let baud_rate = baud::decode(divisor).ok_or_else(|| {
            PortError::UnsupportedLineConfig(format!("divisor register {divisor:#06x}"))
        })?;
        let (data_bits, parity, stop_bits) = decode_lcr(lcr_regs[0]);

        Ok(LineConfig::new(baud_rate, data_bits, parity, stop_bits))
    }
}

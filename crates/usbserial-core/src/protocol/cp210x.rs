//! CP210x-style bridge encoder
//!
//! Register access goes through a single vendor request; line coding,
//! control lines and break use class requests addressed to interface 0.
//! Every operation is exactly one control transfer.
//!
//! Line coding layout (7 bytes):
//! - 4 bytes: rate in bit/s (little-endian)
//! - 1 byte: stop bits (0 = 1, 1 = 1.5, 2 = 2)
//! - 1 byte: parity (0 none, 1 odd, 2 even, 3 mark, 4 space)
//! - 1 byte: data bits (5..=8)

use async_trait::async_trait;
use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, info};

use super::chip::{control_in, control_out, ChipProtocol, ChipVariant, Endpoints};
use super::{
    ControlLines, DataBits, LineConfig, ModemStatus, Parity, PortError, Result, StopBits,
    TransferDescriptor, Transport,
};

/// Vendor register read
pub const VENDOR_READ_REQUEST: u8 = 0x01;
/// Vendor register write
pub const VENDOR_WRITE_REQUEST: u8 = 0x01;
/// Read the line coding
pub const GET_LINE_REQUEST: u8 = 0x21;
/// Write the line coding
pub const SET_LINE_REQUEST: u8 = 0x20;
/// Set the control line state
pub const SET_CONTROL_REQUEST: u8 = 0x22;
/// Start or stop a break
pub const BREAK_REQUEST: u8 = 0x23;

/// DTR bit of the control line value
pub const CONTROL_DTR: u16 = 0x01;
/// RTS bit of the control line value
pub const CONTROL_RTS: u16 = 0x02;

const BREAK_ON: u16 = 0xffff;
const BREAK_OFF: u16 = 0x0000;

/// Size of the line coding structure
pub const LINE_CODING_LEN: u16 = 7;

/// Status notifications carry the UART state at this offset
const STATUS_STATE_INDEX: usize = 8;
const STATUS_NOTIFICATION_LEN: usize = 10;

const STATE_DCD: u8 = 0x01;
const STATE_DSR: u8 = 0x02;
const STATE_RING: u8 = 0x08;
const STATE_CTS: u8 = 0x80;

#[derive(Debug, Clone, Copy)]
enum VendorStep {
    Read(u16),
    Write(u16, u16),
}

/// Vendor handshake some firmware revisions expect right after open
const VENDOR_INIT: [VendorStep; 11] = [
    VendorStep::Read(0x8484),
    VendorStep::Write(0x0404, 0),
    VendorStep::Read(0x8484),
    VendorStep::Read(0x8383),
    VendorStep::Read(0x8484),
    VendorStep::Write(0x0404, 1),
    VendorStep::Read(0x8484),
    VendorStep::Read(0x8383),
    VendorStep::Write(0, 1),
    VendorStep::Write(1, 0),
    VendorStep::Write(2, 0x24),
];

/// Read one byte from a vendor register
pub fn vendor_read_request(register: u16) -> TransferDescriptor {
    TransferDescriptor::vendor_in(VENDOR_READ_REQUEST, register, 0, 1)
}

/// Write `value` to a vendor register
pub fn vendor_write_request(register: u16, value: u16) -> TransferDescriptor {
    TransferDescriptor::vendor_out(VENDOR_WRITE_REQUEST, register, value)
}

/// Read the 7-byte line coding
pub fn get_line_request() -> TransferDescriptor {
    TransferDescriptor::class_in(GET_LINE_REQUEST, 0, 0, LINE_CODING_LEN)
}

/// Write the 7-byte line coding carried as payload
pub fn set_line_request() -> TransferDescriptor {
    TransferDescriptor::class_out(SET_LINE_REQUEST, 0, 0, LINE_CODING_LEN)
}

/// Set DTR/RTS from `bits`
pub fn set_control_request(bits: u16) -> TransferDescriptor {
    TransferDescriptor::class_out(SET_CONTROL_REQUEST, bits, 0, 0)
}

/// Start (`0xffff`) or stop (`0`) a break
pub fn break_request(enable: bool) -> TransferDescriptor {
    let value = if enable { BREAK_ON } else { BREAK_OFF };
    TransferDescriptor::class_out(BREAK_REQUEST, value, 0, 0)
}

/// Control bits for the requested output lines
pub fn control_bits(lines: ControlLines) -> u16 {
    let mut bits = 0;
    if lines.dtr {
        bits |= CONTROL_DTR;
    }
    if lines.rts {
        bits |= CONTROL_RTS;
    }
    bits
}

/// Encode a line configuration into the 7-byte line coding
pub fn encode_line_coding(line: &LineConfig) -> Result<[u8; 7]> {
    validate_line(line)?;

    let mut coding = [0u8; 7];
    LittleEndian::write_u32(&mut coding[0..4], line.baud_rate);
    coding[4] = match line.stop_bits {
        StopBits::One => 0,
        StopBits::OnePointFive => 1,
        StopBits::Two => 2,
    };
    coding[5] = match line.parity {
        Parity::None => 0,
        Parity::Odd => 1,
        Parity::Even => 2,
        Parity::Mark => 3,
        Parity::Space => 4,
    };
    coding[6] = line.data_bits.bits();
    Ok(coding)
}

/// Decode a line coding returned by the chip
pub fn decode_line_coding(data: &[u8]) -> Result<LineConfig> {
    if data.len() < LINE_CODING_LEN as usize {
        return Err(PortError::ProtocolViolation {
            expected: LINE_CODING_LEN as usize,
            actual: data.len(),
        });
    }

    let baud_rate = LittleEndian::read_u32(&data[0..4]);
    let stop_bits = match data[4] {
        0 => StopBits::One,
        1 => StopBits::OnePointFive,
        2 => StopBits::Two,
        other => {
            return Err(PortError::UnsupportedLineConfig(format!(
                "stop bit code {other}"
            )))
        }
    };
    let parity = match data[5] {
        0 => Parity::None,
        1 => Parity::Odd,
        2 => Parity::Even,
        3 => Parity::Mark,
        4 => Parity::Space,
        other => {
            return Err(PortError::UnsupportedLineConfig(format!(
                "parity code {other}"
            )))
        }
    };
    let data_bits = DataBits::try_from(data[6])?;

    Ok(LineConfig::new(baud_rate, data_bits, parity, stop_bits))
}

/// Decode a status notification read from the interrupt endpoint
pub fn decode_status(data: &[u8]) -> Result<ModemStatus> {
    let state = *data
        .get(STATUS_STATE_INDEX)
        .ok_or(PortError::ProtocolViolation {
            expected: STATUS_STATE_INDEX + 1,
            actual: data.len(),
        })?;

    Ok(ModemStatus {
        cts: state & STATE_CTS != 0,
        dsr: state & STATE_DSR != 0,
        ri: state & STATE_RING != 0,
        dcd: state & STATE_DCD != 0,
    })
}

fn validate_line(line: &LineConfig) -> Result<()> {
    if line.baud_rate == 0 {
        return Err(PortError::UnsupportedBaudRate(line.baud_rate));
    }
    // 1.5 stop bits only exist for 5-bit characters
    if line.stop_bits == StopBits::OnePointFive && line.data_bits != DataBits::Five {
        return Err(PortError::UnsupportedLineConfig(format!(
            "1.5 stop bits with {} data bits",
            line.data_bits.bits()
        )));
    }
    Ok(())
}

/// CP210x encoder
#[derive(Debug, Clone, Copy, Default)]
pub struct Cp210x {
    vendor_init: bool,
}

impl Cp210x {
    /// `vendor_init` enables the vendor handshake at the start of initialization
    pub fn new(vendor_init: bool) -> Self {
        Self { vendor_init }
    }

    /// Read a vendor register
    pub async fn vendor_read(&self, transport: &dyn Transport, register: u16) -> Result<u8> {
        let data = control_in(transport, vendor_read_request(register)).await?;
        Ok(data[0])
    }

    /// Write a vendor register
    pub async fn vendor_write(
        &self,
        transport: &dyn Transport,
        register: u16,
        value: u16,
    ) -> Result<()> {
        control_out(transport, vendor_write_request(register, value), &[]).await
    }

    /// Line coding as the chip reports it
    pub async fn get_line_request(&self, transport: &dyn Transport) -> Result<LineConfig> {
        let data = control_in(transport, get_line_request()).await?;
        decode_line_coding(&data)
    }

    /// Write the line coding for `line`
    pub async fn set_line_request(
        &self,
        transport: &dyn Transport,
        line: &LineConfig,
    ) -> Result<()> {
        let coding = encode_line_coding(line)?;
        control_out(transport, set_line_request(), &coding).await
    }

    /// Write the control line bits
    pub async fn set_control_request(&self, transport: &dyn Transport, bits: u16) -> Result<()> {
        control_out(transport, set_control_request(bits), &[]).await
    }

    async fn run_vendor_init(&self, transport: &dyn Transport) -> Result<()> {
        for step in VENDOR_INIT {
            match step {
                VendorStep::Read(register) => {
                    let value = self.vendor_read(transport, register).await?;
                    debug!("vendor register {:#06x} = {:#04x}", register, value);
                }
                VendorStep::Write(register, value) => {
                    self.vendor_write(transport, register, value).await?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ChipProtocol for Cp210x {
    fn variant(&self) -> ChipVariant {
        ChipVariant::Cp210x
    }

    fn validate(&self, line: &LineConfig) -> Result<()> {
        validate_line(line)
    }

    async fn initialize(
        &self,
        transport: &dyn Transport,
        line: &LineConfig,
        lines: ControlLines,
    ) -> Result<Option<u16>> {
        validate_line(line)?;
        if self.vendor_init {
            self.run_vendor_init(transport).await?;
        }
        self.set_line_request(transport, line).await?;
        self.set_control_request(transport, control_bits(lines)).await?;
        info!("CP210x initialized at {}", line);
        Ok(None)
    }

    async fn set_line_config(&self, transport: &dyn Transport, line: &LineConfig) -> Result<()> {
        self.set_line_request(transport, line).await
    }

    async fn set_baud_rate(&self, transport: &dyn Transport, line: &LineConfig) -> Result<()> {
        self.set_line_request(transport, line).await
    }

    async fn set_control_lines(
        &self,
        transport: &dyn Transport,
        lines: ControlLines,
    ) -> Result<()> {
        self.set_control_request(transport, control_bits(lines)).await
    }

    async fn send_break(&self, transport: &dyn Transport, enable: bool) -> Result<()> {
        control_out(transport, break_request(enable), &[]).await
    }

    async fn read_status(
        &self,
        transport: &dyn Transport,
        endpoints: &Endpoints,
    ) -> Result<ModemStatus> {
        let data = transport
            .bulk_transfer_in(endpoints.status, STATUS_NOTIFICATION_LEN)
            .await?;
        debug!("status notification {:02x?}", data);
        decode_status(&data)
    }

    async fn read_line_config(&self, transport: &dyn Transport) -> Result<LineConfig> {
        self.get_line_request(transport).await
    }
}

//! Serial line parameters
//!
//! Chip-independent descriptions of the line configuration, the modem
//! control outputs and the modem status inputs. Each chip encoder decides
//! which combinations it can express.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{PortError, Result, DEFAULT_BAUD_RATE};

/// Number of data bits per character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DataBits {
    /// 5 data bits
    Five,
    /// 6 data bits
    Six,
    /// 7 data bits
    Seven,
    /// 8 data bits
    Eight,
}

impl DataBits {
    /// Every supported width, smallest first
    pub const ALL: [DataBits; 4] = [
        DataBits::Five,
        DataBits::Six,
        DataBits::Seven,
        DataBits::Eight,
    ];

    /// Character width in bits
    pub fn bits(self) -> u8 {
        match self {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }
}

impl TryFrom<u8> for DataBits {
    type Error = PortError;

    fn try_from(bits: u8) -> Result<Self> {
        match bits {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            other => Err(PortError::UnsupportedLineConfig(format!(
                "{other} data bits"
            ))),
        }
    }
}

impl From<DataBits> for u8 {
    fn from(bits: DataBits) -> u8 {
        bits.bits()
    }
}

/// Parity mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    /// No parity bit
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
    /// Parity bit always 1
    Mark,
    /// Parity bit always 0
    Space,
}

impl Parity {
    /// Every parity mode
    pub const ALL: [Parity; 5] = [
        Parity::None,
        Parity::Odd,
        Parity::Even,
        Parity::Mark,
        Parity::Space,
    ];
}

/// Number of stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StopBits {
    /// 1 stop bit
    #[serde(rename = "1")]
    One,
    /// 1.5 stop bits
    #[serde(rename = "1.5")]
    OnePointFive,
    /// 2 stop bits
    #[serde(rename = "2")]
    Two,
}

impl StopBits {
    /// Every stop bit setting
    pub const ALL: [StopBits; 3] = [StopBits::One, StopBits::OnePointFive, StopBits::Two];
}

/// Line configuration applied to the UART side of the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineConfig {
    /// Rate in bit/s
    pub baud_rate: u32,
    /// Character width
    pub data_bits: DataBits,
    /// Parity mode
    pub parity: Parity,
    /// Stop bits
    pub stop_bits: StopBits,
}

impl LineConfig {
    /// Line configuration from its parts
    pub fn new(baud_rate: u32, data_bits: DataBits, parity: Parity, stop_bits: StopBits) -> Self {
        Self {
            baud_rate,
            data_bits,
            parity,
            stop_bits,
        }
    }

    /// Same framing at a different rate
    pub fn with_baud_rate(self, baud_rate: u32) -> Self {
        Self { baud_rate, ..self }
    }
}

impl Default for LineConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BAUD_RATE, DataBits::Eight, Parity::None, StopBits::One)
    }
}

impl fmt::Display for LineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
            Parity::Mark => 'M',
            Parity::Space => 'S',
        };
        let stop = match self.stop_bits {
            StopBits::One => "1",
            StopBits::OnePointFive => "1.5",
            StopBits::Two => "2",
        };
        write!(f, "{} {}{}{}", self.baud_rate, self.data_bits.bits(), parity, stop)
    }
}

/// Modem control outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlLines {
    /// Data terminal ready
    pub dtr: bool,
    /// Request to send
    pub rts: bool,
}

impl Default for ControlLines {
    /// Both asserted, so Arduino-style targets are not reset when the port opens
    fn default() -> Self {
        Self {
            dtr: true,
            rts: true,
        }
    }
}

/// Modem status inputs, as reported by the most recent status read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModemStatus {
    /// Clear to send
    pub cts: bool,
    /// Data set ready
    pub dsr: bool,
    /// Ring indicator
    pub ri: bool,
    /// Data carrier detect
    pub dcd: bool,
}

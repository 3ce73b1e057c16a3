//! Port configuration
//!
//! Everything a [`Port`](super::Port) needs besides the transport and the
//! device identity. Missing fields fall back to their defaults, so a config
//! file only has to name what it changes:
//!
//! ```json
//! { "line": { "baud_rate": 9600, "data_bits": 8, "parity": "none", "stop_bits": "1" } }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    ControlLines, Endpoints, LineConfig, PortError, Result, DEFAULT_CONFIGURATION,
    DEFAULT_INTERFACE,
};

/// Port configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    /// Configuration value selected when the device has none active
    pub configuration: u8,
    /// Interface claimed on open
    pub interface: u8,
    /// Alternate setting selected on the claimed interface
    pub alternate_setting: u8,
    /// Line configuration applied during initialization
    pub line: LineConfig,
    /// Control line state applied during initialization
    pub control_lines: ControlLines,
    /// Endpoint override; chip defaults are used when absent
    pub endpoints: Option<Endpoints>,
    /// Run the CP210x vendor handshake during initialization
    pub vendor_init: bool,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            configuration: DEFAULT_CONFIGURATION,
            interface: DEFAULT_INTERFACE,
            alternate_setting: 0,
            line: LineConfig::default(),
            control_lines: ControlLines::default(),
            endpoints: None,
            vendor_init: false,
        }
    }
}

impl PortConfig {
    /// Parse a configuration from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| PortError::Config(e.to_string()))
    }

    /// Load a configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| PortError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&content)
    }

    /// Serialize the configuration as pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| PortError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DataBits, Parity, StopBits};

    #[test]
    fn test_empty_json_is_default() {
        assert_eq!(PortConfig::from_json("{}").unwrap(), PortConfig::default());
    }

    #[test]
    fn test_partial_json() {
        let config = PortConfig::from_json(
            r#"{
                "interface": 1,
                "line": { "baud_rate": 9600, "data_bits": 7, "parity": "odd", "stop_bits": "2" },
                "endpoints": { "bulk_in": 2, "bulk_out": 2, "status": 1 },
                "vendor_init": true
            }"#,
        )
        .unwrap();

        assert_eq!(config.configuration, DEFAULT_CONFIGURATION);
        assert_eq!(config.interface, 1);
        assert_eq!(
            config.line,
            LineConfig::new(9600, DataBits::Seven, Parity::Odd, StopBits::Two)
        );
        assert_eq!(config.endpoints.map(|e| e.bulk_in), Some(2));
        assert!(config.vendor_init);
        assert_eq!(config.control_lines, ControlLines::default());
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            PortConfig::from_json(r#"{"line": {"data_bits": 9}}"#),
            Err(PortError::Config(_))
        ));
    }
}

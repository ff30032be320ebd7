//! Configuration for the gen3kit driver.
//!
//! Configuration is organized into two layers:
//! - Serial line parameters (port, baud rate, framing)
//! - Driver behaviour (handshake timeouts, reset delay, backoff,
//!   firmware version floors)
//!
//! Files are loaded and saved as JSON or TOML, selected by extension.

use crate::error::{SettingsError, SettingsResult};
use gen3kit_core::Version;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Parity setting for the serial line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    /// No parity bit
    None,
    /// Even parity
    Even,
    /// Odd parity
    Odd,
}

impl Parity {
    /// Parse the single-character form used in legacy preference files.
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'N' => Some(Self::None),
            'E' => Some(Self::Even),
            'O' => Some(Self::Odd),
            _ => None,
        }
    }

    /// The single-character form.
    pub fn as_char(self) -> char {
        match self {
            Self::None => 'N',
            Self::Even => 'E',
            Self::Odd => 'O',
        }
    }
}

impl std::fmt::Display for Parity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Stop bit count for the serial line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopBits {
    /// One stop bit
    #[serde(rename = "1")]
    One,
    /// One and a half stop bits
    #[serde(rename = "1.5")]
    OnePointFive,
    /// Two stop bits
    #[serde(rename = "2")]
    Two,
}

impl StopBits {
    /// Parse the fractional form used in legacy preference files.
    pub fn from_value(value: f32) -> Option<Self> {
        if value == 1.0 {
            Some(Self::One)
        } else if value == 1.5 {
            Some(Self::OnePointFive)
        } else if value == 2.0 {
            Some(Self::Two)
        } else {
            None
        }
    }

    /// The fractional form.
    pub fn value(self) -> f32 {
        match self {
            Self::One => 1.0,
            Self::OnePointFive => 1.5,
            Self::Two => 2.0,
        }
    }
}

/// Serial line parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// OS-visible device name (e.g. "/dev/ttyUSB0", "COM3")
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits; the controller protocol requires 8
    pub data_bits: u8,
    /// Parity
    pub parity: Parity,
    /// Stop bits
    pub stop_bits: StopBits,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 38400,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: StopBits::One,
        }
    }
}

impl SerialSettings {
    /// Validate the line parameters.
    pub fn validate(&self) -> SettingsResult<()> {
        if self.data_bits != 8 {
            return Err(SettingsError::InvalidSetting {
                key: "data_bits".to_string(),
                reason: format!("controller requires 8 data bits, got {}", self.data_bits),
            });
        }
        if self.baud_rate == 0 {
            return Err(SettingsError::InvalidSetting {
                key: "baud_rate".to_string(),
                reason: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Full driver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverSettings {
    /// How long the handshake waits for a VERSION reply before pulsing
    /// the reset line, in milliseconds
    pub startup_timeout_ms: u64,
    /// How long the board takes to boot after a reset pulse, in
    /// milliseconds
    pub reset_delay_ms: u64,
    /// Interval between port-open attempts while the device is absent,
    /// in milliseconds
    pub open_retry_ms: u64,
    /// Delay before re-sending a frame the device refused with a full
    /// buffer, in milliseconds
    pub overflow_backoff_ms: u64,
    /// Protocol version the host advertises in the VERSION request
    pub host_protocol_version: u16,
    /// Oldest firmware the driver will talk to
    pub minimum_firmware_version: Version,
    /// Firmware the driver is developed against
    pub preferred_firmware_version: Version,
    /// Serial line parameters
    pub serial: SerialSettings,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            startup_timeout_ms: 8000,
            reset_delay_ms: 3000,
            open_retry_ms: 500,
            overflow_backoff_ms: 25,
            host_protocol_version: 100,
            minimum_firmware_version: Version::new(1, 1),
            preferred_firmware_version: Version::new(1, 1),
            serial: SerialSettings::default(),
        }
    }
}

impl DriverSettings {
    /// Load settings from a JSON or TOML file, selected by extension.
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let text = fs::read_to_string(path)?;
        let settings: Self = match extension(path) {
            "json" => serde_json::from_str(&text)?,
            "toml" => toml::from_str(&text)?,
            other => return Err(SettingsError::UnsupportedFormat(other.to_string())),
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Save settings to a JSON or TOML file, selected by extension.
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        let text = match extension(path) {
            "json" => serde_json::to_string_pretty(self)?,
            "toml" => toml::to_string_pretty(self)?,
            other => return Err(SettingsError::UnsupportedFormat(other.to_string())),
        };
        fs::write(path, text)?;
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> SettingsResult<()> {
        self.serial.validate()?;
        if self.minimum_firmware_version > self.preferred_firmware_version {
            return Err(SettingsError::InvalidSetting {
                key: "minimum_firmware_version".to_string(),
                reason: "exceeds preferred_firmware_version".to_string(),
            });
        }
        Ok(())
    }
}

fn extension(path: &Path) -> &str {
    path.extension().and_then(|e| e.to_str()).unwrap_or("")
}

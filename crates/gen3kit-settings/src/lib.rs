//! # gen3kit Settings
//!
//! Driver configuration: serial line parameters, handshake and backoff
//! timing, and firmware version floors. Settings persist as JSON or
//! TOML, selected by file extension.

pub mod config;
pub mod error;

pub use config::{DriverSettings, Parity, SerialSettings, StopBits};
pub use error::{SettingsError, SettingsResult};

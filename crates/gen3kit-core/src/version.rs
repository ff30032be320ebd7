//! Firmware version handling.
//!
//! The controller reports its version as a single little-endian u16
//! where the hundreds encode the major version and the remainder the
//! minor version (101 is v1.1). A report of zero means the bootloader
//! answered before the firmware was up and is treated as no version.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A firmware version as reported by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version {
    /// Major version number.
    pub major: u16,
    /// Minor version number.
    pub minor: u16,
}

impl Version {
    /// Create a version from its components.
    pub fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// Decode the wire encoding (`major * 100 + minor`).
    ///
    /// Returns `None` for a zero report, which the firmware sends when
    /// it has not finished starting up.
    pub fn from_report(report: u16) -> Option<Self> {
        if report == 0 {
            return None;
        }
        Some(Self {
            major: report / 100,
            minor: report % 100,
        })
    }

    /// The wire encoding of this version.
    pub fn to_report(self) -> u16 {
        self.major * 100 + self.minor
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

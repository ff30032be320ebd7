//! # gen3kit Core
//!
//! Shared types for the gen3kit driver stack: the error taxonomy,
//! firmware version handling, and the pure motion math used by the
//! command layer. This crate performs no I/O.

pub mod error;
pub mod motion;
pub mod version;

pub use error::{ConnectionError, Error, ProtocolError, Result};
pub use version::Version;

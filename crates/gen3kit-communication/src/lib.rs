//! # gen3kit Communication
//!
//! Packet transport and command layer for third-generation printer and
//! CNC electronics: a master motion board plus tool boards addressed
//! through it over one serial line.
//!
//! Layers, bottom up:
//! - [`serial`]: the OS serial device, a background reader feeding a
//!   shared receive buffer, and the DTR reset line
//! - [`packet`]: frame encode/decode with the Dallas/iButton CRC-8
//! - [`transport`]: one request/response exchange at a time, with
//!   backpressure handling
//! - [`session`]: startup handshake, firmware version check, init
//! - [`driver`]: typed master and tool commands

pub mod buffer;
pub mod commands;
pub mod driver;
pub mod packet;
pub mod serial;
pub mod session;
pub mod transport;

pub use buffer::RxBuffer;
pub use commands::{MasterCommand, ToolCommand};
pub use driver::{AxisSet, Gen3Driver, MotorFlags};
pub use packet::{
    crc8_ibutton, encode_frame, Frame, PacketDecoder, RequestBuilder, Response, ResponseCode,
    START_BYTE,
};
pub use serial::{list_ports, NativePort, PortInfo, RawPort, SerialLink};
pub use session::{Session, SessionState};
pub use transport::Transport;

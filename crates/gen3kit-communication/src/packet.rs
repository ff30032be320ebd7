//! Wire framing for the controller protocol.
//!
//! Frames are `0xD5 | LEN | PAYLOAD | CRC8` with the Dallas/iButton
//! CRC-8 computed over the payload alone. Multi-byte fields are
//! little-endian throughout. There is no byte stuffing; recovery after
//! corruption relies on scanning for the start byte and validating the
//! checksum.

use byteorder::{ByteOrder, LittleEndian};
use gen3kit_core::{ProtocolError, Result};
use std::fmt;
use std::mem;

/// First byte of every frame in either direction.
pub const START_BYTE: u8 = 0xD5;

/// Largest payload a frame can carry; the length field is one byte.
pub const MAX_PAYLOAD: usize = 255;

/// Dallas/iButton CRC-8: polynomial 0x8C (reflected), seed 0.
pub fn crc8_ibutton(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ 0x8C } else { crc >> 1 };
        }
    }
    crc
}

/// Frame a payload for transmission.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD {
        return Err(ProtocolError::PayloadTooLarge { len: payload.len() }.into());
    }
    let mut frame = Vec::with_capacity(payload.len() + 3);
    frame.push(START_BYTE);
    frame.push(payload.len() as u8);
    frame.extend_from_slice(payload);
    frame.push(crc8_ibutton(payload));
    Ok(frame)
}

/// Builds a request payload field by field.
///
/// Starts from the command code; integer fields are appended
/// little-endian. `encode` produces the framed bytes.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    payload: Vec<u8>,
}

impl RequestBuilder {
    /// Start a request with the given command code.
    pub fn new(command: u8) -> Self {
        Self {
            payload: vec![command],
        }
    }

    pub fn u8(mut self, value: u8) -> Self {
        self.payload.push(value);
        self
    }

    pub fn i8(self, value: i8) -> Self {
        self.u8(value as u8)
    }

    pub fn u16(mut self, value: u16) -> Self {
        let mut bytes = [0u8; 2];
        LittleEndian::write_u16(&mut bytes, value);
        self.payload.extend_from_slice(&bytes);
        self
    }

    pub fn i16(self, value: i16) -> Self {
        self.u16(value as u16)
    }

    pub fn u32(mut self, value: u32) -> Self {
        let mut bytes = [0u8; 4];
        LittleEndian::write_u32(&mut bytes, value);
        self.payload.extend_from_slice(&bytes);
        self
    }

    pub fn i32(self, value: i32) -> Self {
        self.u32(value as u32)
    }

    /// Append raw bytes (tool sub-payloads).
    pub fn bytes(mut self, data: &[u8]) -> Self {
        self.payload.extend_from_slice(data);
        self
    }

    /// The unframed payload built so far.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Frame the request for transmission.
    pub fn encode(self) -> Result<Vec<u8>> {
        encode_frame(&self.payload)
    }
}

/// Response codes the device can reply with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    /// Command failed for an unspecified reason
    GenericError,
    /// Command accepted
    Ok,
    /// The device's command buffer is full; re-send after a delay
    BufferOverflow,
    /// The device saw a bad checksum on our request
    CrcMismatch,
    /// The device's query window overflowed
    QueryOverflow,
    /// The firmware does not implement the command
    Unsupported,
    /// Any other value; treated as a protocol violation
    Unknown(u8),
}

impl ResponseCode {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0x80 => Self::GenericError,
            0x81 => Self::Ok,
            0x82 => Self::BufferOverflow,
            0x83 => Self::CrcMismatch,
            0x84 => Self::QueryOverflow,
            0x85 => Self::Unsupported,
            other => Self::Unknown(other),
        }
    }

    pub fn raw(self) -> u8 {
        match self {
            Self::GenericError => 0x80,
            Self::Ok => 0x81,
            Self::BufferOverflow => 0x82,
            Self::CrcMismatch => 0x83,
            Self::QueryOverflow => 0x84,
            Self::Unsupported => 0x85,
            Self::Unknown(raw) => raw,
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GenericError => write!(f, "GENERIC_ERROR"),
            Self::Ok => write!(f, "OK"),
            Self::BufferOverflow => write!(f, "BUFFER_OVERFLOW"),
            Self::CrcMismatch => write!(f, "CRC_MISMATCH"),
            Self::QueryOverflow => write!(f, "QUERY_OVERFLOW"),
            Self::Unsupported => write!(f, "UNSUPPORTED"),
            Self::Unknown(raw) => write!(f, "UNKNOWN({raw:#04x})"),
        }
    }
}

/// A decoded response frame with a read cursor over its data bytes.
#[derive(Debug, Clone)]
pub struct Response {
    code: ResponseCode,
    data: Vec<u8>,
    cursor: usize,
}

impl Response {
    fn from_payload(payload: Vec<u8>) -> Self {
        let code = payload
            .first()
            .map(|&raw| ResponseCode::from_raw(raw))
            .unwrap_or(ResponseCode::Unknown(0));
        let data = payload.get(1..).map(<[u8]>::to_vec).unwrap_or_default();
        Self {
            code,
            data,
            cursor: 0,
        }
    }

    pub fn code(&self) -> ResponseCode {
        self.code
    }

    pub fn is_ok(&self) -> bool {
        self.code == ResponseCode::Ok
    }

    /// Data bytes after the response code.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Fail unless the device acknowledged the command.
    pub fn expect_ok(self, command: &str) -> Result<Self> {
        match self.code {
            ResponseCode::Ok => Ok(self),
            ResponseCode::Unsupported => Err(ProtocolError::Unsupported {
                command: command.to_string(),
            }
            .into()),
            other => Err(ProtocolError::Device { code: other.raw() }.into()),
        }
    }

    fn take(&mut self, wanted: usize) -> Result<&[u8]> {
        let available = self.data.len() - self.cursor;
        if wanted > available {
            return Err(ProtocolError::ResponseTooShort { wanted, available }.into());
        }
        let slice = &self.data[self.cursor..self.cursor + wanted];
        self.cursor += wanted;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.take(1).map(|b| b[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        self.read_u8().map(|b| b as i8)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.take(2).map(LittleEndian::read_u16)
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        self.take(2).map(LittleEndian::read_i16)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.take(4).map(LittleEndian::read_u32)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.take(4).map(LittleEndian::read_i32)
    }
}

/// Outcome of framing one inbound packet.
#[derive(Debug)]
pub enum Frame {
    /// A frame with a valid checksum.
    Response(Response),
    /// A frame whose trailer did not match the payload.
    CrcMismatch { expected: u8, actual: u8 },
}

#[derive(Debug)]
enum DecodeState {
    AwaitStart,
    AwaitLength,
    InPayload { remaining: usize },
    AwaitCrc,
}

/// Byte-at-a-time frame parser.
///
/// Feed received bytes until a frame (good or bad) comes out; the
/// decoder then resets itself for the next one. Bytes before the start
/// marker are skipped silently.
#[derive(Debug)]
pub struct PacketDecoder {
    state: DecodeState,
    payload: Vec<u8>,
}

impl PacketDecoder {
    pub fn new() -> Self {
        Self {
            state: DecodeState::AwaitStart,
            payload: Vec::new(),
        }
    }

    /// Consume one byte. Returns the completed frame, if any.
    pub fn process_byte(&mut self, byte: u8) -> Option<Frame> {
        match self.state {
            DecodeState::AwaitStart => {
                if byte == START_BYTE {
                    self.state = DecodeState::AwaitLength;
                }
                None
            }
            DecodeState::AwaitLength => {
                self.payload.clear();
                self.state = if byte == 0 {
                    DecodeState::AwaitCrc
                } else {
                    DecodeState::InPayload {
                        remaining: byte as usize,
                    }
                };
                None
            }
            DecodeState::InPayload { remaining } => {
                self.payload.push(byte);
                self.state = if remaining == 1 {
                    DecodeState::AwaitCrc
                } else {
                    DecodeState::InPayload {
                        remaining: remaining - 1,
                    }
                };
                None
            }
            DecodeState::AwaitCrc => {
                let expected = crc8_ibutton(&self.payload);
                self.state = DecodeState::AwaitStart;
                let payload = mem::take(&mut self.payload);
                if byte == expected {
                    Some(Frame::Response(Response::from_payload(payload)))
                } else {
                    Some(Frame::CrcMismatch {
                        expected,
                        actual: byte,
                    })
                }
            }
        }
    }
}

impl Default for PacketDecoder {
    fn default() -> Self {
        Self::new()
    }
}

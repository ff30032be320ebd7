//! Request/response exchange over the serial link.
//!
//! The internal mutex is the port lock: it is held for a complete
//! request/response round trip, so two callers can never interleave
//! frames on the wire. The device applies backpressure by replying
//! BUFFER_OVERFLOW; the transport absorbs that by re-sending the same
//! frame after a fixed delay, indefinitely.

use crate::packet::{Frame, PacketDecoder, Response, ResponseCode};
use crate::serial::SerialLink;
use gen3kit_core::{ProtocolError, Result};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

/// Default delay before re-sending a frame the device refused with a
/// full buffer.
pub const DEFAULT_OVERFLOW_BACKOFF: Duration = Duration::from_millis(25);

/// Serializes command exchanges on the wire.
pub struct Transport {
    link: Mutex<SerialLink>,
    overflow_backoff: Duration,
}

impl Transport {
    pub fn new(link: SerialLink) -> Self {
        Self::with_backoff(link, DEFAULT_OVERFLOW_BACKOFF)
    }

    pub fn with_backoff(link: SerialLink, overflow_backoff: Duration) -> Self {
        Self {
            link: Mutex::new(link),
            overflow_backoff,
        }
    }

    fn lock_link(&self) -> MutexGuard<'_, SerialLink> {
        match self.link.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Send a framed request and decode the single reply.
    ///
    /// Holds the port lock for the whole exchange. BUFFER_OVERFLOW
    /// replies trigger a backoff and resend and are never seen by the
    /// caller; every other reply, including device-reported errors, is
    /// returned for the command layer to interpret. A frame that fails
    /// its checksum on our side fails immediately with `CrcMismatch`
    /// and is not retransmitted.
    pub fn run_command(&self, frame: &[u8]) -> Result<Response> {
        let mut link = self.lock_link();
        loop {
            link.write(frame)?;
            tracing::trace!(out = %hex(frame), "frame sent");

            let mut decoder = PacketDecoder::new();
            let decoded = loop {
                let Some(byte) = link.read_one() else {
                    return Err(ProtocolError::Timeout {
                        timeout_ms: link.timeout(),
                    }
                    .into());
                };
                if let Some(complete) = decoder.process_byte(byte) {
                    break complete;
                }
            };

            match decoded {
                Frame::CrcMismatch { expected, actual } => {
                    tracing::warn!(expected, actual, "reply failed checksum");
                    return Err(ProtocolError::CrcMismatch { expected, actual }.into());
                }
                Frame::Response(response) => {
                    if response.code() == ResponseCode::BufferOverflow {
                        tracing::debug!("device buffer full, re-sending after backoff");
                        thread::sleep(self.overflow_backoff);
                        continue;
                    }
                    tracing::trace!(code = %response.code(), "reply received");
                    return Ok(response);
                }
            }
        }
    }

    /// Install the read timeout used by subsequent exchanges, in
    /// milliseconds. Zero disables the timeout.
    pub fn set_read_timeout(&self, timeout_ms: u64) {
        self.lock_link().set_timeout(timeout_ms);
    }

    /// Pulse the reset line.
    pub fn pulse_reset(&self) -> Result<()> {
        self.lock_link().pulse_reset_low()
    }

    /// Take whatever bytes have accumulated outside an exchange (boot
    /// banner capture after a reset).
    pub fn drain_pending(&self) -> Vec<u8> {
        self.lock_link().drain()
    }

    /// Close the underlying link. Safe to call twice.
    pub fn close(&self) {
        self.lock_link().close();
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

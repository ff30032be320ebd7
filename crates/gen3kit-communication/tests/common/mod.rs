#![allow(dead_code)]
//! Scripted serial port double shared by the integration tests.
//!
//! The mock plays the device side of the protocol: each host write pops
//! the next scripted reply (or silence) into the receive stream, while
//! recording the written bytes and their timestamps so tests can assert
//! on write boundaries, retransmissions, and timing.

use gen3kit_communication::packet::encode_frame;
use gen3kit_communication::serial::{RawPort, SerialLink};
use gen3kit_communication::session::Session;
use gen3kit_settings::DriverSettings;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Default)]
struct Shared {
    /// Bytes waiting for the host to read.
    rx: VecDeque<u8>,
    /// Every write the host performed, with its timestamp.
    writes: Vec<(Instant, Vec<u8>)>,
    /// Scripted reaction to each write; `None` stays silent.
    replies: VecDeque<Option<Vec<u8>>>,
    /// Completed low-then-high transitions on the DTR line.
    dtr_pulses: usize,
    dtr_is_low: bool,
}

/// Fake device on the other end of the link.
#[derive(Clone, Default)]
pub struct MockPort {
    shared: Arc<Mutex<Shared>>,
}

impl MockPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the reaction to the next unscripted write.
    pub fn push_reply(&self, reply: Option<Vec<u8>>) {
        self.shared.lock().unwrap().replies.push_back(reply);
    }

    /// Every write so far, oldest first.
    pub fn writes(&self) -> Vec<(Instant, Vec<u8>)> {
        self.shared.lock().unwrap().writes.clone()
    }

    /// Drain the recorded writes (e.g. to drop handshake traffic).
    pub fn take_writes(&self) -> Vec<(Instant, Vec<u8>)> {
        std::mem::take(&mut self.shared.lock().unwrap().writes)
    }

    /// Completed reset pulses seen on the DTR line.
    pub fn dtr_pulses(&self) -> usize {
        self.shared.lock().unwrap().dtr_pulses
    }

    /// Feed bytes to the host without waiting for a write.
    pub fn inject(&self, bytes: &[u8]) {
        self.shared.lock().unwrap().rx.extend(bytes);
    }
}

impl RawPort for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut shared = self.shared.lock().unwrap();
        if shared.rx.is_empty() {
            drop(shared);
            thread::sleep(Duration::from_millis(1));
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(shared.rx.len());
        for slot in buf.iter_mut().take(n) {
            *slot = shared.rx.pop_front().expect("length checked above");
        }
        Ok(n)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let mut shared = self.shared.lock().unwrap();
        shared.writes.push((Instant::now(), data.to_vec()));
        if let Some(Some(reply)) = shared.replies.pop_front() {
            shared.rx.extend(reply);
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn set_dtr(&mut self, level: bool) -> io::Result<()> {
        let mut shared = self.shared.lock().unwrap();
        if !level {
            shared.dtr_is_low = true;
        } else if shared.dtr_is_low {
            shared.dtr_is_low = false;
            shared.dtr_pulses += 1;
        }
        Ok(())
    }

    fn try_clone_port(&self) -> io::Result<Box<dyn RawPort>> {
        Ok(Box::new(self.clone()))
    }
}

/// Frame a payload the way the device would.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    encode_frame(payload).expect("test payload fits in a frame")
}

/// A bare OK reply.
pub fn ok_frame() -> Vec<u8> {
    frame(&[0x81])
}

/// Settings with test-friendly timing.
pub fn test_settings() -> DriverSettings {
    let mut settings = DriverSettings::default();
    settings.startup_timeout_ms = 50;
    settings.reset_delay_ms = 10;
    settings.open_retry_ms = 10;
    settings
}

/// A session over a fresh link onto `port`, not yet started.
pub fn session_over(port: &MockPort, settings: DriverSettings) -> Session {
    let link = SerialLink::from_port(Box::new(port.clone())).expect("mock link starts");
    Session::with_link(link, settings, Arc::new(AtomicBool::new(false)))
}

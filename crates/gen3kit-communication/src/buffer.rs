//! Receive buffer shared between the background reader and the
//! command path.
//!
//! Bytes delivered by the serial reader land here; the transport drains
//! them one at a time. Two cursors bound the unread window; when the
//! window empties both rewind to zero so the buffer never creeps
//! forward. Appending when full doubles the backing storage.
//!
//! This buffer has its own mutex, independent of the port lock: the
//! reader thread only ever takes this one.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

const INITIAL_CAPACITY: usize = 32 * 1024;

#[derive(Debug)]
struct Window {
    data: Vec<u8>,
    first_unread: usize,
    one_past_last: usize,
}

/// Byte FIFO with blocking reads.
#[derive(Debug)]
pub struct RxBuffer {
    window: Mutex<Window>,
    data_ready: Condvar,
}

impl RxBuffer {
    pub fn new() -> Self {
        Self {
            window: Mutex::new(Window {
                data: vec![0; INITIAL_CAPACITY],
                first_unread: 0,
                one_past_last: 0,
            }),
            data_ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Window> {
        match self.window.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Append one byte, doubling the backing storage when full.
    pub fn push(&self, byte: u8) {
        let mut w = self.lock();
        if w.one_past_last == w.data.len() {
            let doubled = w.data.len() * 2;
            w.data.resize(doubled, 0);
        }
        let at = w.one_past_last;
        w.data[at] = byte;
        w.one_past_last += 1;
        drop(w);
        self.data_ready.notify_all();
    }

    /// Next unread byte, waiting up to `timeout_ms` for one to arrive.
    ///
    /// A timeout of zero waits indefinitely. Returns `None` only when a
    /// non-zero timeout elapses with the buffer still empty.
    pub fn read_one(&self, timeout_ms: u64) -> Option<u8> {
        let mut w = self.lock();
        if timeout_ms == 0 {
            while w.first_unread == w.one_past_last {
                w = match self.data_ready.wait(w) {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
            }
        } else {
            let deadline = Instant::now() + Duration::from_millis(timeout_ms);
            while w.first_unread == w.one_past_last {
                let remaining = deadline.checked_duration_since(Instant::now())?;
                w = match self.data_ready.wait_timeout(w, remaining) {
                    Ok((guard, _)) => guard,
                    Err(poisoned) => poisoned.into_inner().0,
                };
            }
        }
        let byte = w.data[w.first_unread];
        w.first_unread += 1;
        if w.first_unread == w.one_past_last {
            // rewind
            w.first_unread = 0;
            w.one_past_last = 0;
        }
        Some(byte)
    }

    /// Number of bytes waiting to be read.
    pub fn available(&self) -> usize {
        let w = self.lock();
        w.one_past_last - w.first_unread
    }

    /// Discard everything read so far and empty the buffer.
    pub fn clear(&self) {
        let mut w = self.lock();
        w.first_unread = 0;
        w.one_past_last = 0;
    }

    /// Take every pending byte at once. Used to capture boot banners
    /// after a reset pulse.
    pub fn drain(&self) -> Vec<u8> {
        let mut w = self.lock();
        let pending = w.data[w.first_unread..w.one_past_last].to_vec();
        w.first_unread = 0;
        w.one_past_last = 0;
        pending
    }
}

impl Default for RxBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let buf = RxBuffer::new();
        for b in [0x10u8, 0x20, 0x30] {
            buf.push(b);
        }
        assert_eq!(buf.available(), 3);
        assert_eq!(buf.read_one(10), Some(0x10));
        assert_eq!(buf.available(), 2);
        assert_eq!(buf.read_one(10), Some(0x20));
        assert_eq!(buf.read_one(10), Some(0x30));
        assert_eq!(buf.available(), 0);
    }

    #[test]
    fn test_empty_read_times_out() {
        let buf = RxBuffer::new();
        let start = Instant::now();
        assert_eq!(buf.read_one(20), None);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_blocking_read_wakes_on_push() {
        let buf = Arc::new(RxBuffer::new());
        let writer = {
            let buf = buf.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                buf.push(0x42);
            })
        };
        // timeout 0 means wait forever
        assert_eq!(buf.read_one(0), Some(0x42));
        writer.join().unwrap();
    }

    #[test]
    fn test_growth_preserves_order() {
        let buf = RxBuffer::new();
        let count = INITIAL_CAPACITY + 100;
        for i in 0..count {
            buf.push((i % 251) as u8);
        }
        assert_eq!(buf.available(), count);
        for i in 0..count {
            assert_eq!(buf.read_one(10), Some((i % 251) as u8));
        }
    }

    #[test]
    fn test_rewind_after_drain() {
        let buf = RxBuffer::new();
        buf.push(1);
        buf.push(2);
        assert_eq!(buf.read_one(10), Some(1));
        assert_eq!(buf.read_one(10), Some(2));
        // cursors rewound; the next push lands at the front again
        buf.push(3);
        assert_eq!(buf.available(), 1);
        assert_eq!(buf.read_one(10), Some(3));
    }

    #[test]
    fn test_clear_and_drain() {
        let buf = RxBuffer::new();
        for b in b"boot banner" {
            buf.push(*b);
        }
        assert_eq!(buf.drain(), b"boot banner".to_vec());
        assert_eq!(buf.available(), 0);

        buf.push(9);
        buf.clear();
        assert_eq!(buf.available(), 0);
        assert_eq!(buf.read_one(10), None);
    }
}

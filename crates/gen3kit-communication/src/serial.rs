//! Serial link to the controller board.
//!
//! Provides low-level serial port operations for direct hardware
//! connection to the controller via USB or RS-232.
//!
//! Supports:
//! - Port enumeration and discovery
//! - Baud rate, parity, and stop bit configuration
//! - A background reader feeding a shared receive buffer
//! - DTR modem-control pulsing for hardware reset

use crate::buffer::RxBuffer;
use gen3kit_core::{ConnectionError, Result};
use gen3kit_settings::{Parity, SerialSettings, StopBits};
use std::fmt;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// OS-level read timeout for the background reader's polling loop.
const READER_POLL: Duration = Duration::from_millis(10);

/// How long the reset line is held low during a pulse.
const RESET_HOLD: Duration = Duration::from_millis(100);

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    pub name: String,

    /// Port description (e.g., "USB Serial Port")
    pub description: String,

    /// Manufacturer name if available
    pub manufacturer: Option<String>,

    /// Serial number if available
    pub serial_number: Option<String>,

    /// USB vendor ID if applicable
    pub vid: Option<u16>,

    /// USB product ID if applicable
    pub pid: Option<u16>,
}

/// List available serial ports on the system
///
/// Filters ports to the device patterns controller boards show up as:
/// - Windows: COM* (e.g., COM1, COM3)
/// - Linux: /dev/ttyUSB*, /dev/ttyACM*
/// - macOS: /dev/cu.usbserial-*, /dev/cu.usbmodem*
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports().map_err(|e| {
        tracing::error!("Failed to enumerate serial ports: {}", e);
        ConnectionError::EnumerationFailed {
            reason: e.to_string(),
        }
    })?;

    Ok(ports
        .iter()
        .filter(|port| is_candidate_port(&port.port_name))
        .map(|port| {
            let mut info = PortInfo {
                name: port.port_name.clone(),
                description: describe_port(port),
                manufacturer: None,
                serial_number: None,
                vid: None,
                pid: None,
            };
            if let serialport::SerialPortType::UsbPort(usb) = &port.port_type {
                info.vid = Some(usb.vid);
                info.pid = Some(usb.pid);
                info.manufacturer = usb.manufacturer.clone();
                info.serial_number = usb.serial_number.clone();
            }
            info
        })
        .collect())
}

/// Check if a port name matches controller device patterns
fn is_candidate_port(name: &str) -> bool {
    if name.starts_with("COM") && name[3..].chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    if name.starts_with("/dev/ttyUSB") || name.starts_with("/dev/ttyACM") {
        return true;
    }
    if name.starts_with("/dev/cu.usbserial-") || name.starts_with("/dev/cu.usbmodem") {
        return true;
    }
    false
}

/// Get a user-friendly description for a port
fn describe_port(port: &serialport::SerialPortInfo) -> String {
    match &port.port_type {
        serialport::SerialPortType::UsbPort(usb) => format!(
            "USB {} {}",
            usb.manufacturer.as_deref().unwrap_or("Device"),
            usb.product.as_deref().unwrap_or("Serial Port")
        ),
        serialport::SerialPortType::BluetoothPort => "Bluetooth Serial".to_string(),
        serialport::SerialPortType::PciPort => "PCI Serial".to_string(),
        _ => "Serial Port".to_string(),
    }
}

/// Low-level byte device under the link.
///
/// Abstracts the OS serial handle so the link and everything above it
/// can run against a scripted port in tests.
pub trait RawPort: Send {
    /// Read into `buf`, returning how many bytes arrived. May fail with
    /// `TimedOut`/`WouldBlock` when nothing is pending.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write all bytes.
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flush buffered output to the device.
    fn flush(&mut self) -> io::Result<()>;

    /// Drive the DTR modem-control line.
    fn set_dtr(&mut self, level: bool) -> io::Result<()>;

    /// Second handle onto the same device, for the reader thread.
    fn try_clone_port(&self) -> io::Result<Box<dyn RawPort>>;
}

/// Real serial port backed by the `serialport` crate.
pub struct NativePort {
    port: Box<dyn serialport::SerialPort>,
}

impl fmt::Debug for NativePort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativePort").finish_non_exhaustive()
    }
}

impl NativePort {
    /// Open and configure the port named in `settings`.
    ///
    /// The name must match an enumerated port exactly; a missing device
    /// fails with `PortNotFound` rather than whatever the OS would say.
    pub fn open(settings: &SerialSettings) -> Result<Self> {
        if settings.data_bits != 8 {
            return Err(ConnectionError::UnsupportedDataBits {
                bits: settings.data_bits,
            }
            .into());
        }

        let known = serialport::available_ports().map_err(|e| {
            ConnectionError::EnumerationFailed {
                reason: e.to_string(),
            }
        })?;
        if !known.iter().any(|p| p.port_name == settings.port) {
            return Err(ConnectionError::PortNotFound {
                port: settings.port.clone(),
            }
            .into());
        }

        let stop_bits = match settings.stop_bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
            StopBits::OnePointFive => {
                return Err(ConnectionError::FailedToOpen {
                    port: settings.port.clone(),
                    reason: "1.5 stop bits are not supported on this platform".to_string(),
                }
                .into())
            }
        };

        let builder = serialport::new(&settings.port, settings.baud_rate)
            .timeout(READER_POLL)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(stop_bits)
            .parity(match settings.parity {
                Parity::None => serialport::Parity::None,
                Parity::Even => serialport::Parity::Even,
                Parity::Odd => serialport::Parity::Odd,
            })
            .flow_control(serialport::FlowControl::None);

        match builder.open() {
            Ok(port) => Ok(Self { port }),
            Err(e) => {
                tracing::warn!("Failed to open serial port {}: {}", settings.port, e);
                Err(classify_open_error(&settings.port, &e).into())
            }
        }
    }
}

fn classify_open_error(port: &str, error: &serialport::Error) -> ConnectionError {
    let reason = error.to_string();
    match error.kind() {
        serialport::ErrorKind::NoDevice => ConnectionError::PortNotFound {
            port: port.to_string(),
        },
        _ if reason.contains("busy") || reason.contains("in use") => ConnectionError::PortInUse {
            port: port.to_string(),
        },
        _ => ConnectionError::FailedToOpen {
            port: port.to_string(),
            reason,
        },
    }
}

impl RawPort for NativePort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        io::Write::write_all(&mut self.port, data)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::Write::flush(&mut self.port)
    }

    fn set_dtr(&mut self, level: bool) -> io::Result<()> {
        self.port
            .write_data_terminal_ready(level)
            .map_err(io::Error::other)
    }

    fn try_clone_port(&self) -> io::Result<Box<dyn RawPort>> {
        let clone = self.port.try_clone().map_err(io::Error::other)?;
        Ok(Box::new(NativePort { port: clone }))
    }
}

/// Serial link: byte I/O plus the buffered receive path.
///
/// A background reader drains the device into an [`RxBuffer`]; command
/// code pulls single bytes back out with a configurable timeout. The
/// reader only ever takes the buffer's own lock, never the port lock
/// held by the transport.
pub struct SerialLink {
    port: Option<Box<dyn RawPort>>,
    rx: Arc<RxBuffer>,
    reader: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    timeout_ms: u64,
}

impl SerialLink {
    /// Open the configured port and start the reader.
    pub fn open(settings: &SerialSettings) -> Result<Self> {
        let port = NativePort::open(settings)?;
        tracing::info!(
            port = %settings.port,
            baud = settings.baud_rate,
            "serial port open"
        );
        Self::from_port(Box::new(port))
    }

    /// Build a link over an already-open port and start the reader.
    pub fn from_port(port: Box<dyn RawPort>) -> Result<Self> {
        let rx = Arc::new(RxBuffer::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let reader_port = port.try_clone_port().map_err(|e| ConnectionError::Io {
            reason: format!("cloning port for reader: {e}"),
        })?;
        let reader = thread::Builder::new()
            .name("gen3kit-serial-reader".to_string())
            .spawn({
                let rx = rx.clone();
                let shutdown = shutdown.clone();
                move || reader_loop(reader_port, rx, shutdown)
            })
            .map_err(|e| ConnectionError::Io {
                reason: format!("spawning reader thread: {e}"),
            })?;

        Ok(Self {
            port: Some(port),
            rx,
            reader: Some(reader),
            shutdown,
            timeout_ms: 0,
        })
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn RawPort>> {
        self.port.as_mut().ok_or_else(|| {
            ConnectionError::Io {
                reason: "port is closed".to_string(),
            }
            .into()
        })
    }

    /// Write all bytes and flush them to the device.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let port = self.port_mut()?;
        port.write_all(bytes)
            .and_then(|()| port.flush())
            .map_err(|e| {
                tracing::error!("serial write failed: {}", e);
                ConnectionError::Io {
                    reason: e.to_string(),
                }
                .into()
            })
    }

    /// Next received byte, honouring the configured read timeout.
    ///
    /// A timeout of zero blocks until a byte arrives.
    pub fn read_one(&self) -> Option<u8> {
        self.rx.read_one(self.timeout_ms)
    }

    /// Bytes received but not yet read.
    pub fn available(&self) -> usize {
        self.rx.available()
    }

    /// Discard all buffered received bytes.
    pub fn clear(&self) {
        self.rx.clear()
    }

    /// Take all buffered received bytes at once.
    pub fn drain(&self) -> Vec<u8> {
        self.rx.drain()
    }

    /// Install the read timeout for subsequent [`read_one`] calls, in
    /// milliseconds. Zero disables the timeout.
    ///
    /// [`read_one`]: SerialLink::read_one
    pub fn set_timeout(&mut self, timeout_ms: u64) {
        self.timeout_ms = timeout_ms;
    }

    /// The currently configured read timeout.
    pub fn timeout(&self) -> u64 {
        self.timeout_ms
    }

    /// Pulse the DTR line low then high to hardware-reset the device.
    pub fn pulse_reset_low(&mut self) -> Result<()> {
        let port = self.port_mut()?;
        port.set_dtr(false).map_err(io_reason)?;
        thread::sleep(RESET_HOLD);
        port.set_dtr(true).map_err(io_reason)?;
        tracing::debug!("pulsed DTR low to reset the device");
        Ok(())
    }

    /// Stop the reader and release the device. Safe to call twice.
    pub fn close(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        // input side first: join the reader, then drop the output handle
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        self.port = None;
    }
}

fn io_reason(e: io::Error) -> gen3kit_core::Error {
    ConnectionError::Io {
        reason: e.to_string(),
    }
    .into()
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.close();
    }
}

fn reader_loop(mut port: Box<dyn RawPort>, rx: Arc<RxBuffer>, shutdown: Arc<AtomicBool>) {
    let mut buf = [0u8; 256];
    while !shutdown.load(Ordering::Relaxed) {
        match port.read(&mut buf) {
            Ok(0) => thread::sleep(READER_POLL),
            Ok(n) => {
                for &byte in &buf[..n] {
                    rx.push(byte);
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) => {}
            Err(e) => {
                tracing::error!("serial reader stopped: {}", e);
                break;
            }
        }
    }
}

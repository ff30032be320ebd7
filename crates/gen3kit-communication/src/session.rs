//! Startup handshake and connection lifecycle.
//!
//! A session owns the transport and walks the board from power-on to
//! accepting commands: open the port (retrying while the device is
//! absent), poll VERSION until the firmware answers (pulsing the reset
//! line when it stays silent), check the reported version against the
//! configured floor, then send INIT.

use crate::commands::MasterCommand;
use crate::packet::RequestBuilder;
use crate::serial::SerialLink;
use crate::transport::Transport;
use gen3kit_core::{Error, Result, Version};
use gen3kit_settings::DriverSettings;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No link to the device
    Disconnected,
    /// Handshake in progress
    WaitingForStartup,
    /// Handshake complete; commands are accepted
    Ready,
    /// Handshake failed (e.g. firmware too old)
    Failed,
    /// The link has been torn down
    Disposed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::WaitingForStartup => write!(f, "waiting for startup"),
            Self::Ready => write!(f, "ready"),
            Self::Failed => write!(f, "failed"),
            Self::Disposed => write!(f, "disposed"),
        }
    }
}

/// Brings the link up and tracks its lifecycle.
pub struct Session {
    transport: Arc<Transport>,
    settings: DriverSettings,
    state: SessionState,
    firmware_version: Option<Version>,
    cancel: Arc<AtomicBool>,
}

impl Session {
    /// Open the configured port, retrying until it appears or the
    /// cancel flag is raised.
    pub fn connect(settings: DriverSettings) -> Result<Self> {
        Self::connect_with_cancel(settings, Arc::new(AtomicBool::new(false)))
    }

    /// Like [`connect`], with an externally owned cancellation flag.
    ///
    /// [`connect`]: Session::connect
    pub fn connect_with_cancel(
        settings: DriverSettings,
        cancel: Arc<AtomicBool>,
    ) -> Result<Self> {
        let link = loop {
            if cancel.load(Ordering::Relaxed) {
                return Err(Error::Interrupted);
            }
            match SerialLink::open(&settings.serial) {
                Ok(link) => break link,
                Err(e) => {
                    tracing::warn!(port = %settings.serial.port, "unable to open port: {}", e);
                    thread::sleep(Duration::from_millis(settings.open_retry_ms));
                }
            }
        };
        Ok(Self::with_link(link, settings, cancel))
    }

    /// Wrap an already-open link. Used by tests and custom transports.
    pub fn with_link(link: SerialLink, settings: DriverSettings, cancel: Arc<AtomicBool>) -> Self {
        let transport = Arc::new(Transport::with_backoff(
            link,
            Duration::from_millis(settings.overflow_backoff_ms),
        ));
        Self {
            transport,
            settings,
            state: SessionState::Disconnected,
            firmware_version: None,
            cancel,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The firmware version reported during the handshake.
    pub fn firmware_version(&self) -> Option<Version> {
        self.firmware_version
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    pub fn transport(&self) -> Arc<Transport> {
        self.transport.clone()
    }

    /// The flag another thread can raise to abort the handshake.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Run the startup handshake and leave the session `Ready`.
    pub fn start(&mut self) -> Result<()> {
        self.wait_for_startup(self.settings.startup_timeout_ms)?;

        let version = self
            .firmware_version
            .ok_or_else(|| Error::other("handshake finished without a firmware version"))?;
        if version < self.settings.minimum_firmware_version {
            self.state = SessionState::Failed;
            return Err(Error::BadFirmwareVersion {
                reported: version,
                minimum: self.settings.minimum_firmware_version,
            });
        }
        if version < self.settings.preferred_firmware_version {
            tracing::warn!(
                %version,
                preferred = %self.settings.preferred_firmware_version,
                "firmware is older than the preferred version"
            );
        }

        self.send_init()?;
        self.state = SessionState::Ready;
        tracing::info!(%version, "controller ready");
        Ok(())
    }

    /// Poll VERSION until the board answers, hard-resetting it whenever
    /// it stays silent past `timeout_ms`.
    ///
    /// The read timeout is cleared to zero on every exit path so a
    /// later long-running build cannot trip it.
    pub fn wait_for_startup(&mut self, timeout_ms: u64) -> Result<()> {
        self.state = SessionState::WaitingForStartup;
        self.transport.set_read_timeout(timeout_ms);
        let outcome = self.startup_loop();
        self.transport.set_read_timeout(0);
        outcome
    }

    fn startup_loop(&mut self) -> Result<()> {
        loop {
            if self.cancel.load(Ordering::Relaxed) {
                return Err(Error::Interrupted);
            }
            match self.query_version() {
                Ok(Some(version)) => {
                    tracing::info!(%version, "firmware version reported");
                    self.firmware_version = Some(version);
                    return Ok(());
                }
                Ok(None) => {
                    tracing::warn!("device reported version 0, retrying");
                }
                Err(e) if e.is_timeout() => {
                    tracing::info!("no reply from device, pulsing the reset line");
                    self.transport.pulse_reset()?;
                    thread::sleep(Duration::from_millis(self.settings.reset_delay_ms));
                    let banner = self.transport.drain_pending();
                    if !banner.is_empty() {
                        tracing::debug!(
                            banner = %String::from_utf8_lossy(&banner),
                            "boot output"
                        );
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Ask the board for its firmware version. `None` means the board
    /// answered with a zero version (still booting).
    pub(crate) fn query_version(&self) -> Result<Option<Version>> {
        let frame = RequestBuilder::new(MasterCommand::Version.code())
            .u16(self.settings.host_protocol_version)
            .encode()?;
        let mut response = self.transport.run_command(&frame)?.expect_ok("VERSION")?;
        let report = response.read_u16()?;
        Ok(Version::from_report(report))
    }

    fn send_init(&self) -> Result<()> {
        let frame = RequestBuilder::new(MasterCommand::Init.code()).encode()?;
        self.transport.run_command(&frame)?.expect_ok("INIT")?;
        Ok(())
    }

    /// Tear the link down. Safe to call repeatedly.
    pub fn dispose(&mut self) {
        self.transport.close();
        self.state = SessionState::Disposed;
    }
}

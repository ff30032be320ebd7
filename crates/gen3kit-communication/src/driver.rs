//! Typed command surface over the transport.
//!
//! Every operation the master and tool boards understand gets a method
//! here: build the request payload, run the exchange, parse the reply.
//! Commands are only accepted once the session is `Ready`.

use crate::commands::{MasterCommand, ToolCommand};
use crate::packet::{RequestBuilder, Response, ResponseCode};
use crate::session::{Session, SessionState};
use crate::transport::Transport;
use gen3kit_core::{Error, Result, Version};
use gen3kit_settings::DriverSettings;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Selection of motion axes as the wire bitmap (bit0=X, bit1=Y,
/// bit2=Z).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AxisSet(u8);

impl AxisSet {
    pub const X: AxisSet = AxisSet(0b001);
    pub const Y: AxisSet = AxisSet(0b010);
    pub const Z: AxisSet = AxisSet(0b100);
    pub const ALL: AxisSet = AxisSet(0b111);

    pub fn empty() -> Self {
        Self(0)
    }

    /// Combine two selections.
    pub fn with(self, other: AxisSet) -> Self {
        Self(self.0 | other.0)
    }

    pub fn contains(self, other: AxisSet) -> bool {
        self.0 & other.0 == other.0
    }

    /// The wire bitmap.
    pub fn bits(self) -> u8 {
        self.0
    }
}

/// Set in the ENABLE_AXES payload to enable rather than disable.
const AXES_ENABLE_BIT: u8 = 0x80;

/// Motor enable/direction flags (bit0 = enabled, bit1 = clockwise).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorFlags {
    pub enabled: bool,
    pub clockwise: bool,
}

impl MotorFlags {
    /// The wire byte.
    pub fn bits(self) -> u8 {
        u8::from(self.enabled) | (u8::from(self.clockwise) << 1)
    }
}

/// Default seconds a homing move may take before the board gives up.
pub const DEFAULT_HOME_TIMEOUT_SECS: u16 = 300;

/// Master-to-tool ping interval while waiting on a tool, milliseconds.
pub const DEFAULT_TOOL_PING_MS: u16 = 100;

/// Default seconds to wait for a tool to come up to target.
pub const DEFAULT_TOOL_TIMEOUT_SECS: u16 = 120;

/// High-level driver: owns the session and issues typed commands.
pub struct Gen3Driver {
    session: Session,
    transport: Arc<Transport>,
    finished_unsupported_logged: AtomicBool,
}

impl Gen3Driver {
    /// Connect, run the handshake, and return a ready driver.
    pub fn connect(settings: DriverSettings) -> Result<Self> {
        let mut session = Session::connect(settings)?;
        session.start()?;
        Ok(Self::from_session(session))
    }

    /// Wrap a session (usually one that already completed its
    /// handshake).
    pub fn from_session(session: Session) -> Self {
        let transport = session.transport();
        Self {
            session,
            transport,
            finished_unsupported_logged: AtomicBool::new(false),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The firmware version captured during the handshake.
    pub fn firmware_version(&self) -> Option<Version> {
        self.session.firmware_version()
    }

    /// Tear the connection down.
    pub fn dispose(&mut self) {
        self.session.dispose();
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.session.state() {
            SessionState::Ready => Ok(()),
            state => Err(Error::NotReady {
                state: state.to_string(),
            }),
        }
    }

    fn run(&self, request: RequestBuilder, command: &str) -> Result<Response> {
        self.ensure_ready()?;
        let frame = request.encode()?;
        self.transport.run_command(&frame)?.expect_ok(command)
    }

    // ----- master commands -----

    /// Re-query the firmware version. `None` means the board reported
    /// version zero.
    pub fn version(&self) -> Result<Option<Version>> {
        self.ensure_ready()?;
        self.session.query_version()
    }

    /// Re-send the initialization command.
    pub fn init(&self) -> Result<()> {
        self.run(RequestBuilder::new(MasterCommand::Init.code()), "INIT")
            .map(drop)
    }

    /// Size of the master's command buffer, in bytes.
    pub fn buffer_size(&self) -> Result<u32> {
        let mut response = self.run(
            RequestBuilder::new(MasterCommand::GetBufferSize.code()),
            "GET_BUFFER_SIZE",
        )?;
        response.read_u32()
    }

    /// Drop everything queued in the master's command buffer.
    pub fn clear_buffer(&self) -> Result<()> {
        self.run(
            RequestBuilder::new(MasterCommand::ClearBuffer.code()),
            "CLEAR_BUFFER",
        )
        .map(drop)
    }

    /// Current stepper position, in steps.
    pub fn position(&self) -> Result<(i32, i32, i32)> {
        let mut response = self.run(
            RequestBuilder::new(MasterCommand::GetPosition.code()),
            "GET_POSITION",
        )?;
        Ok((
            response.read_i32()?,
            response.read_i32()?,
            response.read_i32()?,
        ))
    }

    /// Configured axis range, in steps.
    pub fn range(&self) -> Result<(i32, i32, i32)> {
        let mut response = self.run(
            RequestBuilder::new(MasterCommand::GetRange.code()),
            "GET_RANGE",
        )?;
        Ok((
            response.read_i32()?,
            response.read_i32()?,
            response.read_i32()?,
        ))
    }

    /// Set the axis range, in steps.
    pub fn set_range(&self, x_steps: i32, y_steps: i32, z_steps: i32) -> Result<()> {
        self.run(
            RequestBuilder::new(MasterCommand::SetRange.code())
                .i32(x_steps)
                .i32(y_steps)
                .i32(z_steps),
            "SET_RANGE",
        )
        .map(drop)
    }

    /// Abort the current build and stop all motion.
    pub fn abort(&self) -> Result<()> {
        tracing::debug!("aborting build");
        self.run(RequestBuilder::new(MasterCommand::Abort.code()), "ABORT")
            .map(drop)
    }

    /// Toggle the device's pause state.
    ///
    /// The board keeps no absolute pause flag; PAUSE flips whatever
    /// state it is in, so callers must track parity themselves.
    pub fn pause(&self) -> Result<()> {
        tracing::debug!("sending pause toggle");
        self.run(RequestBuilder::new(MasterCommand::Pause.code()), "PAUSE")
            .map(drop)
    }

    /// Toggle the device's pause state back. Same wire command as
    /// [`pause`]; see the parity caveat there.
    ///
    /// [`pause`]: Gen3Driver::pause
    pub fn unpause(&self) -> Result<()> {
        tracing::debug!("sending unpause toggle");
        self.run(RequestBuilder::new(MasterCommand::Pause.code()), "PAUSE")
            .map(drop)
    }

    /// Trigger the probe cycle.
    pub fn probe(&self) -> Result<()> {
        self.run(RequestBuilder::new(MasterCommand::Probe.code()), "PROBE")
            .map(drop)
    }

    /// Whether the master has drained its command queue.
    ///
    /// Firmware that predates this query replies UNSUPPORTED; that is
    /// treated as finished, with a warning logged once per driver.
    pub fn is_finished(&self) -> Result<bool> {
        self.ensure_ready()?;
        let frame = RequestBuilder::new(MasterCommand::IsFinished.code()).encode()?;
        let response = self.transport.run_command(&frame)?;
        if response.code() == ResponseCode::Unsupported {
            if !self.finished_unsupported_logged.swap(true, Ordering::Relaxed) {
                tracing::warn!("firmware does not implement IS_FINISHED; assuming finished");
            }
            return Ok(true);
        }
        let mut response = response.expect_ok("IS_FINISHED")?;
        Ok(response.read_u8()? != 0)
    }

    /// Queue an absolute move, in steps, with the inter-step delay for
    /// the dominant axis in microseconds.
    pub fn queue_absolute_point(
        &self,
        x_steps: i32,
        y_steps: i32,
        z_steps: i32,
        dda_micros: u32,
    ) -> Result<()> {
        tracing::debug!(x_steps, y_steps, z_steps, dda_micros, "queueing absolute point");
        self.run(
            RequestBuilder::new(MasterCommand::QueuePointAbs.code())
                .i32(x_steps)
                .i32(y_steps)
                .i32(z_steps)
                .u32(dda_micros),
            "QUEUE_POINT_ABS",
        )
        .map(drop)
    }

    /// Overwrite the master's notion of the current position, in steps.
    pub fn set_position(&self, x_steps: i32, y_steps: i32, z_steps: i32) -> Result<()> {
        tracing::debug!(x_steps, y_steps, z_steps, "setting current position");
        self.run(
            RequestBuilder::new(MasterCommand::SetPosition.code())
                .i32(x_steps)
                .i32(y_steps)
                .i32(z_steps),
            "SET_POSITION",
        )
        .map(drop)
    }

    /// Seek the minimum endstop on the selected axes.
    pub fn find_axes_minimum(
        &self,
        axes: AxisSet,
        step_delay_micros: u32,
        timeout_secs: u16,
    ) -> Result<()> {
        self.run(
            RequestBuilder::new(MasterCommand::FindAxesMinimum.code())
                .u8(axes.bits())
                .u32(step_delay_micros)
                .u16(timeout_secs),
            "FIND_AXES_MINIMUM",
        )
        .map(drop)
    }

    /// Seek the maximum endstop on the selected axes.
    pub fn find_axes_maximum(
        &self,
        axes: AxisSet,
        step_delay_micros: u32,
        timeout_secs: u16,
    ) -> Result<()> {
        self.run(
            RequestBuilder::new(MasterCommand::FindAxesMaximum.code())
                .u8(axes.bits())
                .u32(step_delay_micros)
                .u16(timeout_secs),
            "FIND_AXES_MAXIMUM",
        )
        .map(drop)
    }

    /// Home the selected axes toward their minimum endstops with the
    /// default timeout.
    pub fn home_axes(&self, axes: AxisSet, step_delay_micros: u32) -> Result<()> {
        tracing::debug!(axes = axes.bits(), step_delay_micros, "homing axes");
        self.find_axes_minimum(axes, step_delay_micros, DEFAULT_HOME_TIMEOUT_SECS)
    }

    /// Pause the command queue on the board for `millis` milliseconds.
    pub fn delay(&self, millis: u32) -> Result<()> {
        self.run(
            RequestBuilder::new(MasterCommand::Delay.code()).u32(millis),
            "DELAY",
        )
        .map(drop)
    }

    /// Make `tool` the active tool on the master.
    pub fn change_tool(&self, tool: u8) -> Result<()> {
        tracing::debug!(tool, "changing tool");
        self.run(
            RequestBuilder::new(MasterCommand::ChangeTool.code()).u8(tool),
            "CHANGE_TOOL",
        )
        .map(drop)
    }

    /// Block the master until `tool` reports ready, pinging it every
    /// `ping_ms` and giving up after `timeout_secs`.
    pub fn wait_for_tool(&self, tool: u8, ping_ms: u16, timeout_secs: u16) -> Result<()> {
        self.run(
            RequestBuilder::new(MasterCommand::WaitForTool.code())
                .u8(tool)
                .u16(ping_ms)
                .u16(timeout_secs),
            "WAIT_FOR_TOOL",
        )
        .map(drop)
    }

    /// Select a tool and wait for it to come up, with default ping and
    /// timeout.
    pub fn request_tool_change(&self, tool: u8) -> Result<()> {
        self.change_tool(tool)?;
        tracing::debug!(tool, "waiting for tool");
        self.wait_for_tool(tool, DEFAULT_TOOL_PING_MS, DEFAULT_TOOL_TIMEOUT_SECS)
    }

    /// Energize the selected axes' steppers.
    pub fn enable_axes(&self, axes: AxisSet) -> Result<()> {
        self.run(
            RequestBuilder::new(MasterCommand::EnableAxes.code())
                .u8(AXES_ENABLE_BIT | axes.bits()),
            "ENABLE_AXES",
        )
        .map(drop)
    }

    /// Release the selected axes' steppers.
    pub fn disable_axes(&self, axes: AxisSet) -> Result<()> {
        self.run(
            RequestBuilder::new(MasterCommand::EnableAxes.code()).u8(axes.bits()),
            "ENABLE_AXES",
        )
        .map(drop)
    }

    // ----- tool-routed commands -----

    /// Route a raw command to a tool board. The sub-payload is length
    /// prefixed on the wire.
    pub fn tool_command(&self, tool: u8, command: ToolCommand, args: &[u8]) -> Result<()> {
        self.run(
            RequestBuilder::new(MasterCommand::ToolCommand.code())
                .u8(tool)
                .u8(command.code())
                .u8(args.len() as u8)
                .bytes(args),
            "TOOL_COMMAND",
        )
        .map(drop)
    }

    /// Query a tool board and return its reply for parsing.
    pub fn tool_query(&self, tool: u8, command: ToolCommand, args: &[u8]) -> Result<Response> {
        self.run(
            RequestBuilder::new(MasterCommand::ToolQuery.code())
                .u8(tool)
                .u8(command.code())
                .bytes(args),
            "TOOL_QUERY",
        )
    }

    /// Firmware version of a tool board. `None` means it reported
    /// version zero.
    pub fn tool_version(&self, tool: u8) -> Result<Option<Version>> {
        let mut response = self.tool_query(tool, ToolCommand::Version, &[])?;
        Ok(Version::from_report(response.read_u16()?))
    }

    /// Initialize a tool board.
    pub fn tool_init(&self, tool: u8) -> Result<()> {
        self.tool_command(tool, ToolCommand::Init, &[])
    }

    /// Current temperature of a tool, in degrees Celsius.
    pub fn read_temperature(&self, tool: u8) -> Result<u16> {
        let mut response = self.tool_query(tool, ToolCommand::GetTemp, &[])?;
        response.read_u16()
    }

    /// Set a tool's target temperature. The value is rounded and
    /// clamped to the u16 wire field.
    pub fn set_temperature(&self, tool: u8, celsius: f64) -> Result<()> {
        let target = celsius.round().clamp(0.0, f64::from(u16::MAX)) as u16;
        tracing::debug!(tool, target, "setting tool temperature");
        self.tool_command(tool, ToolCommand::SetTemp, &target.to_le_bytes())
    }

    /// Set motor 1 speed as microseconds per revolution.
    pub fn set_motor1_rpm(&self, tool: u8, micros_per_rev: u32) -> Result<()> {
        self.tool_command(tool, ToolCommand::SetMotor1Rpm, &micros_per_rev.to_le_bytes())
    }

    /// Set motor 2 speed as microseconds per revolution.
    pub fn set_motor2_rpm(&self, tool: u8, micros_per_rev: u32) -> Result<()> {
        self.tool_command(tool, ToolCommand::SetMotor2Rpm, &micros_per_rev.to_le_bytes())
    }

    /// Set motor 1 speed as a raw PWM duty value.
    pub fn set_motor1_pwm(&self, tool: u8, pwm: u8) -> Result<()> {
        self.tool_command(tool, ToolCommand::SetMotor1Pwm, &[pwm])
    }

    /// Set motor 2 speed as a raw PWM duty value.
    pub fn set_motor2_pwm(&self, tool: u8, pwm: u8) -> Result<()> {
        self.tool_command(tool, ToolCommand::SetMotor2Pwm, &[pwm])
    }

    /// Set motor 1 direction.
    pub fn set_motor1_direction(&self, tool: u8, clockwise: bool) -> Result<()> {
        self.tool_command(tool, ToolCommand::SetMotor1Dir, &[u8::from(clockwise)])
    }

    /// Set motor 2 direction.
    pub fn set_motor2_direction(&self, tool: u8, clockwise: bool) -> Result<()> {
        self.tool_command(tool, ToolCommand::SetMotor2Dir, &[u8::from(clockwise)])
    }

    /// Switch motor 1 (the extruder drive) on or off.
    pub fn toggle_motor1(&self, tool: u8, flags: MotorFlags) -> Result<()> {
        tracing::debug!(tool, flags = flags.bits(), "toggling motor 1");
        self.tool_command(tool, ToolCommand::ToggleMotor1, &[flags.bits()])
    }

    /// Switch motor 2 (the spindle channel) on or off.
    pub fn toggle_motor2(&self, tool: u8, flags: MotorFlags) -> Result<()> {
        tracing::debug!(tool, flags = flags.bits(), "toggling motor 2");
        self.tool_command(tool, ToolCommand::ToggleMotor2, &[flags.bits()])
    }

    /// Spin up the spindle. The spindle lives on motor channel 2.
    pub fn enable_spindle(&self, tool: u8, clockwise: bool) -> Result<()> {
        self.toggle_motor2(
            tool,
            MotorFlags {
                enabled: true,
                clockwise,
            },
        )
    }

    /// Stop the spindle. Addresses motor channel 2, same as
    /// [`enable_spindle`].
    ///
    /// [`enable_spindle`]: Gen3Driver::enable_spindle
    pub fn disable_spindle(&self, tool: u8, clockwise: bool) -> Result<()> {
        self.toggle_motor2(
            tool,
            MotorFlags {
                enabled: false,
                clockwise,
            },
        )
    }

    /// Motor 1 speed reading, as microseconds per revolution.
    pub fn motor1_rpm_micros(&self, tool: u8) -> Result<u32> {
        let mut response = self.tool_query(tool, ToolCommand::GetMotor1Rpm, &[])?;
        response.read_u32()
    }

    /// Motor 2 speed reading, as microseconds per revolution.
    pub fn motor2_rpm_micros(&self, tool: u8) -> Result<u32> {
        let mut response = self.tool_query(tool, ToolCommand::GetMotor2Rpm, &[])?;
        response.read_u32()
    }

    /// Motor 1 PWM duty reading.
    pub fn motor1_pwm(&self, tool: u8) -> Result<u8> {
        let mut response = self.tool_query(tool, ToolCommand::GetMotor1Pwm, &[])?;
        response.read_u8()
    }

    /// Motor 2 PWM duty reading.
    pub fn motor2_pwm(&self, tool: u8) -> Result<u8> {
        let mut response = self.tool_query(tool, ToolCommand::GetMotor2Pwm, &[])?;
        response.read_u8()
    }

    /// Switch a tool's fan on or off.
    pub fn toggle_fan(&self, tool: u8, on: bool) -> Result<()> {
        tracing::debug!(tool, on, "toggling fan");
        self.tool_command(tool, ToolCommand::ToggleFan, &[u8::from(on)])
    }

    /// Open or close a tool's valve.
    pub fn toggle_valve(&self, tool: u8, open: bool) -> Result<()> {
        tracing::debug!(tool, open, "toggling valve");
        self.tool_command(tool, ToolCommand::ToggleValve, &[u8::from(open)])
    }

    /// Position servo 1.
    pub fn set_servo1_position(&self, tool: u8, position: u8) -> Result<()> {
        self.tool_command(tool, ToolCommand::SetServo1Pos, &[position])
    }

    /// Position servo 2.
    pub fn set_servo2_position(&self, tool: u8, position: u8) -> Result<()> {
        self.tool_command(tool, ToolCommand::SetServo2Pos, &[position])
    }

    /// Filament presence reading from the tool.
    pub fn filament_status(&self, tool: u8) -> Result<u8> {
        let mut response = self.tool_query(tool, ToolCommand::FilamentStatus, &[])?;
        response.read_u8()
    }

    /// Tell the tool board it has been selected.
    pub fn select_tool(&self, tool: u8) -> Result<()> {
        self.tool_command(tool, ToolCommand::SelectTool, &[])
    }

    /// Whether the tool has reached its target (temperature, speed).
    pub fn is_tool_ready(&self, tool: u8) -> Result<bool> {
        let mut response = self.tool_query(tool, ToolCommand::IsToolReady, &[])?;
        Ok(response.read_u8()? != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_set_bits() {
        assert_eq!(AxisSet::X.bits(), 0b001);
        assert_eq!(AxisSet::X.with(AxisSet::Z).bits(), 0b101);
        assert_eq!(AxisSet::ALL.bits(), 0b111);
        assert!(AxisSet::ALL.contains(AxisSet::Y));
        assert!(!AxisSet::X.contains(AxisSet::Y));
        assert_eq!(AxisSet::empty().bits(), 0);
    }

    #[test]
    fn test_motor_flags_bits() {
        let flags = MotorFlags {
            enabled: true,
            clockwise: false,
        };
        assert_eq!(flags.bits(), 0b01);

        let flags = MotorFlags {
            enabled: true,
            clockwise: true,
        };
        assert_eq!(flags.bits(), 0b11);

        let flags = MotorFlags {
            enabled: false,
            clockwise: true,
        };
        assert_eq!(flags.bits(), 0b10);
    }

    #[test]
    fn test_enable_disable_masks() {
        // the wire bytes for "all axes": 0x87 enables, 0x07 disables
        assert_eq!(AXES_ENABLE_BIT | AxisSet::ALL.bits(), 0x87);
        assert_eq!(AxisSet::ALL.bits(), 0x07);
    }
}

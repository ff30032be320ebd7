//! Command tables for the master board and the tool boards.
//!
//! The master executes motion and coordination commands directly; tool
//! boards are addressed by index through `ToolCommand`/`ToolQuery`
//! wrappers carrying one of the `ToolCommand` codes.

/// Commands executed by the master (motion) board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MasterCommand {
    Version = 0,
    Init = 1,
    GetBufferSize = 2,
    ClearBuffer = 3,
    GetPosition = 4,
    GetRange = 5,
    SetRange = 6,
    Abort = 7,
    Pause = 8,
    Probe = 9,
    ToolQuery = 10,
    IsFinished = 11,
    QueuePointAbs = 129,
    SetPosition = 130,
    FindAxesMinimum = 131,
    FindAxesMaximum = 132,
    Delay = 133,
    ChangeTool = 134,
    WaitForTool = 135,
    ToolCommand = 136,
    EnableAxes = 137,
}

impl MasterCommand {
    /// The wire code for this command.
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl From<MasterCommand> for u8 {
    fn from(command: MasterCommand) -> u8 {
        command.code()
    }
}

/// Commands routed through the master to a tool board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ToolCommand {
    Version = 0,
    Init = 1,
    GetTemp = 2,
    SetTemp = 3,
    SetMotor1Pwm = 4,
    SetMotor2Pwm = 5,
    SetMotor1Rpm = 6,
    SetMotor2Rpm = 7,
    SetMotor1Dir = 8,
    SetMotor2Dir = 9,
    ToggleMotor1 = 10,
    ToggleMotor2 = 11,
    ToggleFan = 12,
    ToggleValve = 13,
    SetServo1Pos = 14,
    SetServo2Pos = 15,
    FilamentStatus = 16,
    GetMotor1Rpm = 17,
    GetMotor2Rpm = 18,
    GetMotor1Pwm = 19,
    GetMotor2Pwm = 20,
    SelectTool = 21,
    IsToolReady = 22,
}

impl ToolCommand {
    /// The wire code for this command.
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl From<ToolCommand> for u8 {
    fn from(command: ToolCommand) -> u8 {
        command.code()
    }
}

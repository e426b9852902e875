//! S3G opcode table
//!
//! Host queries (0-127) are answered immediately; action commands
//! (128-255) are queued by the printer. Each opcode either has a fixed
//! payload length (opcode byte included) or a variable encoding.

use printkit_core::{ProtocolError, Result};

/// Opcode values
pub mod op {
    /// Firmware version handshake
    pub const GET_VERSION: u8 = 0;
    /// Free space in the command buffer
    pub const GET_AVAILABLE_BUFFER_SIZE: u8 = 2;
    /// Empty the command buffer
    pub const CLEAR_BUFFER: u8 = 3;
    /// Stop everything and empty the buffer
    pub const ABORT_IMMEDIATELY: u8 = 7;
    /// Toggle pause
    pub const PAUSE: u8 = 8;
    /// Query a tool
    pub const TOOL_QUERY: u8 = 10;
    /// Check if the buffer is empty and motion stopped
    pub const IS_FINISHED: u8 = 11;
    /// Read EEPROM bytes
    pub const READ_FROM_EEPROM: u8 = 12;
    /// Current position in steps
    pub const GET_EXTENDED_POSITION: u8 = 21;
    /// Stop motion and/or the buffer
    pub const EXTENDED_STOP: u8 = 22;
    /// Build statistics
    pub const GET_BUILD_STATS: u8 = 24;
    /// Home towards minimum end stops
    pub const FIND_AXES_MINIMUMS: u8 = 131;
    /// Home towards maximum end stops
    pub const FIND_AXES_MAXIMUMS: u8 = 132;
    /// Wait
    pub const DELAY: u8 = 133;
    /// Select tool
    pub const CHANGE_TOOL: u8 = 134;
    /// Wait for a tool to heat
    pub const WAIT_FOR_TOOL_READY: u8 = 135;
    /// Send an action to a tool
    pub const TOOL_ACTION_COMMAND: u8 = 136;
    /// Enable or disable steppers
    pub const ENABLE_AXES: u8 = 137;
    /// Absolute move with a DDA rate
    pub const QUEUE_EXTENDED_POINT: u8 = 139;
    /// Define the current position
    pub const SET_EXTENDED_POSITION: u8 = 140;
    /// Wait for the platform to heat
    pub const WAIT_FOR_PLATFORM_READY: u8 = 141;
    /// Move with a duration and per-axis relative flags
    pub const QUEUE_EXTENDED_POINT_NEW: u8 = 142;
    /// Save home offsets
    pub const STORE_HOME_POSITIONS: u8 = 143;
    /// Restore home offsets
    pub const RECALL_HOME_POSITIONS: u8 = 144;
    /// Set stepper reference voltage
    pub const SET_POT_VALUE: u8 = 145;
    /// Set the LED colour
    pub const SET_RGB_LED: u8 = 146;
    /// Beep
    pub const SET_BEEP: u8 = 147;
    /// Wait for a button press
    pub const WAIT_FOR_BUTTON: u8 = 148;
    /// Show text on the display
    pub const DISPLAY_MESSAGE: u8 = 149;
    /// Report build progress
    pub const SET_BUILD_PERCENT: u8 = 150;
    /// Play a song
    pub const QUEUE_SONG: u8 = 151;
    /// Restore factory settings
    pub const RESET_TO_FACTORY: u8 = 152;
    /// Build started
    pub const BUILD_START_NOTIFICATION: u8 = 153;
    /// Build ended
    pub const BUILD_END_NOTIFICATION: u8 = 154;
    /// Accelerated move
    pub const QUEUE_EXTENDED_POINT_ACCELERATED: u8 = 155;
    /// Toggle acceleration
    pub const SET_ACCELERATION_TOGGLE: u8 = 156;
    /// x3g stream version header
    pub const STREAM_VERSION: u8 = 157;
}

/// Axis bit masks (X, Y, Z, A, B)
pub mod axes {
    /// X
    pub const X: u8 = 0x01;
    /// Y
    pub const Y: u8 = 0x02;
    /// Z
    pub const Z: u8 = 0x04;
    /// A (tool 0 extruder)
    pub const A: u8 = 0x08;
    /// B (tool 1 extruder)
    pub const B: u8 = 0x10;
    /// Every axis
    pub const ALL: u8 = 0x1F;
}

/// How the length of a packet is determined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketLength {
    /// Fixed number of bytes, opcode included
    Fixed(usize),
    /// `opcode, tool, action, len` followed by `len` bytes
    ToolAction,
    /// `header` bytes (opcode included) followed by a NUL-terminated string
    Terminated {
        /// Bytes before the string
        header: usize,
    },
}

/// One table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcodeInfo {
    /// Opcode value
    pub opcode: u8,
    /// Protocol name
    pub name: &'static str,
    /// Length rule
    pub length: PacketLength,
}

const fn fixed(opcode: u8, name: &'static str, len: usize) -> OpcodeInfo {
    OpcodeInfo {
        opcode,
        name,
        length: PacketLength::Fixed(len),
    }
}

/// Every opcode the host encodes or streams
pub static OPCODES: [OpcodeInfo; 37] = [
    fixed(op::GET_VERSION, "GET_VERSION", 3),
    fixed(op::GET_AVAILABLE_BUFFER_SIZE, "GET_AVAILABLE_BUFFER_SIZE", 1),
    fixed(op::CLEAR_BUFFER, "CLEAR_BUFFER", 1),
    fixed(op::ABORT_IMMEDIATELY, "ABORT_IMMEDIATELY", 1),
    fixed(op::PAUSE, "PAUSE", 1),
    fixed(op::TOOL_QUERY, "TOOL_QUERY", 3),
    fixed(op::IS_FINISHED, "IS_FINISHED", 1),
    fixed(op::READ_FROM_EEPROM, "READ_FROM_EEPROM", 4),
    fixed(op::GET_EXTENDED_POSITION, "GET_EXTENDED_POSITION", 1),
    fixed(op::EXTENDED_STOP, "EXTENDED_STOP", 2),
    fixed(op::GET_BUILD_STATS, "GET_BUILD_STATS", 1),
    fixed(op::FIND_AXES_MINIMUMS, "FIND_AXES_MINIMUMS", 8),
    fixed(op::FIND_AXES_MAXIMUMS, "FIND_AXES_MAXIMUMS", 8),
    fixed(op::DELAY, "DELAY", 5),
    fixed(op::CHANGE_TOOL, "CHANGE_TOOL", 2),
    fixed(op::WAIT_FOR_TOOL_READY, "WAIT_FOR_TOOL_READY", 6),
    OpcodeInfo {
        opcode: op::TOOL_ACTION_COMMAND,
        name: "TOOL_ACTION_COMMAND",
        length: PacketLength::ToolAction,
    },
    fixed(op::ENABLE_AXES, "ENABLE_AXES", 2),
    fixed(op::QUEUE_EXTENDED_POINT, "QUEUE_EXTENDED_POINT", 25),
    fixed(op::SET_EXTENDED_POSITION, "SET_EXTENDED_POSITION", 21),
    fixed(op::WAIT_FOR_PLATFORM_READY, "WAIT_FOR_PLATFORM_READY", 6),
    fixed(op::QUEUE_EXTENDED_POINT_NEW, "QUEUE_EXTENDED_POINT_NEW", 26),
    fixed(op::STORE_HOME_POSITIONS, "STORE_HOME_POSITIONS", 2),
    fixed(op::RECALL_HOME_POSITIONS, "RECALL_HOME_POSITIONS", 2),
    fixed(op::SET_POT_VALUE, "SET_POT_VALUE", 3),
    fixed(op::SET_RGB_LED, "SET_RGB_LED", 6),
    fixed(op::SET_BEEP, "SET_BEEP", 6),
    fixed(op::WAIT_FOR_BUTTON, "WAIT_FOR_BUTTON", 5),
    OpcodeInfo {
        opcode: op::DISPLAY_MESSAGE,
        name: "DISPLAY_MESSAGE",
        length: PacketLength::Terminated { header: 5 },
    },
    fixed(op::SET_BUILD_PERCENT, "SET_BUILD_PERCENT", 3),
    fixed(op::QUEUE_SONG, "QUEUE_SONG", 2),
    fixed(op::RESET_TO_FACTORY, "RESET_TO_FACTORY", 2),
    OpcodeInfo {
        opcode: op::BUILD_START_NOTIFICATION,
        name: "BUILD_START_NOTIFICATION",
        length: PacketLength::Terminated { header: 5 },
    },
    fixed(op::BUILD_END_NOTIFICATION, "BUILD_END_NOTIFICATION", 2),
    fixed(
        op::QUEUE_EXTENDED_POINT_ACCELERATED,
        "QUEUE_EXTENDED_POINT_ACCELERATED",
        32,
    ),
    fixed(op::SET_ACCELERATION_TOGGLE, "SET_ACCELERATION_TOGGLE", 2),
    fixed(op::STREAM_VERSION, "STREAM_VERSION", 21),
];

/// Look up an opcode
pub fn lookup(opcode: u8) -> Option<&'static OpcodeInfo> {
    OPCODES.iter().find(|info| info.opcode == opcode)
}

/// Length of the packet at the start of `bytes`
///
/// Returns `Ok(None)` when more bytes are needed to decide.
pub fn packet_length(bytes: &[u8]) -> Result<Option<usize>> {
    let Some(&opcode) = bytes.first() else {
        return Ok(None);
    };
    let info = lookup(opcode).ok_or(ProtocolError::UnknownOpcode { opcode })?;
    Ok(match info.length {
        PacketLength::Fixed(len) => Some(len),
        PacketLength::ToolAction => bytes.get(3).map(|len| 4 + *len as usize),
        PacketLength::Terminated { header } => bytes
            .iter()
            .skip(header)
            .position(|b| *b == 0)
            .map(|pos| header + pos + 1),
    })
}

//! Typed S3G commands
//!
//! [`S3gCommand`] encodes to and decodes from packet payloads (opcode
//! first, little-endian fields). The engine builds commands for manual
//! operations and parking; job streams are forwarded as raw packets and
//! only decoded for movement tracking.

use super::opcodes::{op, packet_length};
use super::packet::MAX_PAYLOAD;
use printkit_core::{ProtocolError, Result};

/// Tool action sub-commands
pub mod tool_action {
    /// Set toolhead target temperature (i16 °C)
    pub const SET_TOOLHEAD_TARGET_TEMP: u8 = 3;
    /// Cooling fan on/off
    pub const TOGGLE_FAN: u8 = 12;
    /// Set platform target temperature (i16 °C)
    pub const SET_PLATFORM_TARGET_TEMP: u8 = 31;
}

/// Tool query sub-commands
pub mod tool_query {
    /// Toolhead temperature (u16 °C)
    pub const GET_TOOLHEAD_TEMP: u8 = 2;
    /// Platform temperature (u16 °C)
    pub const GET_PLATFORM_TEMP: u8 = 30;
    /// Toolhead target temperature (u16 °C)
    pub const GET_TOOLHEAD_TARGET_TEMP: u8 = 32;
    /// Platform target temperature (u16 °C)
    pub const GET_PLATFORM_TARGET_TEMP: u8 = 33;
}

/// One S3G command
#[derive(Debug, Clone, PartialEq)]
pub enum S3gCommand {
    /// Version handshake
    GetVersion {
        /// Host protocol version
        host_version: u16,
    },
    /// Free command buffer space
    GetAvailableBufferSize,
    /// Empty the command buffer
    ClearBuffer,
    /// Stop everything immediately
    AbortImmediately,
    /// Toggle pause
    Pause,
    /// Query a tool
    ToolQuery {
        /// Tool index
        tool: u8,
        /// Query code
        code: u8,
    },
    /// Check if motion has finished
    IsFinished,
    /// Read EEPROM bytes
    ReadFromEeprom {
        /// Byte offset
        offset: u16,
        /// Number of bytes
        length: u8,
    },
    /// Current position in steps
    GetExtendedPosition,
    /// Stop motion and/or clear the queue
    ExtendedStop {
        /// Halt steppers
        halt_steppers: bool,
        /// Clear the command queue
        clear_queue: bool,
    },
    /// Build statistics
    GetBuildStats,
    /// Home towards minimum end stops
    FindAxesMinimums {
        /// Axis bit mask
        axes: u8,
        /// Microseconds per step
        feedrate: u32,
        /// Timeout in seconds
        timeout_s: u16,
    },
    /// Home towards maximum end stops
    FindAxesMaximums {
        /// Axis bit mask
        axes: u8,
        /// Microseconds per step
        feedrate: u32,
        /// Timeout in seconds
        timeout_s: u16,
    },
    /// Wait
    Delay {
        /// Milliseconds
        millis: u32,
    },
    /// Select tool
    ChangeTool(u8),
    /// Wait for a tool to heat
    WaitForToolReady {
        /// Tool index
        tool: u8,
        /// Poll delay in milliseconds
        delay_ms: u16,
        /// Timeout in seconds
        timeout_s: u16,
    },
    /// Tool action with a sub-command payload
    ToolAction {
        /// Tool index
        tool: u8,
        /// Sub-command
        action: u8,
        /// Sub-command payload
        payload: Vec<u8>,
    },
    /// Enable or disable steppers
    EnableAxes {
        /// Axis bit mask
        axes: u8,
        /// Enable when true
        enable: bool,
    },
    /// Absolute move with a DDA rate
    QueueExtendedPoint {
        /// Target in steps (X, Y, Z, A, B)
        steps: [i32; 5],
        /// Microseconds per step
        dda: u32,
    },
    /// Define the current position
    SetExtendedPosition {
        /// Position in steps
        steps: [i32; 5],
    },
    /// Wait for the platform to heat
    WaitForPlatformReady {
        /// Tool index owning the platform
        tool: u8,
        /// Poll delay in milliseconds
        delay_ms: u16,
        /// Timeout in seconds
        timeout_s: u16,
    },
    /// Move with a duration and per-axis relative flags
    QueueExtendedPointNew {
        /// Target or offset in steps
        steps: [i32; 5],
        /// Move duration in microseconds
        duration_us: u32,
        /// Axis mask of relative axes
        relative: u8,
    },
    /// Save home offsets
    StoreHomePositions {
        /// Axis bit mask
        axes: u8,
    },
    /// Restore home offsets
    RecallHomePositions {
        /// Axis bit mask
        axes: u8,
    },
    /// Set stepper reference voltage
    SetPotValue {
        /// Axis index
        axis: u8,
        /// Pot value
        value: u8,
    },
    /// Set the LED colour
    SetRgbLed {
        /// Red
        red: u8,
        /// Green
        green: u8,
        /// Blue
        blue: u8,
        /// Blink rate
        blink: u8,
        /// Effect
        effect: u8,
    },
    /// Beep
    SetBeep {
        /// Frequency in Hz
        frequency: u16,
        /// Duration in milliseconds
        duration_ms: u16,
        /// Effect
        effect: u8,
    },
    /// Wait for a button press
    WaitForButton {
        /// Button mask
        mask: u8,
        /// Timeout in seconds
        timeout_s: u16,
        /// Option flags
        options: u8,
    },
    /// Show text on the display
    DisplayMessage {
        /// Option flags
        options: u8,
        /// Column
        x: u8,
        /// Row
        y: u8,
        /// Timeout in seconds
        timeout_s: u8,
        /// Text
        text: String,
    },
    /// Report build progress
    SetBuildPercent(u8),
    /// Play a song
    QueueSong(u8),
    /// Restore factory settings
    ResetToFactory(u8),
    /// Build started
    BuildStart {
        /// Number of steps in the build
        steps: u32,
        /// Build name
        name: String,
    },
    /// Build ended
    BuildEnd,
    /// Accelerated move
    QueueExtendedPointAccelerated {
        /// Target or offset in steps
        steps: [i32; 5],
        /// DDA rate
        dda_rate: u32,
        /// Axis mask of relative axes
        relative: u8,
        /// Move distance in mm
        distance_mm: f32,
        /// Feed rate times 64
        feedrate: u16,
    },
    /// Enable or disable acceleration
    SetAccelerationToggle(bool),
    /// x3g stream version header
    StreamVersion {
        /// Header body
        raw: [u8; 20],
    },
}

/// Longest string a variable-length command can carry
const MAX_TEXT: usize = MAX_PAYLOAD - 6;

fn push_steps(out: &mut Vec<u8>, steps: &[i32; 5]) {
    for s in steps {
        out.extend_from_slice(&s.to_le_bytes());
    }
}

fn push_text(out: &mut Vec<u8>, text: &str) {
    out.extend(text.bytes().filter(|b| *b != 0).take(MAX_TEXT));
    out.push(0);
}

impl S3gCommand {
    /// Set a toolhead target temperature
    pub fn set_toolhead_temperature(tool: u8, celsius: i16) -> Self {
        S3gCommand::ToolAction {
            tool,
            action: tool_action::SET_TOOLHEAD_TARGET_TEMP,
            payload: celsius.to_le_bytes().to_vec(),
        }
    }

    /// Set the platform target temperature
    pub fn set_platform_temperature(celsius: i16) -> Self {
        S3gCommand::ToolAction {
            tool: 0,
            action: tool_action::SET_PLATFORM_TARGET_TEMP,
            payload: celsius.to_le_bytes().to_vec(),
        }
    }

    /// Switch a tool's cooling fan
    pub fn set_fan(tool: u8, on: bool) -> Self {
        S3gCommand::ToolAction {
            tool,
            action: tool_action::TOGGLE_FAN,
            payload: vec![u8::from(on)],
        }
    }

    /// Opcode of this command
    pub fn opcode(&self) -> u8 {
        match self {
            S3gCommand::GetVersion { .. } => op::GET_VERSION,
            S3gCommand::GetAvailableBufferSize => op::GET_AVAILABLE_BUFFER_SIZE,
            S3gCommand::ClearBuffer => op::CLEAR_BUFFER,
            S3gCommand::AbortImmediately => op::ABORT_IMMEDIATELY,
            S3gCommand::Pause => op::PAUSE,
            S3gCommand::ToolQuery { .. } => op::TOOL_QUERY,
            S3gCommand::IsFinished => op::IS_FINISHED,
            S3gCommand::ReadFromEeprom { .. } => op::READ_FROM_EEPROM,
            S3gCommand::GetExtendedPosition => op::GET_EXTENDED_POSITION,
            S3gCommand::ExtendedStop { .. } => op::EXTENDED_STOP,
            S3gCommand::GetBuildStats => op::GET_BUILD_STATS,
            S3gCommand::FindAxesMinimums { .. } => op::FIND_AXES_MINIMUMS,
            S3gCommand::FindAxesMaximums { .. } => op::FIND_AXES_MAXIMUMS,
            S3gCommand::Delay { .. } => op::DELAY,
            S3gCommand::ChangeTool(_) => op::CHANGE_TOOL,
            S3gCommand::WaitForToolReady { .. } => op::WAIT_FOR_TOOL_READY,
            S3gCommand::ToolAction { .. } => op::TOOL_ACTION_COMMAND,
            S3gCommand::EnableAxes { .. } => op::ENABLE_AXES,
            S3gCommand::QueueExtendedPoint { .. } => op::QUEUE_EXTENDED_POINT,
            S3gCommand::SetExtendedPosition { .. } => op::SET_EXTENDED_POSITION,
            S3gCommand::WaitForPlatformReady { .. } => op::WAIT_FOR_PLATFORM_READY,
            S3gCommand::QueueExtendedPointNew { .. } => op::QUEUE_EXTENDED_POINT_NEW,
            S3gCommand::StoreHomePositions { .. } => op::STORE_HOME_POSITIONS,
            S3gCommand::RecallHomePositions { .. } => op::RECALL_HOME_POSITIONS,
            S3gCommand::SetPotValue { .. } => op::SET_POT_VALUE,
            S3gCommand::SetRgbLed { .. } => op::SET_RGB_LED,
            S3gCommand::SetBeep { .. } => op::SET_BEEP,
            S3gCommand::WaitForButton { .. } => op::WAIT_FOR_BUTTON,
            S3gCommand::DisplayMessage { .. } => op::DISPLAY_MESSAGE,
            S3gCommand::SetBuildPercent(_) => op::SET_BUILD_PERCENT,
            S3gCommand::QueueSong(_) => op::QUEUE_SONG,
            S3gCommand::ResetToFactory(_) => op::RESET_TO_FACTORY,
            S3gCommand::BuildStart { .. } => op::BUILD_START_NOTIFICATION,
            S3gCommand::BuildEnd => op::BUILD_END_NOTIFICATION,
            S3gCommand::QueueExtendedPointAccelerated { .. } => {
                op::QUEUE_EXTENDED_POINT_ACCELERATED
            }
            S3gCommand::SetAccelerationToggle(_) => op::SET_ACCELERATION_TOGGLE,
            S3gCommand::StreamVersion { .. } => op::STREAM_VERSION,
        }
    }

    /// Check if the printer answers this command immediately
    pub fn is_query(&self) -> bool {
        self.opcode() < 0x80
    }

    /// Encode to a packet payload
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = vec![self.opcode()];
        match self {
            S3gCommand::GetVersion { host_version } => {
                out.extend_from_slice(&host_version.to_le_bytes())
            }
            S3gCommand::GetAvailableBufferSize
            | S3gCommand::ClearBuffer
            | S3gCommand::AbortImmediately
            | S3gCommand::Pause
            | S3gCommand::IsFinished
            | S3gCommand::GetExtendedPosition
            | S3gCommand::GetBuildStats => {}
            S3gCommand::ToolQuery { tool, code } => out.extend_from_slice(&[*tool, *code]),
            S3gCommand::ReadFromEeprom { offset, length } => {
                out.extend_from_slice(&offset.to_le_bytes());
                out.push(*length);
            }
            S3gCommand::ExtendedStop {
                halt_steppers,
                clear_queue,
            } => out.push(u8::from(*halt_steppers) | (u8::from(*clear_queue) << 1)),
            S3gCommand::FindAxesMinimums {
                axes,
                feedrate,
                timeout_s,
            }
            | S3gCommand::FindAxesMaximums {
                axes,
                feedrate,
                timeout_s,
            } => {
                out.push(*axes);
                out.extend_from_slice(&feedrate.to_le_bytes());
                out.extend_from_slice(&timeout_s.to_le_bytes());
            }
            S3gCommand::Delay { millis } => out.extend_from_slice(&millis.to_le_bytes()),
            S3gCommand::ChangeTool(tool) => out.push(*tool),
            S3gCommand::WaitForToolReady {
                tool,
                delay_ms,
                timeout_s,
            }
            | S3gCommand::WaitForPlatformReady {
                tool,
                delay_ms,
                timeout_s,
            } => {
                out.push(*tool);
                out.extend_from_slice(&delay_ms.to_le_bytes());
                out.extend_from_slice(&timeout_s.to_le_bytes());
            }
            S3gCommand::ToolAction {
                tool,
                action,
                payload,
            } => {
                if payload.len() > MAX_PAYLOAD - 4 {
                    return Err(ProtocolError::MalformedPacket {
                        reason: format!("tool action payload of {} bytes", payload.len()),
                    }
                    .into());
                }
                out.extend_from_slice(&[*tool, *action, payload.len() as u8]);
                out.extend_from_slice(payload);
            }
            S3gCommand::EnableAxes { axes, enable } => {
                out.push((axes & 0x1F) | if *enable { 0x80 } else { 0 })
            }
            S3gCommand::QueueExtendedPoint { steps, dda } => {
                push_steps(&mut out, steps);
                out.extend_from_slice(&dda.to_le_bytes());
            }
            S3gCommand::SetExtendedPosition { steps } => push_steps(&mut out, steps),
            S3gCommand::QueueExtendedPointNew {
                steps,
                duration_us,
                relative,
            } => {
                push_steps(&mut out, steps);
                out.extend_from_slice(&duration_us.to_le_bytes());
                out.push(*relative);
            }
            S3gCommand::StoreHomePositions { axes } | S3gCommand::RecallHomePositions { axes } => {
                out.push(*axes)
            }
            S3gCommand::SetPotValue { axis, value } => out.extend_from_slice(&[*axis, *value]),
            S3gCommand::SetRgbLed {
                red,
                green,
                blue,
                blink,
                effect,
            } => out.extend_from_slice(&[*red, *green, *blue, *blink, *effect]),
            S3gCommand::SetBeep {
                frequency,
                duration_ms,
                effect,
            } => {
                out.extend_from_slice(&frequency.to_le_bytes());
                out.extend_from_slice(&duration_ms.to_le_bytes());
                out.push(*effect);
            }
            S3gCommand::WaitForButton {
                mask,
                timeout_s,
                options,
            } => {
                out.push(*mask);
                out.extend_from_slice(&timeout_s.to_le_bytes());
                out.push(*options);
            }
            S3gCommand::DisplayMessage {
                options,
                x,
                y,
                timeout_s,
                text,
            } => {
                out.extend_from_slice(&[*options, *x, *y, *timeout_s]);
                push_text(&mut out, text);
            }
            S3gCommand::SetBuildPercent(percent) => out.extend_from_slice(&[*percent, 0]),
            S3gCommand::QueueSong(id) | S3gCommand::ResetToFactory(id) => out.push(*id),
            S3gCommand::BuildStart { steps, name } => {
                out.extend_from_slice(&steps.to_le_bytes());
                push_text(&mut out, name);
            }
            S3gCommand::BuildEnd => out.push(0),
            S3gCommand::QueueExtendedPointAccelerated {
                steps,
                dda_rate,
                relative,
                distance_mm,
                feedrate,
            } => {
                push_steps(&mut out, steps);
                out.extend_from_slice(&dda_rate.to_le_bytes());
                out.push(*relative);
                out.extend_from_slice(&distance_mm.to_le_bytes());
                out.extend_from_slice(&feedrate.to_le_bytes());
            }
            S3gCommand::SetAccelerationToggle(on) => out.push(u8::from(*on)),
            S3gCommand::StreamVersion { raw } => out.extend_from_slice(raw),
        }
        Ok(out)
    }

    /// Decode a packet payload; the payload must be exactly one packet
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let expected = packet_length(payload)?.ok_or_else(|| malformed("truncated packet"))?;
        if expected != payload.len() {
            return Err(malformed(&format!(
                "packet is {} bytes, opcode needs {}",
                payload.len(),
                expected
            )));
        }
        let mut r = Reader::new(&payload[1..]);
        let command = match payload[0] {
            op::GET_VERSION => S3gCommand::GetVersion {
                host_version: r.u16()?,
            },
            op::GET_AVAILABLE_BUFFER_SIZE => S3gCommand::GetAvailableBufferSize,
            op::CLEAR_BUFFER => S3gCommand::ClearBuffer,
            op::ABORT_IMMEDIATELY => S3gCommand::AbortImmediately,
            op::PAUSE => S3gCommand::Pause,
            op::TOOL_QUERY => S3gCommand::ToolQuery {
                tool: r.u8()?,
                code: r.u8()?,
            },
            op::IS_FINISHED => S3gCommand::IsFinished,
            op::READ_FROM_EEPROM => S3gCommand::ReadFromEeprom {
                offset: r.u16()?,
                length: r.u8()?,
            },
            op::GET_EXTENDED_POSITION => S3gCommand::GetExtendedPosition,
            op::EXTENDED_STOP => {
                let flags = r.u8()?;
                S3gCommand::ExtendedStop {
                    halt_steppers: flags & 0x01 != 0,
                    clear_queue: flags & 0x02 != 0,
                }
            }
            op::GET_BUILD_STATS => S3gCommand::GetBuildStats,
            op::FIND_AXES_MINIMUMS => S3gCommand::FindAxesMinimums {
                axes: r.u8()?,
                feedrate: r.u32()?,
                timeout_s: r.u16()?,
            },
            op::FIND_AXES_MAXIMUMS => S3gCommand::FindAxesMaximums {
                axes: r.u8()?,
                feedrate: r.u32()?,
                timeout_s: r.u16()?,
            },
            op::DELAY => S3gCommand::Delay { millis: r.u32()? },
            op::CHANGE_TOOL => S3gCommand::ChangeTool(r.u8()?),
            op::WAIT_FOR_TOOL_READY => S3gCommand::WaitForToolReady {
                tool: r.u8()?,
                delay_ms: r.u16()?,
                timeout_s: r.u16()?,
            },
            op::TOOL_ACTION_COMMAND => {
                let tool = r.u8()?;
                let action = r.u8()?;
                let len = r.u8()? as usize;
                S3gCommand::ToolAction {
                    tool,
                    action,
                    payload: r.bytes(len)?.to_vec(),
                }
            }
            op::ENABLE_AXES => {
                let flags = r.u8()?;
                S3gCommand::EnableAxes {
                    axes: flags & 0x1F,
                    enable: flags & 0x80 != 0,
                }
            }
            op::QUEUE_EXTENDED_POINT => S3gCommand::QueueExtendedPoint {
                steps: r.steps()?,
                dda: r.u32()?,
            },
            op::SET_EXTENDED_POSITION => S3gCommand::SetExtendedPosition { steps: r.steps()? },
            op::WAIT_FOR_PLATFORM_READY => S3gCommand::WaitForPlatformReady {
                tool: r.u8()?,
                delay_ms: r.u16()?,
                timeout_s: r.u16()?,
            },
            op::QUEUE_EXTENDED_POINT_NEW => S3gCommand::QueueExtendedPointNew {
                steps: r.steps()?,
                duration_us: r.u32()?,
                relative: r.u8()?,
            },
            op::STORE_HOME_POSITIONS => S3gCommand::StoreHomePositions { axes: r.u8()? },
            op::RECALL_HOME_POSITIONS => S3gCommand::RecallHomePositions { axes: r.u8()? },
            op::SET_POT_VALUE => S3gCommand::SetPotValue {
                axis: r.u8()?,
                value: r.u8()?,
            },
            op::SET_RGB_LED => S3gCommand::SetRgbLed {
                red: r.u8()?,
                green: r.u8()?,
                blue: r.u8()?,
                blink: r.u8()?,
                effect: r.u8()?,
            },
            op::SET_BEEP => S3gCommand::SetBeep {
                frequency: r.u16()?,
                duration_ms: r.u16()?,
                effect: r.u8()?,
            },
            op::WAIT_FOR_BUTTON => S3gCommand::WaitForButton {
                mask: r.u8()?,
                timeout_s: r.u16()?,
                options: r.u8()?,
            },
            op::DISPLAY_MESSAGE => S3gCommand::DisplayMessage {
                options: r.u8()?,
                x: r.u8()?,
                y: r.u8()?,
                timeout_s: r.u8()?,
                text: r.text()?,
            },
            op::SET_BUILD_PERCENT => {
                let percent = r.u8()?;
                r.u8()?;
                S3gCommand::SetBuildPercent(percent)
            }
            op::QUEUE_SONG => S3gCommand::QueueSong(r.u8()?),
            op::RESET_TO_FACTORY => S3gCommand::ResetToFactory(r.u8()?),
            op::BUILD_START_NOTIFICATION => S3gCommand::BuildStart {
                steps: r.u32()?,
                name: r.text()?,
            },
            op::BUILD_END_NOTIFICATION => {
                r.u8()?;
                S3gCommand::BuildEnd
            }
            op::QUEUE_EXTENDED_POINT_ACCELERATED => S3gCommand::QueueExtendedPointAccelerated {
                steps: r.steps()?,
                dda_rate: r.u32()?,
                relative: r.u8()?,
                distance_mm: r.f32()?,
                feedrate: r.u16()?,
            },
            op::SET_ACCELERATION_TOGGLE => S3gCommand::SetAccelerationToggle(r.u8()? != 0),
            op::STREAM_VERSION => {
                let mut raw = [0u8; 20];
                raw.copy_from_slice(r.bytes(20)?);
                S3gCommand::StreamVersion { raw }
            }
            opcode => return Err(ProtocolError::UnknownOpcode { opcode }.into()),
        };
        Ok(command)
    }
}

fn malformed(reason: &str) -> printkit_core::Error {
    ProtocolError::MalformedPacket {
        reason: reason.to_string(),
    }
    .into()
}

/// Little-endian field reader over a payload
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Read from the start of `buf`
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Take `n` raw bytes
    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos + n;
        let slice = self
            .buf
            .get(self.pos..end)
            .ok_or_else(|| malformed("payload too short"))?;
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    /// Read a u8
    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    /// Read a u16
    pub fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    /// Read a u32
    pub fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    /// Read an i32
    pub fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    /// Read an f32
    pub fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.array()?))
    }

    /// Read five i32 step counts
    pub fn steps(&mut self) -> Result<[i32; 5]> {
        let mut steps = [0i32; 5];
        for s in steps.iter_mut() {
            *s = self.i32()?;
        }
        Ok(steps)
    }

    /// Read a NUL-terminated string
    pub fn text(&mut self) -> Result<String> {
        let rest = &self.buf[self.pos..];
        let end = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| malformed("unterminated string"))?;
        let text = String::from_utf8_lossy(&rest[..end]).into_owned();
        self.pos += end + 1;
        Ok(text)
    }
}

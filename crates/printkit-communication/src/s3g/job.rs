//! x3g job file reader
//!
//! A job file is a plain concatenation of S3G command payloads. The reader
//! uses the opcode table to cut the stream into packets and follows the
//! movement opcodes far enough to know the Z height and whether filament
//! moved, which feeds layer detection.

use super::commands::S3gCommand;
use super::opcodes::{axes, lookup, op, PacketLength};
use super::packet::MAX_PAYLOAD;
use printkit_core::{CalibrationProfile, JobError, ProtocolError, Result};
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

/// Movement decoded from a packet
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveInfo {
    /// Z height after the move
    pub z_mm: f64,
    /// An extruder axis moved
    pub extruding: bool,
}

/// One packet read from a job file
#[derive(Debug, Clone, PartialEq)]
pub struct JobPacket {
    /// Payload, opcode first
    pub payload: Vec<u8>,
    /// File offset just past this packet
    pub end_offset: u64,
    /// Movement, for move opcodes
    pub motion: Option<MoveInfo>,
}

impl JobPacket {
    /// Opcode of the packet
    pub fn opcode(&self) -> u8 {
        self.payload[0]
    }
}

/// Packet reader over an x3g stream
pub struct S3gJobReader<R = BufReader<File>> {
    reader: R,
    position: u64,
    steps: [i64; 5],
    calibration: CalibrationProfile,
    z_homed: bool,
}

impl S3gJobReader<BufReader<File>> {
    /// Open a job file
    pub fn open(path: &Path, calibration: CalibrationProfile) -> Result<Self> {
        let file = File::open(path).map_err(|e| JobError::FileError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::new(BufReader::new(file), calibration))
    }
}

impl<R: Read> S3gJobReader<R> {
    /// Read packets from any byte source
    pub fn new(reader: R, calibration: CalibrationProfile) -> Self {
        Self {
            reader,
            position: 0,
            steps: [0; 5],
            calibration,
            z_homed: false,
        }
    }

    /// Bytes consumed so far
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Check if the stream homed Z against an end stop
    pub fn z_homed(&self) -> bool {
        self.z_homed
    }

    /// Tracked position in steps (X, Y, Z, A, B)
    pub fn steps(&self) -> [i64; 5] {
        self.steps
    }

    /// Next packet, or `None` at end of file
    pub fn next_packet(&mut self) -> Result<Option<JobPacket>> {
        let mut opcode = [0u8; 1];
        match self.reader.read_exact(&mut opcode) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let info = lookup(opcode[0]).ok_or(ProtocolError::UnknownOpcode { opcode: opcode[0] })?;

        let mut payload = opcode.to_vec();
        match info.length {
            PacketLength::Fixed(len) => self.read_more(&mut payload, len - 1)?,
            PacketLength::ToolAction => {
                self.read_more(&mut payload, 3)?;
                let len = payload[3] as usize;
                self.read_more(&mut payload, len)?;
            }
            PacketLength::Terminated { header } => {
                self.read_more(&mut payload, header - 1)?;
                loop {
                    if payload.len() >= MAX_PAYLOAD {
                        return Err(ProtocolError::MalformedPacket {
                            reason: format!("unterminated {} at offset {}", info.name, self.position),
                        }
                        .into());
                    }
                    self.read_more(&mut payload, 1)?;
                    if payload.last() == Some(&0) {
                        break;
                    }
                }
            }
        }
        self.position += payload.len() as u64;
        let motion = self.track(&payload)?;
        Ok(Some(JobPacket {
            payload,
            end_offset: self.position,
            motion,
        }))
    }

    fn read_more(&mut self, payload: &mut Vec<u8>, n: usize) -> Result<()> {
        let start = payload.len();
        payload.resize(start + n, 0);
        self.reader.read_exact(&mut payload[start..]).map_err(|e| {
            if e.kind() == ErrorKind::UnexpectedEof {
                ProtocolError::MalformedPacket {
                    reason: format!("truncated packet at offset {}", self.position),
                }
                .into()
            } else {
                printkit_core::Error::from(e)
            }
        })
    }

    fn track(&mut self, payload: &[u8]) -> Result<Option<MoveInfo>> {
        let (target, relative) = match payload[0] {
            op::QUEUE_EXTENDED_POINT
            | op::QUEUE_EXTENDED_POINT_NEW
            | op::QUEUE_EXTENDED_POINT_ACCELERATED
            | op::SET_EXTENDED_POSITION
            | op::FIND_AXES_MINIMUMS
            | op::FIND_AXES_MAXIMUMS => match S3gCommand::decode(payload)? {
                S3gCommand::QueueExtendedPoint { steps, .. } => (steps, 0),
                S3gCommand::QueueExtendedPointNew {
                    steps, relative, ..
                }
                | S3gCommand::QueueExtendedPointAccelerated {
                    steps, relative, ..
                } => (steps, relative),
                S3gCommand::SetExtendedPosition { steps } => {
                    self.steps = steps.map(i64::from);
                    return Ok(None);
                }
                S3gCommand::FindAxesMinimums { axes: mask, .. }
                | S3gCommand::FindAxesMaximums { axes: mask, .. } => {
                    if mask & axes::Z != 0 {
                        self.z_homed = true;
                    }
                    return Ok(None);
                }
                _ => return Ok(None),
            },
            _ => return Ok(None),
        };

        let previous = self.steps;
        for (i, step) in target.iter().enumerate() {
            if relative & (1 << i) != 0 {
                self.steps[i] += i64::from(*step);
            } else {
                self.steps[i] = i64::from(*step);
            }
        }
        Ok(Some(MoveInfo {
            z_mm: self.calibration.z().steps_to_mm(self.steps[2]),
            extruding: self.steps[3] != previous[3] || self.steps[4] != previous[4],
        }))
    }
}

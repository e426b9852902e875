//! S3G/x3g binary protocol
//!
//! - [`packet`]: framing, CRC-8 and response codes
//! - [`opcodes`]: opcode table with packet lengths
//! - [`commands`]: typed commands and their payload encoding
//! - [`session`]: request/response exchange with retry rules
//! - [`job`]: x3g job file reader with movement tracking
//! - [`engine`]: monitor and poll threads

pub mod commands;
pub mod engine;
pub mod job;
pub mod opcodes;
pub mod packet;
pub mod session;

pub use commands::S3gCommand;
pub use engine::S3gEngine;
pub use job::{JobPacket, MoveInfo, S3gJobReader};
pub use opcodes::{lookup, packet_length, OpcodeInfo, PacketLength, OPCODES};
pub use packet::{crc8, encode_packet, PacketDecoder, ResponseCode};
pub use session::{S3gLink, SendOutcome};

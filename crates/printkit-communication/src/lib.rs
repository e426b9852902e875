//! # printkit Communication
//!
//! Hardware side of the printkit host: serial links, the Marlin ASCII and
//! S3G binary protocol engines, print job streaming, and the [`Printer`]
//! façade with its state monitor.

pub mod command;
pub mod communication;
pub mod engine;
pub mod job;
pub mod marlin;
pub mod printer;
pub mod s3g;

pub use command::{
    checksum, encode_numbered, CommandOrigin, CommandPayload, CommandStatus, OutboundCommand,
};

pub use communication::{
    is_garbage, list_ports, LineBuffer, LinkProvider, RealSerialPort, Responder,
    SerialLinkProvider, SerialPortInfo, Transport, VirtualLinkProvider, VirtualPort,
};

pub use engine::{create_engine, Engine, EngineRequest, StateCell};

pub use job::{GcodeFile, LayerTracker, PrintJob, ProgressThrottle, SelectedFile};

pub use marlin::MarlinEngine;
pub use printer::{Printer, PrinterSnapshot, StateMonitor};
pub use s3g::S3gEngine;

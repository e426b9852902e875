//! # printkit Core
//!
//! Core types, traits, and events for the printkit printer host.
//! Provides the printer state machine, print job model, error taxonomy,
//! configuration types and the listener interface the protocol engines
//! report through.

pub mod config;
pub mod core;
pub mod data;
pub mod error;
pub mod types;

pub use config::{
    BaudDetectionConfig, ConnectionConfig, DriverKind, EepromMap, FeedRates, HostConfig,
    PrinterProfile, SerialTimeouts, AUTO_PORT, DEFAULT_BAUD_CANDIDATES,
};

pub use crate::core::{
    event::{EventDispatcher, EventSink, MessageDirection, PrinterEvent},
    listener::{deliver, PrinterListener, PrinterListenerHandle},
};

pub use data::{
    AxisCalibration, Axis, CalibrationProfile, FailureReason, HeaterKind, JobOutcome, Position,
    PrintJobSnapshot, PrintJobState, PrinterState, Temperature, TemperatureReading,
    TemperatureSample,
};

pub use error::{
    ConfigError, ConnectionError, ControllerError, Error, JobError, ProtocolError, Result,
};

// Re-export type aliases for convenience
pub use types::{thread_safe_rw, thread_safe_rw_map, ThreadSafeRw, ThreadSafeRwMap};

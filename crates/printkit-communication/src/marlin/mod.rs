//! Marlin ASCII protocol
//!
//! - [`response`]: received-line parser
//! - [`interceptors`]: per-opcode host-side behavior for outbound GCODE
//! - [`history`]: numbered-line history for resend requests
//! - [`baud`]: baud rate autodetection
//! - [`protocol`]: line protocol state machine
//! - [`engine`]: monitor thread driving a transport

pub mod baud;
pub mod engine;
pub mod history;
pub mod interceptors;
pub mod protocol;
pub mod response;

pub use baud::{BaudDetector, BaudStep};
pub use engine::MarlinEngine;
pub use history::{LineHistory, PendingResend};
pub use interceptors::{format_number, Disposition, Effect, MachineModel, MarlinOpcode};
pub use protocol::{MarlinProtocol, PauseCapture};
pub use response::{parse_response, MarlinResponse};

//! Outbound command model
//!
//! A single instruction headed for the printer, its wire encoding and its
//! acknowledgement state. ASCII commands may carry a line number (encoded
//! with an XOR checksum); binary commands carry an S3G payload whose first
//! byte is the opcode.

use crate::s3g::packet;
use printkit_core::Result;

/// Status of an outbound command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    /// Waiting to be sent
    Queued,
    /// Written to the link
    Sent,
    /// Acknowledged by the printer
    Acknowledged,
}

/// Who produced a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOrigin {
    /// Line or packet from the job file
    Job,
    /// Manual command from the façade
    User,
    /// Command generated by the engine (pause/resume/cancel sequences, resets)
    System,
    /// Temperature poll or keep-alive probe
    Poll,
}

/// Command body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandPayload {
    /// One GCODE line without terminator
    Text(String),
    /// S3G payload, opcode first
    Binary(Vec<u8>),
}

/// One instruction headed for the printer
#[derive(Debug, Clone)]
pub struct OutboundCommand {
    payload: CommandPayload,
    line_number: Option<u32>,
    origin: CommandOrigin,
    status: CommandStatus,
    encoded: Option<Vec<u8>>,
}

impl OutboundCommand {
    /// Create a GCODE command
    pub fn text(command: impl Into<String>, origin: CommandOrigin) -> Self {
        Self {
            payload: CommandPayload::Text(command.into()),
            line_number: None,
            origin,
            status: CommandStatus::Queued,
            encoded: None,
        }
    }

    /// Create a binary command from an S3G payload
    pub fn binary(payload: Vec<u8>, origin: CommandOrigin) -> Self {
        Self {
            payload: CommandPayload::Binary(payload),
            line_number: None,
            origin,
            status: CommandStatus::Queued,
            encoded: None,
        }
    }

    /// Command body
    pub fn payload(&self) -> &CommandPayload {
        &self.payload
    }

    /// GCODE text, if this is an ASCII command
    pub fn as_text(&self) -> Option<&str> {
        match &self.payload {
            CommandPayload::Text(t) => Some(t),
            CommandPayload::Binary(_) => None,
        }
    }

    /// Opcode of a binary command
    pub fn opcode(&self) -> Option<u8> {
        match &self.payload {
            CommandPayload::Binary(b) => b.first().copied(),
            CommandPayload::Text(_) => None,
        }
    }

    /// Assigned line number
    pub fn line_number(&self) -> Option<u32> {
        self.line_number
    }

    /// Producer of the command
    pub fn origin(&self) -> CommandOrigin {
        self.origin
    }

    /// Current status
    pub fn status(&self) -> CommandStatus {
        self.status
    }

    /// Assign a line number; drops any cached encoding
    pub fn set_line_number(&mut self, line: u32) {
        self.line_number = Some(line);
        self.encoded = None;
    }

    /// Wire bytes, computed once and cached
    pub fn encode(&mut self) -> Result<&[u8]> {
        if self.encoded.is_none() {
            let bytes = match (&self.payload, self.line_number) {
                (CommandPayload::Text(t), Some(n)) => encode_numbered(n, t).into_bytes(),
                (CommandPayload::Text(t), None) => format!("{}\n", t).into_bytes(),
                (CommandPayload::Binary(b), _) => packet::encode_packet(b)?,
            };
            self.encoded = Some(bytes);
        }
        Ok(self.encoded.as_deref().unwrap_or_default())
    }

    /// Mark as written to the link
    pub fn mark_sent(&mut self) {
        self.status = CommandStatus::Sent;
    }

    /// Mark as acknowledged
    pub fn mark_acknowledged(&mut self) {
        self.status = CommandStatus::Acknowledged;
    }

    /// Check if the printer acknowledged the command
    pub fn is_acknowledged(&self) -> bool {
        self.status == CommandStatus::Acknowledged
    }
}

/// XOR of every byte of `text`
pub fn checksum(text: &str) -> u8 {
    text.bytes().fold(0u8, |acc, b| acc ^ b)
}

/// Encode a numbered line as `N<n> <cmd>*<cs>\n`
pub fn encode_numbered(line: u32, command: &str) -> String {
    let body = format!("N{} {}", line, command);
    let cs = checksum(&body);
    format!("{}*{}\n", body, cs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_known_values() {
        assert_eq!(checksum("N0 M110 N0"), 125);
        assert_eq!(encode_numbered(0, "M110 N0"), "N0 M110 N0*125\n");
    }

    #[test]
    fn test_text_encoding_cached() {
        let mut cmd = OutboundCommand::text("G28", CommandOrigin::Job);
        assert_eq!(cmd.encode().unwrap(), b"G28\n");
        cmd.set_line_number(1);
        let expected = format!("N1 G28*{}\n", checksum("N1 G28"));
        assert_eq!(cmd.encode().unwrap(), expected.as_bytes());
        assert_eq!(cmd.line_number(), Some(1));
    }

    #[test]
    fn test_binary_encoding_frames_payload() {
        let mut cmd = OutboundCommand::binary(vec![0x00, 0x28, 0x00], CommandOrigin::System);
        assert_eq!(cmd.opcode(), Some(0x00));
        let bytes = cmd.encode().unwrap().to_vec();
        assert_eq!(bytes[0], 0xD5);
        assert_eq!(bytes[1], 3);
        assert_eq!(bytes.len(), 6);
    }

    #[test]
    fn test_status_transitions() {
        let mut cmd = OutboundCommand::text("M105", CommandOrigin::Poll);
        assert_eq!(cmd.status(), CommandStatus::Queued);
        cmd.mark_sent();
        assert!(!cmd.is_acknowledged());
        cmd.mark_acknowledged();
        assert!(cmd.is_acknowledged());
    }
}

//! Link layer
//!
//! Both protocol engines talk to the printer through the [`Transport`]
//! trait and obtain links from a [`LinkProvider`]. The serial implementation
//! lives in [`serial`]; [`virtual_port`] provides in-memory links for
//! simulators and tests.

pub mod serial;
pub mod virtual_port;

pub use serial::{list_ports, RealSerialPort, SerialLinkProvider, SerialPortInfo};
pub use virtual_port::{Responder, VirtualLinkProvider, VirtualPort};

use printkit_core::Result;
use std::time::Duration;

/// Byte-oriented link to a printer
///
/// A transport only reports link-level success or failure; protocol
/// meaning is assigned by the engines.
pub trait Transport: Send {
    /// Port name the link was opened on
    fn name(&self) -> &str;

    /// Write the whole buffer, retrying short writes
    fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Read whatever is available, waiting at most `timeout`.
    ///
    /// Returns `Ok(0)` when nothing arrived in time.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Current baud rate
    fn baud_rate(&self) -> u32;

    /// Change the baud rate of an open link
    fn set_baud_rate(&mut self, baud: u32) -> Result<()>;

    /// Drop unread input
    fn clear_input(&mut self) -> Result<()> {
        Ok(())
    }

    /// Close the link
    fn close(&mut self) -> Result<()>;
}

/// Source of links: port enumeration plus opening
pub trait LinkProvider: Send + Sync {
    /// Ports a printer might be attached to
    fn list_ports(&self) -> Result<Vec<SerialPortInfo>>;

    /// Open a port at the given baud rate
    fn open(&self, port: &str, baud_rate: u32) -> Result<Box<dyn Transport>>;
}

/// Splits a byte stream into text lines
///
/// Lines end at `\n`; a trailing `\r` is dropped.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes
    pub fn push(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
    }

    /// Take the next complete line, if any
    pub fn next_line(&mut self) -> Option<String> {
        let pos = self.pending.iter().position(|b| *b == b'\n')?;
        let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Drop everything buffered
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Bytes waiting for a terminator
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Check if nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Check if received bytes look like a baud-rate mismatch
///
/// Anything outside printable ASCII, other than line terminators and tabs,
/// counts as garbage.
pub fn is_garbage(data: &[u8]) -> bool {
    data.iter()
        .any(|b| *b >= 0x80 || (*b < 0x20 && !matches!(*b, b'\r' | b'\n' | b'\t')))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_buffer_splits_and_trims() {
        let mut buf = LineBuffer::new();
        buf.push(b"ok T:20");
        assert_eq!(buf.next_line(), None);
        buf.push(b".0\r\nstart\nec");
        assert_eq!(buf.next_line().as_deref(), Some("ok T:20.0"));
        assert_eq!(buf.next_line().as_deref(), Some("start"));
        assert_eq!(buf.next_line(), None);
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_garbage_detection() {
        assert!(!is_garbage(b"ok T:210.0 /210.0\r\n"));
        assert!(is_garbage(&[0x00, 0xF8, 0x80]));
        assert!(is_garbage(b"ok\x07"));
    }
}

//! In-memory links
//!
//! A [`VirtualPort`] forwards everything the host writes to a [`Responder`]
//! and hands the responder's output back on the next read. Simulated
//! printers, the CLI's dry-run mode and the integration tests use it in
//! place of a serial device.

use super::{LinkProvider, SerialPortInfo, Transport};
use printkit_core::{ConnectionError, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Longest a read sleeps when no data is queued
const IDLE_SLICE: Duration = Duration::from_millis(2);

/// Device side of a virtual link
pub trait Responder: Send {
    /// Handle bytes written by the host; returns the device's answer
    fn on_write(&mut self, baud_rate: u32, data: &[u8]) -> Vec<u8>;

    /// Unsolicited output, checked on every read
    fn poll(&mut self, _baud_rate: u32) -> Vec<u8> {
        Vec::new()
    }

    /// A disconnected device fails reads and writes
    fn is_connected(&self) -> bool {
        true
    }
}

/// Transport backed by a [`Responder`]
pub struct VirtualPort {
    name: String,
    baud_rate: u32,
    responder: Box<dyn Responder>,
    inbound: VecDeque<u8>,
    closed: bool,
}

impl VirtualPort {
    /// Create a virtual port
    pub fn new(name: impl Into<String>, baud_rate: u32, responder: Box<dyn Responder>) -> Self {
        Self {
            name: name.into(),
            baud_rate,
            responder,
            inbound: VecDeque::new(),
            closed: false,
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(ConnectionError::Closed.into());
        }
        if !self.responder.is_connected() {
            return Err(ConnectionError::ConnectionLost {
                reason: format!("{} disconnected", self.name),
            }
            .into());
        }
        Ok(())
    }
}

impl Transport for VirtualPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.check_open()?;
        let answer = self.responder.on_write(self.baud_rate, data);
        self.inbound.extend(answer);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        self.check_open()?;
        if self.inbound.is_empty() {
            let unsolicited = self.responder.poll(self.baud_rate);
            self.inbound.extend(unsolicited);
        }
        if self.inbound.is_empty() {
            std::thread::sleep(timeout.min(IDLE_SLICE));
            return Ok(0);
        }
        let n = buf.len().min(self.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(self.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        self.check_open()?;
        self.baud_rate = baud;
        Ok(())
    }

    fn clear_input(&mut self) -> Result<()> {
        self.inbound.clear();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

type ResponderFactory = Arc<dyn Fn() -> Box<dyn Responder> + Send + Sync>;

/// Link provider serving virtual ports
///
/// Each registered port builds a fresh responder every time it is opened.
#[derive(Clone, Default)]
pub struct VirtualLinkProvider {
    ports: Vec<(SerialPortInfo, ResponderFactory)>,
}

impl VirtualLinkProvider {
    /// Create a provider with no ports
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: register a port
    pub fn with_port<F>(mut self, info: SerialPortInfo, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Responder> + Send + Sync + 'static,
    {
        self.ports.push((info, Arc::new(factory)));
        self
    }
}

impl LinkProvider for VirtualLinkProvider {
    fn list_ports(&self) -> Result<Vec<SerialPortInfo>> {
        Ok(self.ports.iter().map(|(info, _)| info.clone()).collect())
    }

    fn open(&self, port: &str, baud_rate: u32) -> Result<Box<dyn Transport>> {
        let (info, factory) = self
            .ports
            .iter()
            .find(|(info, _)| info.port_name == port)
            .ok_or_else(|| ConnectionError::PortNotFound {
                port: port.to_string(),
            })?;
        Ok(Box::new(VirtualPort::new(
            info.port_name.clone(),
            baud_rate,
            factory(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl Responder for Echo {
        fn on_write(&mut self, _baud_rate: u32, data: &[u8]) -> Vec<u8> {
            data.to_vec()
        }
    }

    #[test]
    fn test_virtual_port_echo() {
        let provider = VirtualLinkProvider::new()
            .with_port(SerialPortInfo::new("sim0", "echo"), || Box::new(Echo));
        let mut port = provider.open("sim0", 115200).unwrap();
        port.write_all(b"M105\n").unwrap();
        let mut buf = [0u8; 3];
        assert_eq!(port.read(&mut buf, Duration::from_millis(1)).unwrap(), 3);
        assert_eq!(&buf, b"M10");
        let mut rest = [0u8; 8];
        assert_eq!(port.read(&mut rest, Duration::from_millis(1)).unwrap(), 2);
        assert_eq!(port.read(&mut rest, Duration::from_millis(1)).unwrap(), 0);
    }

    #[test]
    fn test_unknown_port() {
        let provider = VirtualLinkProvider::new();
        assert!(provider.open("nope", 9600).is_err());
    }

    #[test]
    fn test_closed_port_fails() {
        let mut port = VirtualPort::new("sim0", 9600, Box::new(Echo));
        port.close().unwrap();
        assert!(port.write_all(b"x").is_err());
    }
}

//! Serial port communication implementation
//!
//! Provides low-level serial port operations for direct hardware connection
//! to printers via USB CDC or RS-232.
//!
//! Supports:
//! - Port enumeration and discovery
//! - Runtime baud rate changes (used by baud detection)
//! - Blocking reads with a per-call timeout
//! - Write retries on transient errors

use super::{LinkProvider, Transport};
use printkit_core::{ConnectionError, Error, Result};
use std::io::{self, Read, Write};
use std::time::Duration;

/// USB vendor id of MakerBot printers
pub const MAKERBOT_VID: u16 = 0x23C1;

/// Attempts for a write that fails with a transient error
const WRITE_RETRIES: u32 = 3;

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq)]
pub struct SerialPortInfo {
    /// Port name (e.g., "/dev/ttyACM0", "COM3")
    pub port_name: String,

    /// Port description (e.g., "USB Serial Port")
    pub description: String,

    /// Manufacturer name if available
    pub manufacturer: Option<String>,

    /// Serial number if available
    pub serial_number: Option<String>,

    /// USB vendor ID if applicable
    pub vid: Option<u16>,

    /// USB product ID if applicable
    pub pid: Option<u16>,
}

impl SerialPortInfo {
    /// Create a new port info
    pub fn new(port_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            description: description.into(),
            manufacturer: None,
            serial_number: None,
            vid: None,
            pid: None,
        }
    }

    /// Set manufacturer
    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    /// Set serial number
    pub fn with_serial_number(mut self, serial_number: impl Into<String>) -> Self {
        self.serial_number = Some(serial_number.into());
        self
    }

    /// Set USB IDs
    pub fn with_usb_ids(mut self, vid: u16, pid: u16) -> Self {
        self.vid = Some(vid);
        self.pid = Some(pid);
        self
    }

    /// Check if the USB vendor id belongs to MakerBot
    pub fn is_makerbot(&self) -> bool {
        self.vid == Some(MAKERBOT_VID)
    }
}

/// List available serial ports on the system
///
/// Filters ports to include only patterns printers enumerate as:
/// - Windows: COM* (e.g., COM1, COM3)
/// - Linux: /dev/ttyUSB*, /dev/ttyACM*
/// - macOS: /dev/cu.usbserial-*, /dev/cu.usbmodem*
pub fn list_ports() -> Result<Vec<SerialPortInfo>> {
    match serialport::available_ports() {
        Ok(ports) => {
            let port_infos: Vec<SerialPortInfo> = ports
                .iter()
                .filter(|port| is_valid_printer_port(&port.port_name))
                .map(|port| {
                    let info = SerialPortInfo::new(&port.port_name, get_port_description(port));

                    match &port.port_type {
                        serialport::SerialPortType::UsbPort(usb_info) => {
                            let mut info = info.with_usb_ids(usb_info.vid, usb_info.pid);
                            if let Some(ref mfg) = usb_info.manufacturer {
                                info = info.with_manufacturer(mfg);
                            }
                            if let Some(ref serial) = usb_info.serial_number {
                                info = info.with_serial_number(serial);
                            }
                            info
                        }
                        _ => info,
                    }
                })
                .collect();

            Ok(port_infos)
        }
        Err(e) => {
            tracing::error!("Failed to enumerate serial ports: {}", e);
            Err(ConnectionError::SerialError {
                reason: format!("Failed to enumerate ports: {}", e),
            }
            .into())
        }
    }
}

/// Check if a port name matches printer port patterns
fn is_valid_printer_port(port_name: &str) -> bool {
    if let Some(number) = port_name.strip_prefix("COM") {
        return !number.is_empty() && number.chars().all(|c| c.is_ascii_digit());
    }

    if port_name.starts_with("/dev/ttyUSB") || port_name.starts_with("/dev/ttyACM") {
        return true;
    }

    port_name.starts_with("/dev/cu.usbserial-") || port_name.starts_with("/dev/cu.usbmodem")
}

/// Get a user-friendly description for a port
fn get_port_description(port: &serialport::SerialPortInfo) -> String {
    match &port.port_type {
        serialport::SerialPortType::UsbPort(usb_info) => {
            format!(
                "USB {} {}",
                usb_info.manufacturer.as_deref().unwrap_or("Device"),
                usb_info.product.as_deref().unwrap_or("Serial Port")
            )
        }
        serialport::SerialPortType::BluetoothPort => "Bluetooth Serial".to_string(),
        serialport::SerialPortType::PciPort => "PCI Serial".to_string(),
        _ => "Serial Port".to_string(),
    }
}

fn serial_error(e: impl std::fmt::Display) -> Error {
    ConnectionError::SerialError {
        reason: e.to_string(),
    }
    .into()
}

/// Real serial port implementation using serialport crate
pub struct RealSerialPort {
    name: String,
    baud_rate: u32,
    timeout: Duration,
    port: Option<Box<dyn serialport::SerialPort>>,
}

impl RealSerialPort {
    /// Open a serial port at the given baud rate (8N1, no flow control)
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self> {
        if baud_rate == 0 {
            return Err(ConnectionError::UnsupportedBaudRate { baud: baud_rate }.into());
        }

        let timeout = Duration::from_millis(10);
        let builder = serialport::new(port_name, baud_rate)
            .timeout(timeout)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(serialport::FlowControl::None);

        match builder.open() {
            Ok(port) => {
                tracing::debug!("Opened {} @ {}", port_name, baud_rate);
                Ok(RealSerialPort {
                    name: port_name.to_string(),
                    baud_rate,
                    timeout,
                    port: Some(port),
                })
            }
            Err(e) => {
                tracing::warn!("Failed to open serial port {}: {}", port_name, e);
                Err(ConnectionError::FailedToOpen {
                    port: port_name.to_string(),
                    reason: e.to_string(),
                }
                .into())
            }
        }
    }

    fn port(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>> {
        self.port.as_mut().ok_or_else(|| ConnectionError::Closed.into())
    }
}

impl Transport for RealSerialPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let port = self.port()?;
        let mut written = 0;
        let mut failures = 0;
        while written < data.len() {
            match port.write(&data[written..]) {
                Ok(0) => {
                    return Err(ConnectionError::ConnectionLost {
                        reason: "write returned zero bytes".to_string(),
                    }
                    .into())
                }
                Ok(n) => written += n,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut
                            | io::ErrorKind::Interrupted
                            | io::ErrorKind::WouldBlock
                    ) && failures < WRITE_RETRIES =>
                {
                    failures += 1;
                    tracing::debug!("Serial write retry {}/{}: {}", failures, WRITE_RETRIES, e);
                }
                Err(e) => {
                    return Err(ConnectionError::ConnectionLost {
                        reason: e.to_string(),
                    }
                    .into())
                }
            }
        }
        port.flush().map_err(serial_error)
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if timeout != self.timeout {
            self.timeout = timeout;
            self.port()?.set_timeout(timeout).map_err(serial_error)?;
        }
        match self.port()?.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                Ok(0)
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(0),
            Err(e) => Err(ConnectionError::ConnectionLost {
                reason: e.to_string(),
            }
            .into()),
        }
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        self.port()?.set_baud_rate(baud).map_err(serial_error)?;
        self.baud_rate = baud;
        Ok(())
    }

    fn clear_input(&mut self) -> Result<()> {
        self.port()?
            .clear(serialport::ClearBuffer::Input)
            .map_err(serial_error)
    }

    fn close(&mut self) -> Result<()> {
        if self.port.take().is_some() {
            tracing::debug!("Closed {}", self.name);
        }
        Ok(())
    }
}

/// Link provider backed by the operating system's serial ports
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialLinkProvider;

impl LinkProvider for SerialLinkProvider {
    fn list_ports(&self) -> Result<Vec<SerialPortInfo>> {
        list_ports()
    }

    fn open(&self, port: &str, baud_rate: u32) -> Result<Box<dyn Transport>> {
        Ok(Box::new(RealSerialPort::open(port, baud_rate)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_printer_port_patterns() {
        assert!(is_valid_printer_port("COM3"));
        assert!(is_valid_printer_port("/dev/ttyACM0"));
        assert!(is_valid_printer_port("/dev/cu.usbmodem1411"));
        assert!(!is_valid_printer_port("COM"));
        assert!(!is_valid_printer_port("/dev/ttyS0"));
    }

    #[test]
    fn test_makerbot_vid() {
        let info = SerialPortInfo::new("/dev/ttyACM0", "Replicator 2").with_usb_ids(0x23C1, 0xB015);
        assert!(info.is_makerbot());
        assert!(!SerialPortInfo::new("/dev/ttyUSB0", "CH340").is_makerbot());
    }

    #[test]
    fn test_open_rejects_zero_baud() {
        let err = RealSerialPort::open("/dev/ttyACM99", 0).err().unwrap();
        assert!(err.is_connection_error());
    }
}

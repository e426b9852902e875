//! Request/response exchange with an S3G printer
//!
//! Every packet the host sends is answered by exactly one response packet.
//! [`S3gLink`] frames payloads, waits for the answer and applies the retry
//! rules: transmission errors are retried up to a budget, buffer overflows
//! are retried with backoff for as long as it takes.

use super::commands::{tool_query, Reader, S3gCommand};
use super::packet::{check_response, encode_packet, PacketDecoder};
use crate::communication::Transport;
use printkit_core::{CalibrationProfile, EepromMap, Error, ProtocolError, Result, Temperature};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Host protocol version announced in `GET_VERSION`
pub const HOST_VERSION: u16 = 100;

/// Outcome of a single send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Printer accepted the packet; response data after the code
    Accepted(Vec<u8>),
    /// Printer buffer is full; the same bytes must be sent again later
    Overflow,
}

/// Framed link to an S3G printer
pub struct S3gLink {
    transport: Box<dyn Transport>,
    decoder: PacketDecoder,
    leftover: Vec<u8>,
    retries: u32,
    backoff: Duration,
    read_timeout: Duration,
    cancel: Option<Arc<AtomicBool>>,
}

impl S3gLink {
    /// Wrap an open transport
    pub fn new(
        transport: Box<dyn Transport>,
        retries: u32,
        backoff: Duration,
        read_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            decoder: PacketDecoder::new(),
            leftover: Vec::new(),
            retries,
            backoff,
            read_timeout,
            cancel: None,
        }
    }

    /// Stop overflow retries in [`transact`](Self::transact) once `flag` is set
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Port name of the underlying transport
    pub fn name(&self) -> &str {
        self.transport.name()
    }

    /// Send one payload, retrying transmission errors
    ///
    /// Link errors and printer rejections are returned as they are; buffer
    /// overflow is reported as [`SendOutcome::Overflow`].
    pub fn send(&mut self, payload: &[u8]) -> Result<SendOutcome> {
        let opcode = payload.first().copied().unwrap_or_default();
        let packet = encode_packet(payload)?;
        let attempts = self.retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            if attempt > 1 {
                std::thread::sleep(self.backoff);
                self.decoder.reset();
                self.leftover.clear();
                self.transport.clear_input()?;
            }
            tracing::trace!("> opcode 0x{:02X} ({} bytes)", opcode, payload.len());
            self.transport.write_all(&packet)?;

            let result = match self.read_response() {
                Ok(response) => check_response(&response, opcode).map(|data| data.to_vec()),
                Err(e) => Err(e),
            };
            match result {
                Ok(data) => return Ok(SendOutcome::Accepted(data)),
                Err(Error::Protocol(ProtocolError::BufferOverflow)) => {
                    return Ok(SendOutcome::Overflow)
                }
                Err(e) if e.is_transient() => {
                    tracing::debug!(
                        "Opcode 0x{:02X} attempt {}/{} failed: {}",
                        opcode,
                        attempt,
                        attempts,
                        e
                    );
                    last_error = e.to_string();
                }
                Err(e) => return Err(e),
            }
        }

        tracing::warn!("Opcode 0x{:02X} failed {} times", opcode, attempts);
        Err(ProtocolError::RetriesExhausted {
            attempts,
            reason: last_error,
        }
        .into())
    }

    /// Send one payload and wait out buffer overflows
    ///
    /// Returns [`ProtocolError::BufferOverflow`] only when the cancel flag is
    /// raised while waiting.
    pub fn transact(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        loop {
            match self.send(payload)? {
                SendOutcome::Accepted(data) => return Ok(data),
                SendOutcome::Overflow => {
                    if self
                        .cancel
                        .as_ref()
                        .is_some_and(|c| c.load(Ordering::Acquire))
                    {
                        return Err(ProtocolError::BufferOverflow.into());
                    }
                    std::thread::sleep(self.backoff);
                }
            }
        }
    }

    /// Encode and send a command
    pub fn command(&mut self, command: &S3gCommand) -> Result<Vec<u8>> {
        self.transact(&command.encode()?)
    }

    fn read_response(&mut self) -> Result<Vec<u8>> {
        let deadline = Instant::now() + self.read_timeout;
        let mut pending = std::mem::take(&mut self.leftover);
        let mut buf = [0u8; 64];
        loop {
            for (i, byte) in pending.iter().enumerate() {
                if let Some(payload) = self.decoder.push(*byte)? {
                    self.leftover = pending[i + 1..].to_vec();
                    return Ok(payload);
                }
            }
            let now = Instant::now();
            if now >= deadline {
                self.decoder.reset();
                return Err(ProtocolError::Transmission {
                    reason: format!("no response within {}ms", self.read_timeout.as_millis()),
                }
                .into());
            }
            let n = self.transport.read(&mut buf, deadline - now)?;
            pending = buf[..n].to_vec();
        }
    }

    /// Firmware version handshake
    pub fn get_version(&mut self) -> Result<u16> {
        let data = self.command(&S3gCommand::GetVersion {
            host_version: HOST_VERSION,
        })?;
        Reader::new(&data).u16()
    }

    /// Read `length` EEPROM bytes at `offset`
    pub fn read_eeprom(&mut self, offset: u16, length: u8) -> Result<Vec<u8>> {
        let data = self.command(&S3gCommand::ReadFromEeprom { offset, length })?;
        if data.len() < length as usize {
            return Err(ProtocolError::MalformedPacket {
                reason: format!("EEPROM read returned {} of {} bytes", data.len(), length),
            }
            .into());
        }
        Ok(data)
    }

    /// Override `calibration` with the axis tables stored in EEPROM
    pub fn load_calibration(
        &mut self,
        calibration: &mut CalibrationProfile,
        map: &EepromMap,
    ) -> Result<()> {
        let lengths = self.read_axis_table(map.axis_lengths_mm)?;
        let steps = self.read_axis_table(map.axis_steps_per_mm)?;
        let lengths_mm: Vec<f64> = lengths.iter().map(|v| *v as f64).collect();
        let steps_per_mm: Vec<f64> = steps
            .iter()
            .map(|v| *v as f64 / map.steps_per_mm_scale)
            .collect();
        tracing::debug!(
            "EEPROM calibration: lengths {:?} mm, steps {:?} /mm",
            lengths_mm,
            steps_per_mm
        );
        calibration.merge_lengths_mm(&lengths_mm);
        calibration.merge_steps_per_mm(&steps_per_mm);
        Ok(())
    }

    fn read_axis_table(&mut self, offset: u16) -> Result<[u32; 5]> {
        let data = self.read_eeprom(offset, 20)?;
        let mut reader = Reader::new(&data);
        let mut values = [0u32; 5];
        for v in values.iter_mut() {
            *v = reader.u32()?;
        }
        Ok(values)
    }

    fn query_u16(&mut self, tool: u8, code: u8) -> Result<u16> {
        let data = self.command(&S3gCommand::ToolQuery { tool, code })?;
        Reader::new(&data).u16()
    }

    /// Current and target temperature of a toolhead
    pub fn tool_temperature(&mut self, tool: u8) -> Result<Temperature> {
        let actual = self.query_u16(tool, tool_query::GET_TOOLHEAD_TEMP)?;
        let target = self.query_u16(tool, tool_query::GET_TOOLHEAD_TARGET_TEMP)?;
        Ok(Temperature::new(actual as f64, target as f64))
    }

    /// Current and target temperature of the platform
    pub fn platform_temperature(&mut self) -> Result<Temperature> {
        let actual = self.query_u16(0, tool_query::GET_PLATFORM_TEMP)?;
        let target = self.query_u16(0, tool_query::GET_PLATFORM_TARGET_TEMP)?;
        Ok(Temperature::new(actual as f64, target as f64))
    }

    /// Close the link
    pub fn close(&mut self) -> Result<()> {
        self.transport.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::{Responder, VirtualPort};
    use std::collections::VecDeque;

    /// Answers each write with the next canned frame
    struct Scripted {
        frames: VecDeque<Vec<u8>>,
    }

    impl Responder for Scripted {
        fn on_write(&mut self, _baud_rate: u32, _data: &[u8]) -> Vec<u8> {
            self.frames.pop_front().unwrap_or_default()
        }
    }

    fn link(frames: Vec<Vec<u8>>, retries: u32) -> S3gLink {
        let responder = Scripted {
            frames: frames.into(),
        };
        let port = VirtualPort::new("sim", 115200, Box::new(responder));
        S3gLink::new(
            Box::new(port),
            retries,
            Duration::from_millis(1),
            Duration::from_millis(20),
        )
    }

    fn ok(data: &[u8]) -> Vec<u8> {
        let mut payload = vec![0x81];
        payload.extend_from_slice(data);
        encode_packet(&payload).unwrap()
    }

    #[test]
    fn test_overflow_is_retried_until_accepted() {
        let overflow = encode_packet(&[0x82]).unwrap();
        let mut link = link(vec![overflow.clone(), overflow, ok(&[])], 3);
        assert_eq!(link.transact(&[0x08]).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_send_reports_overflow() {
        let mut link = link(vec![encode_packet(&[0x82]).unwrap()], 3);
        assert_eq!(link.send(&[0x08]).unwrap(), SendOutcome::Overflow);
    }

    #[test]
    fn test_transmission_errors_exhaust_budget() {
        let mut bad = ok(&[]);
        *bad.last_mut().unwrap() ^= 0x55;
        let mut link = link(vec![bad.clone(), bad.clone(), bad], 3);
        match link.transact(&[0x0B]) {
            Err(Error::Protocol(ProtocolError::RetriesExhausted { attempts, .. })) => {
                assert_eq!(attempts, 3)
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_silence_is_retried() {
        let mut link = link(vec![Vec::new(), ok(&[0x2C, 0x02])], 2);
        assert_eq!(link.get_version().unwrap(), 556);
    }

    #[test]
    fn test_rejection_is_not_retried() {
        let mut link = link(vec![encode_packet(&[0x85]).unwrap(), ok(&[])], 5);
        assert!(matches!(
            link.transact(&[0x99]),
            Err(Error::Protocol(ProtocolError::CommandRejected { opcode: 0x99, .. }))
        ));
    }

    #[test]
    fn test_cancel_flag_stops_overflow_wait() {
        let flag = Arc::new(AtomicBool::new(true));
        let overflow = encode_packet(&[0x82]).unwrap();
        let mut link = link(vec![overflow], 3).with_cancel_flag(flag);
        assert!(matches!(
            link.transact(&[0x8A]),
            Err(Error::Protocol(ProtocolError::BufferOverflow))
        ));
    }

    #[test]
    fn test_load_calibration_from_eeprom() {
        let mut lengths = Vec::new();
        for v in [227u32, 148, 150, 0, 0] {
            lengths.extend_from_slice(&v.to_le_bytes());
        }
        let mut steps = Vec::new();
        for v in [94_139_704u32, 94_139_704, 400_000_000, 96_275_202, 0] {
            steps.extend_from_slice(&v.to_le_bytes());
        }
        let mut link = link(vec![ok(&lengths), ok(&steps)], 1);
        let mut calibration = CalibrationProfile::default();
        link.load_calibration(&mut calibration, &EepromMap::default())
            .unwrap();
        assert_eq!(calibration.x().platform_length_mm, 227.0);
        assert_eq!(calibration.z().platform_length_mm, 150.0);
        assert!((calibration.x().steps_per_mm - 94.139704).abs() < 1e-9);
        assert_eq!(calibration.z().steps_per_mm, 400.0);
        assert_eq!(
            calibration.axes[4].steps_per_mm,
            CalibrationProfile::default().axes[4].steps_per_mm
        );
    }

    #[test]
    fn test_temperature_queries() {
        let mut link = link(vec![ok(&[210, 0]), ok(&[220, 0])], 1);
        assert_eq!(link.tool_temperature(0).unwrap(), Temperature::new(210.0, 220.0));
    }
}

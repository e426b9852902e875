//! S3G packet framing
//!
//! Every packet is `0xD5, len, payload[len], crc8(payload)` with at most 32
//! payload bytes. Response payloads start with a response code.

use printkit_core::{ProtocolError, Result};

/// Start-of-packet marker
pub const PACKET_HEADER: u8 = 0xD5;

/// Largest payload a packet may carry
pub const MAX_PAYLOAD: usize = 32;

/// Maxim/iButton CRC-8 (reflected polynomial 0x8C, initial value 0)
pub fn crc8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |mut crc, byte| {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x01 != 0 {
                (crc >> 1) ^ 0x8C
            } else {
                crc >> 1
            };
        }
        crc
    })
}

/// Frame a payload
pub fn encode_packet(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.is_empty() || payload.len() > MAX_PAYLOAD {
        return Err(ProtocolError::MalformedPacket {
            reason: format!("payload length {} outside 1..={}", payload.len(), MAX_PAYLOAD),
        }
        .into());
    }
    let mut packet = Vec::with_capacity(payload.len() + 3);
    packet.push(PACKET_HEADER);
    packet.push(payload.len() as u8);
    packet.extend_from_slice(payload);
    packet.push(crc8(payload));
    Ok(packet)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    WaitHeader,
    Length,
    Payload,
    Crc,
}

/// Streaming packet decoder
///
/// Bytes before a header are skipped. A bad length or CRC resets the
/// decoder and reports a transmission error.
#[derive(Debug, Clone)]
pub struct PacketDecoder {
    state: DecodeState,
    expected: usize,
    payload: Vec<u8>,
}

impl Default for PacketDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketDecoder {
    /// Create a decoder waiting for a header
    pub fn new() -> Self {
        Self {
            state: DecodeState::WaitHeader,
            expected: 0,
            payload: Vec::with_capacity(MAX_PAYLOAD),
        }
    }

    /// Drop any partial packet
    pub fn reset(&mut self) {
        self.state = DecodeState::WaitHeader;
        self.expected = 0;
        self.payload.clear();
    }

    /// Feed one byte; returns the payload when a packet completes
    pub fn push(&mut self, byte: u8) -> Result<Option<Vec<u8>>> {
        match self.state {
            DecodeState::WaitHeader => {
                if byte == PACKET_HEADER {
                    self.state = DecodeState::Length;
                } else {
                    tracing::trace!("Skipping stray byte 0x{:02X}", byte);
                }
            }
            DecodeState::Length => {
                let len = byte as usize;
                if len > MAX_PAYLOAD {
                    self.reset();
                    return Err(ProtocolError::Transmission {
                        reason: format!("packet length {} too large", len),
                    }
                    .into());
                }
                self.expected = len;
                self.payload.clear();
                self.state = if len == 0 {
                    DecodeState::Crc
                } else {
                    DecodeState::Payload
                };
            }
            DecodeState::Payload => {
                self.payload.push(byte);
                if self.payload.len() == self.expected {
                    self.state = DecodeState::Crc;
                }
            }
            DecodeState::Crc => {
                let expected = crc8(&self.payload);
                let payload = std::mem::take(&mut self.payload);
                self.reset();
                if byte != expected {
                    return Err(ProtocolError::Transmission {
                        reason: format!(
                            "crc mismatch (got 0x{:02X}, expected 0x{:02X})",
                            byte, expected
                        ),
                    }
                    .into());
                }
                return Ok(Some(payload));
            }
        }
        Ok(None)
    }
}

/// Response codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseCode {
    /// Generic packet error
    GenericError = 0x80,
    /// Success
    Success = 0x81,
    /// Command buffer full
    BufferOverflow = 0x82,
    /// Packet CRC mismatch
    CrcMismatch = 0x83,
    /// Query too big
    QueryTooBig = 0x84,
    /// Command not supported
    NotSupported = 0x85,
    /// Downstream timeout
    DownstreamTimeout = 0x87,
    /// Tool lock timeout
    ToolLockTimeout = 0x88,
    /// Build cancelled
    CancelBuild = 0x89,
    /// Printer is running a build from its own storage
    ActiveLocalBuild = 0x8A,
    /// Printer overheated
    Overheat = 0x8B,
}

impl ResponseCode {
    /// Decode a response code byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0x80 => Self::GenericError,
            0x81 => Self::Success,
            0x82 => Self::BufferOverflow,
            0x83 => Self::CrcMismatch,
            0x84 => Self::QueryTooBig,
            0x85 => Self::NotSupported,
            0x87 => Self::DownstreamTimeout,
            0x88 => Self::ToolLockTimeout,
            0x89 => Self::CancelBuild,
            0x8A => Self::ActiveLocalBuild,
            0x8B => Self::Overheat,
            _ => return None,
        })
    }

    /// Map to the error taxonomy; `opcode` names the rejected command
    pub fn into_result(self, opcode: u8) -> std::result::Result<(), ProtocolError> {
        let rejected = |reason: &str| ProtocolError::CommandRejected {
            opcode,
            reason: reason.to_string(),
        };
        match self {
            Self::Success => Ok(()),
            Self::BufferOverflow => Err(ProtocolError::BufferOverflow),
            Self::GenericError => Err(ProtocolError::Transmission {
                reason: "generic packet error".to_string(),
            }),
            Self::CrcMismatch => Err(ProtocolError::Transmission {
                reason: "printer reported crc mismatch".to_string(),
            }),
            Self::DownstreamTimeout => Err(ProtocolError::Transmission {
                reason: "downstream timeout".to_string(),
            }),
            Self::QueryTooBig => Err(rejected("query too big")),
            Self::NotSupported => Err(rejected("not supported")),
            Self::ToolLockTimeout => Err(rejected("tool lock timeout")),
            Self::ActiveLocalBuild => Err(rejected("printer is running a local build")),
            Self::Overheat => Err(rejected("printer overheated")),
            Self::CancelBuild => Err(ProtocolError::CancelBuild),
        }
    }
}

/// Check a response payload; returns the data after the response code
pub fn check_response(payload: &[u8], opcode: u8) -> Result<&[u8]> {
    let (&code, data) = payload.split_first().ok_or(ProtocolError::MalformedPacket {
        reason: "empty response".to_string(),
    })?;
    let code = ResponseCode::from_byte(code).ok_or(ProtocolError::UnknownResponse { code })?;
    code.into_result(opcode)?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use printkit_core::Error;

    #[test]
    fn test_crc8_check_value() {
        assert_eq!(crc8(b"123456789"), 0xA1);
        assert_eq!(crc8(&[]), 0);
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        assert!(encode_packet(&[0u8; 33]).is_err());
        assert!(encode_packet(&[]).is_err());
        let packet = encode_packet(&[0x0B]).unwrap();
        assert_eq!(packet, vec![0xD5, 1, 0x0B, crc8(&[0x0B])]);
    }

    #[test]
    fn test_decoder_skips_noise_and_decodes() {
        let mut decoder = PacketDecoder::new();
        let mut stream = vec![0x00, 0x42];
        stream.extend(encode_packet(&[0x81, 0x01, 0x02]).unwrap());
        let mut out = None;
        for b in stream {
            if let Some(p) = decoder.push(b).unwrap() {
                out = Some(p);
            }
        }
        assert_eq!(out, Some(vec![0x81, 0x01, 0x02]));
    }

    #[test]
    fn test_decoder_reports_crc_mismatch() {
        let mut decoder = PacketDecoder::new();
        let mut packet = encode_packet(&[0x81]).unwrap();
        *packet.last_mut().unwrap() ^= 0xFF;
        let results: Vec<_> = packet.into_iter().map(|b| decoder.push(b)).collect();
        assert!(matches!(
            results.last(),
            Some(Err(Error::Protocol(ProtocolError::Transmission { .. })))
        ));
    }

    #[test]
    fn test_response_mapping() {
        assert_eq!(check_response(&[0x81, 7], 0).unwrap(), &[7]);
        assert!(matches!(
            check_response(&[0x82], 139),
            Err(Error::Protocol(ProtocolError::BufferOverflow))
        ));
        assert!(matches!(
            check_response(&[0x89], 139),
            Err(Error::Protocol(ProtocolError::CancelBuild))
        ));
        assert!(matches!(
            check_response(&[0x85], 139),
            Err(Error::Protocol(ProtocolError::CommandRejected { opcode: 139, .. }))
        ));
        assert!(matches!(
            check_response(&[0x99], 0),
            Err(Error::Protocol(ProtocolError::UnknownResponse { code: 0x99 }))
        ));
    }
}

//! Marlin Response Parser
//!
//! Tokenizes lines received from Marlin-style firmware into
//! [`MarlinResponse`] values: acknowledgements, resend requests, errors,
//! busy notices, temperature reports and position reports.

use printkit_core::{Position, Temperature, TemperatureReading};
use std::fmt;

/// Error texts that precede a resend request
const RECOVERABLE_ERRORS: [&str; 6] = [
    "checksum mismatch",
    "line number is not last line number",
    "no checksum",
    "no line number",
    "expected line",
    "wrong checksum",
];

/// Marlin response types
#[derive(Debug, Clone, PartialEq)]
pub enum MarlinResponse {
    /// Acknowledgement, optionally carrying temperatures
    Ok {
        /// Temperatures reported on the same line
        temperatures: Option<TemperatureReading>,
    },
    /// Request to resend from a line number
    Resend {
        /// First line to resend
        line: u32,
    },
    /// Error reported by the firmware
    Error {
        /// Text after the `Error:` prefix
        message: String,
        /// Transmission complaint that a resend will fix
        recoverable: bool,
    },
    /// Firmware is busy (long move, heating)
    Busy,
    /// Unsolicited temperature report
    Temperature(TemperatureReading),
    /// Position report (`M114`)
    Position(Position),
    /// Firmware (re)started
    Start,
    /// Blank line
    Empty,
    /// Anything else (echo lines, banners)
    Unknown(String),
}

impl fmt::Display for MarlinResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok { .. } => write!(f, "ok"),
            Self::Resend { line } => write!(f, "resend:{}", line),
            Self::Error { message, .. } => write!(f, "error:{}", message),
            Self::Busy => write!(f, "busy"),
            Self::Temperature(_) => write!(f, "temperature"),
            Self::Position(p) => write!(f, "position:{}", p),
            Self::Start => write!(f, "start"),
            Self::Empty => write!(f, "empty"),
            Self::Unknown(raw) => write!(f, "unknown:{}", raw),
        }
    }
}

impl MarlinResponse {
    /// Check if the line carries temperature values
    pub fn temperatures(&self) -> Option<&TemperatureReading> {
        match self {
            Self::Ok {
                temperatures: Some(t),
            } => Some(t),
            Self::Temperature(t) => Some(t),
            _ => None,
        }
    }
}

/// Parse one received line
///
/// `active_tool` receives a bare `T:` value when the line has no `T<n>:`
/// entries.
pub fn parse_response(line: &str, active_tool: u8) -> MarlinResponse {
    let line = line.trim();
    if line.is_empty() {
        return MarlinResponse::Empty;
    }
    let lower = line.to_ascii_lowercase();

    if lower == "ok" || lower.starts_with("ok ") {
        return MarlinResponse::Ok {
            temperatures: parse_temperatures(&line[2..], active_tool),
        };
    }

    if let Some(n) = parse_resend(&lower) {
        return MarlinResponse::Resend { line: n };
    }

    if let Some(rest) = lower.strip_prefix("error:") {
        let message = line[line.len() - rest.len()..].trim().to_string();
        let recoverable = is_recoverable_error(rest);
        return MarlinResponse::Error {
            message,
            recoverable,
        };
    }
    if let Some(rest) = line.strip_prefix("!!") {
        return MarlinResponse::Error {
            message: rest.trim().to_string(),
            recoverable: false,
        };
    }

    if lower.starts_with("echo:busy") || lower.starts_with("busy:") || lower == "wait" {
        return MarlinResponse::Busy;
    }

    if lower == "start" {
        return MarlinResponse::Start;
    }

    if lower.starts_with("x:") {
        if let Some(position) = parse_position(line) {
            return MarlinResponse::Position(position);
        }
    }

    if lower.starts_with("t:") || lower.starts_with("t0:") || lower.starts_with("b:") {
        if let Some(reading) = parse_temperatures(line, active_tool) {
            return MarlinResponse::Temperature(reading);
        }
    }

    MarlinResponse::Unknown(line.to_string())
}

/// Check if an error text is a transmission complaint
pub fn is_recoverable_error(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    RECOVERABLE_ERRORS.iter().any(|e| lower.contains(e))
}

/// Parse `Resend: 5`, `Resend:N5` or `rs 5` (lowercased input)
fn parse_resend(lower: &str) -> Option<u32> {
    let rest = lower
        .strip_prefix("resend")
        .or_else(|| lower.strip_prefix("rs "))?;
    let rest = rest.trim_start_matches([':', ' ']);
    let rest = rest.strip_prefix('n').unwrap_or(rest);
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Extract temperatures from a report such as `T:210.0 /210.0 B:60.0 /60.0 @:0`
pub fn parse_temperatures(text: &str, active_tool: u8) -> Option<TemperatureReading> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let mut reading = TemperatureReading::default();
    let mut bare_tool = None;

    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i];
        i += 1;
        let Some((key, value)) = token.split_once(':') else {
            continue;
        };
        let (actual, mut target) = match value.split_once('/') {
            Some((a, t)) => (a, Some(t)),
            None => (value, None),
        };
        if target.is_none() {
            if let Some(next) = tokens.get(i).and_then(|t| t.strip_prefix('/')) {
                target = Some(next);
                i += 1;
            }
        }
        let Ok(actual) = actual.parse::<f64>() else {
            continue;
        };
        let temp = Temperature {
            actual: Some(actual),
            target: target.and_then(|t| t.parse().ok()),
        };
        match key {
            "T" => bare_tool = Some(temp),
            "B" => reading.bed = Some(temp),
            k if k.len() > 1 && k.starts_with('T') => {
                if let Ok(tool) = k[1..].parse::<u8>() {
                    reading.tools.insert(tool, temp);
                }
            }
            _ => {}
        }
    }

    if let Some(temp) = bare_tool {
        reading.tools.entry(active_tool).or_insert(temp);
    }
    if reading.is_empty() {
        None
    } else {
        Some(reading)
    }
}

/// Extract XYZE from an `M114` report; stepper counts after `Count` are ignored
pub fn parse_position(text: &str) -> Option<Position> {
    let text = match text.find("Count") {
        Some(pos) => &text[..pos],
        None => text,
    };
    let mut values: [Option<f64>; 4] = [None; 4];
    let bytes = text.as_bytes();
    let mut i = 0;
    while i + 1 < bytes.len() {
        let slot = match bytes[i] {
            b'X' => Some(0),
            b'Y' => Some(1),
            b'Z' => Some(2),
            b'E' => Some(3),
            _ => None,
        };
        if let (Some(slot), b':') = (slot, bytes[i + 1]) {
            let start = i + 2;
            let mut end = start;
            while end < bytes.len()
                && (bytes[end].is_ascii_digit() || matches!(bytes[end], b'.' | b'-' | b'+'))
            {
                end += 1;
            }
            values[slot] = text[start..end].parse().ok();
            i = end;
        } else {
            i += 1;
        }
    }
    match values {
        [Some(x), Some(y), Some(z), e] => Some(Position::new(x, y, z, e.unwrap_or(0.0))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ok() {
        assert_eq!(
            parse_response("ok", 0),
            MarlinResponse::Ok { temperatures: None }
        );
        let MarlinResponse::Ok {
            temperatures: Some(t),
        } = parse_response("ok T:210.5 /210.0 B:60.1 /60.0 @:64 B@:0", 0)
        else {
            panic!("expected ok with temperatures");
        };
        assert_eq!(t.tools[&0], Temperature::new(210.5, 210.0));
        assert_eq!(t.bed, Some(Temperature::new(60.1, 60.0)));
    }

    #[test]
    fn test_parse_resend_variants() {
        assert_eq!(parse_response("Resend: 5", 0), MarlinResponse::Resend { line: 5 });
        assert_eq!(parse_response("Resend:N12", 0), MarlinResponse::Resend { line: 12 });
        assert_eq!(parse_response("rs 7", 0), MarlinResponse::Resend { line: 7 });
        assert_eq!(parse_response("rs N8", 0), MarlinResponse::Resend { line: 8 });
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            parse_response("Error:checksum mismatch, Last Line: 4", 0),
            MarlinResponse::Error {
                message: "checksum mismatch, Last Line: 4".to_string(),
                recoverable: true
            }
        );
        assert!(matches!(
            parse_response("Error:Printer halted. kill() called!", 0),
            MarlinResponse::Error {
                recoverable: false,
                ..
            }
        ));
        assert!(matches!(
            parse_response("!! MINTEMP", 0),
            MarlinResponse::Error {
                recoverable: false,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_busy_and_start() {
        assert_eq!(parse_response("echo:busy: processing", 0), MarlinResponse::Busy);
        assert_eq!(parse_response("start", 0), MarlinResponse::Start);
        assert_eq!(parse_response("  ", 0), MarlinResponse::Empty);
    }

    #[test]
    fn test_bare_t_maps_to_active_tool() {
        let MarlinResponse::Temperature(t) = parse_response("T:200.3 E:1 W:?", 1) else {
            panic!("expected temperature");
        };
        assert_eq!(t.tools[&1].actual, Some(200.3));
        assert_eq!(t.tools[&1].target, None);
    }

    #[test]
    fn test_explicit_tools_win_over_bare_t() {
        let reading = parse_temperatures("T:200.0 /200.0 T0:200.0 /200.0 T1:180.0 /185.0", 1).unwrap();
        assert_eq!(reading.tools[&1], Temperature::new(180.0, 185.0));
        assert_eq!(reading.tools.len(), 2);
    }

    #[test]
    fn test_parse_position() {
        assert_eq!(
            parse_response("X:10.00 Y:20.50 Z:0.30 E:1.25 Count X:800 Y:1640 Z:120", 0),
            MarlinResponse::Position(Position::new(10.0, 20.5, 0.3, 1.25))
        );
        assert_eq!(
            parse_position("X:1.0Y:2.0Z:3.0E:-0.5"),
            Some(Position::new(1.0, 2.0, 3.0, -0.5))
        );
        assert_eq!(parse_position("X:1.0"), None);
    }

    #[test]
    fn test_unknown_lines() {
        assert!(matches!(
            parse_response("echo:Unknown command: \"G999\"", 0),
            MarlinResponse::Unknown(_)
        ));
    }
}

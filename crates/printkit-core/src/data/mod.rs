//! Data models for printer state, positions and temperatures
//!
//! This module provides:
//! - The printer connection/operation state machine (`PrinterState`)
//! - Axis and XYZE position types
//! - Heater identifiers and last-known-value temperature samples
//! - Print job snapshots and outcomes
//! - Per-axis calibration read from binary-protocol printers

pub mod calibration;
pub mod job;

pub use calibration::{AxisCalibration, CalibrationProfile};
pub use job::{FailureReason, JobOutcome, PrintJobSnapshot, PrintJobState};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Printer connection and operation state
///
/// Exactly one value is active per connection. Every transition is
/// published downstream as a state-changed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PrinterState {
    /// No connection attempted yet
    #[default]
    None,
    /// Opening the serial/USB link
    OpeningLink,
    /// Probing candidate ports for a printer
    DetectingLink,
    /// Probing baud rates on an open link
    DetectingBaud,
    /// Link open, waiting for the printer to answer
    Connecting,
    /// Connected and idle, ready for commands
    Operational,
    /// Streaming a print job
    Printing,
    /// Print job paused
    Paused,
    /// Closed on request
    Closed,
    /// Failed before or while establishing the link
    Error,
    /// An established link failed
    ClosedWithError,
}

impl PrinterState {
    /// Ready to accept manual commands
    pub fn is_operational(&self) -> bool {
        matches!(
            self,
            PrinterState::Operational | PrinterState::Printing | PrinterState::Paused
        )
    }

    /// A print job exists in this state
    pub fn is_printing_or_paused(&self) -> bool {
        matches!(self, PrinterState::Printing | PrinterState::Paused)
    }

    /// Still establishing the link
    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            PrinterState::OpeningLink
                | PrinterState::DetectingLink
                | PrinterState::DetectingBaud
                | PrinterState::Connecting
        )
    }

    /// No live link in this state
    pub fn is_closed_or_error(&self) -> bool {
        matches!(
            self,
            PrinterState::None
                | PrinterState::Closed
                | PrinterState::Error
                | PrinterState::ClosedWithError
        )
    }

    /// Check if this state indicates an error condition
    pub fn is_error(&self) -> bool {
        matches!(self, PrinterState::Error | PrinterState::ClosedWithError)
    }

    /// Check if a transition from this state to `target` is valid.
    ///
    /// - Any state may fail or close
    /// - Link setup only moves forward through the detection states
    /// - Printing and Paused are reachable only from an operational state
    pub fn can_transition_to(&self, target: PrinterState) -> bool {
        use PrinterState::*;
        if *self == target {
            return true;
        }
        match (self, target) {
            (_, Closed | Error | ClosedWithError) => true,
            (None | Closed | Error | ClosedWithError, OpeningLink) => true,
            (OpeningLink, DetectingLink | DetectingBaud | Connecting) => true,
            (DetectingLink, DetectingBaud | Connecting | Operational) => true,
            (DetectingBaud, Connecting | Operational) => true,
            (Connecting, Operational) => true,
            (Operational, Printing) => true,
            (Printing, Paused | Operational) => true,
            (Paused, Printing | Operational) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PrinterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "None",
            Self::OpeningLink => "Opening serial port",
            Self::DetectingLink => "Detecting serial port",
            Self::DetectingBaud => "Detecting baudrate",
            Self::Connecting => "Connecting",
            Self::Operational => "Operational",
            Self::Printing => "Printing",
            Self::Paused => "Paused",
            Self::Closed => "Closed",
            Self::Error => "Error",
            Self::ClosedWithError => "Closed with error",
        };
        write!(f, "{}", name)
    }
}

/// Motion axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Axis {
    /// X axis
    X,
    /// Y axis
    Y,
    /// Z axis
    Z,
    /// Extruder axis
    E,
}

impl Axis {
    /// GCODE letter for this axis
    pub fn letter(&self) -> char {
        match self {
            Axis::X => 'X',
            Axis::Y => 'Y',
            Axis::Z => 'Z',
            Axis::E => 'E',
        }
    }

    /// Parse an axis letter (case-insensitive)
    pub fn from_letter(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'X' => Some(Axis::X),
            'Y' => Some(Axis::Y),
            'Z' => Some(Axis::Z),
            'E' => Some(Axis::E),
            _ => None,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// Toolhead position including the extruder coordinate
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// X-axis position (mm)
    pub x: f64,
    /// Y-axis position (mm)
    pub y: f64,
    /// Z-axis position (mm)
    pub z: f64,
    /// Extruder position (mm of filament)
    pub e: f64,
}

impl Position {
    /// Create a new position
    pub fn new(x: f64, y: f64, z: f64, e: f64) -> Self {
        Self { x, y, z, e }
    }

    /// Get one axis
    pub fn get(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
            Axis::E => self.e,
        }
    }

    /// Set one axis
    pub fn set(&mut self, axis: Axis, value: f64) {
        match axis {
            Axis::X => self.x = value,
            Axis::Y => self.y = value,
            Axis::Z => self.z = value,
            Axis::E => self.e = value,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "X:{:.3} Y:{:.3} Z:{:.3} E:{:.3}",
            self.x, self.y, self.z, self.e
        )
    }
}

/// Heater addressed by a temperature command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HeaterKind {
    /// Nozzle heater of the given tool
    Tool(u8),
    /// Heated bed / build platform
    Bed,
}

impl fmt::Display for HeaterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaterKind::Tool(t) => write!(f, "tool{}", t),
            HeaterKind::Bed => write!(f, "bed"),
        }
    }
}

/// Actual and target temperature of one heater
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Temperature {
    /// Measured temperature (°C)
    pub actual: Option<f64>,
    /// Target temperature (°C)
    pub target: Option<f64>,
}

impl Temperature {
    /// Create a fully known temperature
    pub fn new(actual: f64, target: f64) -> Self {
        Self {
            actual: Some(actual),
            target: Some(target),
        }
    }

    /// Overwrite the fields present in `other`
    pub fn merge(&mut self, other: &Temperature) {
        if other.actual.is_some() {
            self.actual = other.actual;
        }
        if other.target.is_some() {
            self.target = other.target;
        }
    }
}

/// Temperature reading extracted from one response
///
/// Only the heaters and fields present in the response are set.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TemperatureReading {
    /// Per-tool values
    pub tools: BTreeMap<u8, Temperature>,
    /// Bed value
    pub bed: Option<Temperature>,
}

impl TemperatureReading {
    /// Check if the reading carries any value
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty() && self.bed.is_none()
    }
}

/// Last-known temperatures of every heater
///
/// A partial reading updates only the fields it carries.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TemperatureSample {
    /// Per-tool values keyed by tool index
    pub tools: BTreeMap<u8, Temperature>,
    /// Bed value, if the printer has one
    pub bed: Option<Temperature>,
}

impl TemperatureSample {
    /// Merge a partial reading into the sample
    pub fn apply(&mut self, reading: &TemperatureReading) {
        for (tool, temp) in &reading.tools {
            self.tools.entry(*tool).or_default().merge(temp);
        }
        if let Some(bed) = &reading.bed {
            self.bed.get_or_insert_with(Temperature::default).merge(bed);
        }
    }

    /// Update one target
    pub fn set_target(&mut self, heater: HeaterKind, celsius: f64) {
        match heater {
            HeaterKind::Tool(t) => self.tools.entry(t).or_default().target = Some(celsius),
            HeaterKind::Bed => {
                self.bed.get_or_insert_with(Temperature::default).target = Some(celsius)
            }
        }
    }

    /// Look up one heater
    pub fn get(&self, heater: HeaterKind) -> Option<&Temperature> {
        match heater {
            HeaterKind::Tool(t) => self.tools.get(&t),
            HeaterKind::Bed => self.bed.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_reading_keeps_other_fields() {
        let mut sample = TemperatureSample::default();
        sample.set_target(HeaterKind::Tool(0), 210.0);
        sample.set_target(HeaterKind::Bed, 60.0);

        let mut reading = TemperatureReading::default();
        reading.tools.insert(
            0,
            Temperature {
                actual: Some(25.5),
                target: None,
            },
        );
        sample.apply(&reading);

        let tool = sample.get(HeaterKind::Tool(0)).unwrap();
        assert_eq!(tool.actual, Some(25.5));
        assert_eq!(tool.target, Some(210.0));
        assert_eq!(sample.bed.unwrap().target, Some(60.0));
        assert_eq!(sample.bed.unwrap().actual, None);
    }

    #[test]
    fn test_state_transitions() {
        use PrinterState::*;
        assert!(None.can_transition_to(OpeningLink));
        assert!(OpeningLink.can_transition_to(DetectingBaud));
        assert!(Operational.can_transition_to(Printing));
        assert!(Printing.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Printing));
        assert!(Printing.can_transition_to(ClosedWithError));
        assert!(!None.can_transition_to(Printing));
        assert!(!Connecting.can_transition_to(Paused));
    }

    #[test]
    fn test_state_predicates() {
        assert!(PrinterState::Paused.is_operational());
        assert!(PrinterState::Paused.is_printing_or_paused());
        assert!(!PrinterState::Connecting.is_operational());
        assert!(PrinterState::DetectingBaud.is_connecting());
        assert!(PrinterState::ClosedWithError.is_error());
    }
}

//! Connection and printer profile configuration
//!
//! The host application owns persistence; this module only defines the
//! values the protocol core consumes and how to load them from TOML or JSON.
//! Every struct has defaults so partial files are accepted.

use crate::data::CalibrationProfile;
use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Port name that triggers autodetection
pub const AUTO_PORT: &str = "AUTO";

/// Default baud candidates, fastest first
pub const DEFAULT_BAUD_CANDIDATES: [u32; 7] = [250000, 230400, 115200, 57600, 38400, 19200, 9600];

/// Protocol driver selected at connect time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// ASCII GCODE with line numbers and checksums
    #[default]
    Marlin,
    /// MakerBot binary protocol
    S3g,
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Marlin => write!(f, "marlin"),
            Self::S3g => write!(f, "s3g"),
        }
    }
}

impl std::str::FromStr for DriverKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "marlin" | "gcode" => Ok(DriverKind::Marlin),
            "s3g" | "x3g" | "makerbot" => Ok(DriverKind::S3g),
            other => Err(ConfigError::InvalidValue {
                field: "driver".to_string(),
                reason: format!("unknown driver '{}'", other),
            }),
        }
    }
}

/// Serial timeouts in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialTimeouts {
    /// Time allowed for the printer to answer after the link opens
    pub connect_ms: u64,
    /// Read timeout of one blocking read
    pub read_ms: u64,
    /// Interval between temperature polls
    pub temperature_poll_ms: u64,
    /// Interval between SD status polls
    pub sd_status_ms: u64,
    /// Silence while printing that counts as link loss
    pub link_loss_ms: u64,
}

impl SerialTimeouts {
    /// Connect timeout
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    /// Read timeout
    pub fn read(&self) -> Duration {
        Duration::from_millis(self.read_ms)
    }

    /// Temperature poll interval
    pub fn temperature_poll(&self) -> Duration {
        Duration::from_millis(self.temperature_poll_ms)
    }

    /// Link loss timeout
    pub fn link_loss(&self) -> Duration {
        Duration::from_millis(self.link_loss_ms)
    }
}

impl Default for SerialTimeouts {
    fn default() -> Self {
        Self {
            connect_ms: 10_000,
            read_ms: 2_000,
            temperature_poll_ms: 5_000,
            sd_status_ms: 1_000,
            link_loss_ms: 30_000,
        }
    }
}

/// Baud rate autodetection parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaudDetectionConfig {
    /// Candidates tried in order
    pub candidates: Vec<u32>,
    /// Consecutive temperature-bearing answers required to accept a candidate
    pub required_acks: u32,
    /// Read timeouts tolerated per candidate before moving on
    pub timeouts_per_candidate: u32,
}

impl Default for BaudDetectionConfig {
    fn default() -> Self {
        Self {
            candidates: DEFAULT_BAUD_CANDIDATES.to_vec(),
            required_acks: 3,
            timeouts_per_candidate: 2,
        }
    }
}

/// Parameters of one connection attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Port name, or `AUTO`
    pub port: String,
    /// Baud rate; 0 autodetects (ASCII only)
    pub baud_rate: u32,
    /// Protocol driver
    pub driver: DriverKind,
    /// Serial timeouts
    pub timeouts: SerialTimeouts,
    /// Numbered lines kept for resend requests
    pub resend_history: usize,
    /// Baud autodetection parameters
    pub baud_detection: BaudDetectionConfig,
    /// Reopen attempts after link loss while printing
    pub reconnect_attempts: u32,
    /// `ok` responses after a heating command that end the heating wait
    pub heatup_ok_count: u32,
    /// Retries for binary transmission errors
    pub transmission_retries: u32,
    /// Backoff between binary retries in milliseconds
    pub retry_backoff_ms: u64,
}

impl ConnectionConfig {
    /// Config for a specific port and baud rate
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Builder: set the driver
    pub fn with_driver(mut self, driver: DriverKind) -> Self {
        self.driver = driver;
        self
    }

    /// Check if the port should be autodetected
    pub fn is_auto_port(&self) -> bool {
        self.port.eq_ignore_ascii_case(AUTO_PORT)
    }

    /// Check if the baud rate should be autodetected
    pub fn is_auto_baud(&self) -> bool {
        self.baud_rate == 0
    }

    /// Backoff between binary retries
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Check values that would make the engines misbehave
    pub fn validate(&self) -> Result<()> {
        if self.resend_history == 0 {
            return Err(invalid("resend_history", "must be at least 1"));
        }
        if self.baud_detection.candidates.is_empty() {
            return Err(invalid("baud_detection.candidates", "must not be empty"));
        }
        if self.baud_detection.required_acks == 0 {
            return Err(invalid("baud_detection.required_acks", "must be at least 1"));
        }
        if self.timeouts.read_ms == 0 {
            return Err(invalid("timeouts.read_ms", "must be positive"));
        }
        if self.driver == DriverKind::S3g && self.is_auto_baud() {
            return Err(invalid(
                "baud_rate",
                "autodetection is only available for the marlin driver",
            ));
        }
        Ok(())
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port: AUTO_PORT.to_string(),
            baud_rate: 115200,
            driver: DriverKind::Marlin,
            timeouts: SerialTimeouts::default(),
            resend_history: 100,
            baud_detection: BaudDetectionConfig::default(),
            reconnect_attempts: 1,
            heatup_ok_count: 1,
            transmission_retries: 5,
            retry_backoff_ms: 100,
        }
    }
}

/// Axis feed rates in mm/min
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedRates {
    /// X axis
    pub x: f64,
    /// Y axis
    pub y: f64,
    /// Z axis
    pub z: f64,
    /// Extruder
    pub e: f64,
}

impl Default for FeedRates {
    fn default() -> Self {
        Self {
            x: 3000.0,
            y: 3000.0,
            z: 200.0,
            e: 300.0,
        }
    }
}

/// EEPROM locations of the calibration tables (binary protocol)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EepromMap {
    /// Offset of five little-endian u32 axis lengths in mm
    pub axis_lengths_mm: u16,
    /// Offset of five little-endian u32 steps-per-mm values
    pub axis_steps_per_mm: u16,
    /// Divisor applied to the stored steps-per-mm values
    pub steps_per_mm_scale: f64,
}

impl Default for EepromMap {
    fn default() -> Self {
        Self {
            axis_lengths_mm: 0x018C,
            axis_steps_per_mm: 0x01A0,
            steps_per_mm_scale: 1_000_000.0,
        }
    }
}

/// Printer profile numbers supplied by the host application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrinterProfile {
    /// Number of extruders
    pub extruder_count: u8,
    /// XY offset of each extruder relative to tool 0
    pub extruder_offsets: Vec<(f64, f64)>,
    /// Printer has a heated bed
    pub heated_bed: bool,
    /// Jog and move feed rates
    pub feed_rates: FeedRates,
    /// Highest nozzle temperature accepted
    pub max_nozzle_temp: f64,
    /// Highest bed temperature accepted
    pub max_bed_temp: f64,
    /// Static calibration, overridden by EEPROM values on binary printers
    pub calibration: CalibrationProfile,
    /// EEPROM calibration offsets
    pub eeprom: EepromMap,
    /// Filament retracted on pause (mm, 0 disables)
    pub pause_retraction_mm: f64,
    /// Z lift on pause (mm, 0 disables)
    pub pause_lift_mm: f64,
    /// Z lift before homing on cancel (mm)
    pub cancel_lift_mm: f64,
    /// Fraction of the XY feed rate used for the first move after resume
    pub resume_feed_factor: f64,
}

impl PrinterProfile {
    /// Clamp a requested temperature to the profile ceiling
    pub fn clamp_temperature(&self, heater: crate::data::HeaterKind, celsius: f64) -> f64 {
        let ceiling = match heater {
            crate::data::HeaterKind::Tool(_) => self.max_nozzle_temp,
            crate::data::HeaterKind::Bed => self.max_bed_temp,
        };
        celsius.clamp(0.0, ceiling)
    }

    /// XY offset of a tool
    pub fn extruder_offset(&self, tool: u8) -> (f64, f64) {
        self.extruder_offsets
            .get(tool as usize)
            .copied()
            .unwrap_or((0.0, 0.0))
    }

    /// Check values that would make the engines misbehave
    pub fn validate(&self) -> Result<()> {
        if self.extruder_count == 0 {
            return Err(invalid("extruder_count", "must be at least 1"));
        }
        if self.max_nozzle_temp <= 0.0 {
            return Err(invalid("max_nozzle_temp", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.resume_feed_factor) || self.resume_feed_factor == 0.0 {
            return Err(invalid("resume_feed_factor", "must be in (0, 1]"));
        }
        Ok(())
    }
}

impl Default for PrinterProfile {
    fn default() -> Self {
        Self {
            extruder_count: 1,
            extruder_offsets: vec![(0.0, 0.0)],
            heated_bed: true,
            feed_rates: FeedRates::default(),
            max_nozzle_temp: 280.0,
            max_bed_temp: 120.0,
            calibration: CalibrationProfile::default(),
            eeprom: EepromMap::default(),
            pause_retraction_mm: 0.0,
            pause_lift_mm: 0.0,
            cancel_lift_mm: 5.0,
            resume_feed_factor: 0.5,
        }
    }
}

/// Everything needed to bring up one printer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Connection parameters
    pub connection: ConnectionConfig,
    /// Printer profile
    pub profile: PrinterProfile,
}

impl HostConfig {
    /// Parse a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: HostConfig = toml::from_str(text).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON document
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: HostConfig = serde_json::from_str(text).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.toml` or `.json` file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&text),
            _ => Self::from_toml_str(&text),
        }
    }

    /// Serialize to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| {
            ConfigError::Parse {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Validate both sections
    pub fn validate(&self) -> Result<()> {
        self.connection.validate()?;
        self.profile.validate()
    }
}

fn invalid(field: &str, reason: &str) -> crate::error::Error {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::HeaterKind;

    #[test]
    fn test_defaults_are_valid() {
        assert!(HostConfig::default().validate().is_ok());
        assert_eq!(ConnectionConfig::default().resend_history, 100);
        assert_eq!(
            ConnectionConfig::default().baud_detection.candidates[0],
            250000
        );
    }

    #[test]
    fn test_partial_toml() {
        let config = HostConfig::from_toml_str(
            r#"
            [connection]
            port = "/dev/ttyACM0"
            baud_rate = 0

            [connection.timeouts]
            read_ms = 500

            [profile]
            max_nozzle_temp = 250.0
            "#,
        )
        .unwrap();
        assert_eq!(config.connection.port, "/dev/ttyACM0");
        assert!(config.connection.is_auto_baud());
        assert_eq!(config.connection.timeouts.read_ms, 500);
        assert_eq!(config.connection.timeouts.connect_ms, 10_000);
        assert_eq!(config.profile.max_nozzle_temp, 250.0);
        assert_eq!(config.profile.extruder_count, 1);
    }

    #[test]
    fn test_s3g_rejects_auto_baud() {
        let mut config = ConnectionConfig::new("/dev/ttyACM0", 0);
        config.driver = DriverKind::S3g;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_clamp_temperature() {
        let profile = PrinterProfile::default();
        assert_eq!(profile.clamp_temperature(HeaterKind::Tool(0), 400.0), 280.0);
        assert_eq!(profile.clamp_temperature(HeaterKind::Bed, 60.0), 60.0);
        assert_eq!(profile.clamp_temperature(HeaterKind::Bed, -5.0), 0.0);
    }

    #[test]
    fn test_driver_from_str() {
        assert_eq!("x3g".parse::<DriverKind>().unwrap(), DriverKind::S3g);
        assert_eq!("Marlin".parse::<DriverKind>().unwrap(), DriverKind::Marlin);
        assert!("grbl".parse::<DriverKind>().is_err());
    }
}

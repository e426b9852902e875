//! Per-axis calibration for binary-protocol printers
//!
//! Values ship with the printer profile and are overridden at connect time by
//! the numbers stored in the printer's EEPROM.

use serde::{Deserialize, Serialize};

/// Number of axes addressed by the binary protocol (X, Y, Z, A, B)
pub const CALIBRATED_AXES: usize = 5;

/// Calibration of one axis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisCalibration {
    /// Motor steps per millimetre of travel
    pub steps_per_mm: f64,
    /// Usable travel of the axis in millimetres
    pub platform_length_mm: f64,
}

impl AxisCalibration {
    /// Create a calibration entry
    pub fn new(steps_per_mm: f64, platform_length_mm: f64) -> Self {
        Self {
            steps_per_mm,
            platform_length_mm,
        }
    }

    /// Convert a step count to millimetres
    pub fn steps_to_mm(&self, steps: i64) -> f64 {
        if self.steps_per_mm == 0.0 {
            return 0.0;
        }
        steps as f64 / self.steps_per_mm
    }

    /// Convert millimetres to the nearest step count
    pub fn mm_to_steps(&self, mm: f64) -> i32 {
        (mm * self.steps_per_mm).round() as i32
    }

    /// Step position of the far end of the axis
    pub fn max_steps(&self) -> i32 {
        self.mm_to_steps(self.platform_length_mm)
    }
}

/// Calibration for X, Y, Z, A and B
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationProfile {
    /// Axes in protocol order
    pub axes: [AxisCalibration; CALIBRATED_AXES],
}

impl CalibrationProfile {
    /// X axis
    pub fn x(&self) -> &AxisCalibration {
        &self.axes[0]
    }

    /// Y axis
    pub fn y(&self) -> &AxisCalibration {
        &self.axes[1]
    }

    /// Z axis
    pub fn z(&self) -> &AxisCalibration {
        &self.axes[2]
    }

    /// Extruder of the given tool (A for tool 0, B for tool 1)
    pub fn extruder(&self, tool: u8) -> &AxisCalibration {
        if tool == 0 {
            &self.axes[3]
        } else {
            &self.axes[4]
        }
    }

    /// Replace steps-per-mm values read from the printer; zero entries are ignored
    pub fn merge_steps_per_mm(&mut self, values: &[f64]) {
        for (axis, value) in self.axes.iter_mut().zip(values) {
            if *value > 0.0 {
                axis.steps_per_mm = *value;
            }
        }
    }

    /// Replace axis lengths read from the printer; zero entries are ignored
    pub fn merge_lengths_mm(&mut self, values: &[f64]) {
        for (axis, value) in self.axes.iter_mut().zip(values) {
            if *value > 0.0 {
                axis.platform_length_mm = *value;
            }
        }
    }
}

impl Default for CalibrationProfile {
    /// MakerBot Replicator 2 factory values
    fn default() -> Self {
        Self {
            axes: [
                AxisCalibration::new(88.573186, 285.0),
                AxisCalibration::new(88.573186, 152.0),
                AxisCalibration::new(400.0, 155.0),
                AxisCalibration::new(96.275201870333662468889989185642, 100_000.0),
                AxisCalibration::new(96.275201870333662468889989185642, 100_000.0),
            ],
        }
    }
}

//! Print job streaming shared by both protocol engines
//!
//! - [`PrintJob`]: lifecycle (`Idle → Running ⇄ Paused → terminal`), file
//!   position and layer bookkeeping
//! - [`LayerTracker`]: layer detection from Z height and extrusion
//! - [`ProgressThrottle`]: rate limit for progress reports
//! - [`GcodeFile`]: line source for ASCII jobs

pub mod gcode_file;

pub use gcode_file::GcodeFile;

use chrono::Utc;
use printkit_core::{
    JobError, JobOutcome, PrintJobSnapshot, PrintJobState, PrinterEvent, Result,
};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Heights closer than this count as the same layer (mm)
const LAYER_EPSILON_MM: f64 = 0.001;

/// File chosen for printing but not necessarily started
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedFile {
    /// Path of the job file
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
}

impl SelectedFile {
    /// Stat a file for selection
    pub fn from_path(path: &Path) -> Result<Self> {
        let meta = std::fs::metadata(path).map_err(|e| JobError::FileError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        if !meta.is_file() {
            return Err(JobError::FileError {
                path: path.display().to_string(),
                reason: "not a regular file".to_string(),
            }
            .into());
        }
        Ok(Self {
            path: path.to_path_buf(),
            size: meta.len(),
        })
    }
}

/// Layer detection
///
/// A layer starts when material is extruded at a Z above the last recorded
/// layer height. The layer number only ever grows, by one per crossing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayerTracker {
    layer: u32,
    height_mm: f64,
    last_z: Option<f64>,
}

impl LayerTracker {
    /// Create a tracker at layer 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Current layer
    pub fn layer(&self) -> u32 {
        self.layer
    }

    /// Height of the current layer
    pub fn height_mm(&self) -> f64 {
        self.height_mm
    }

    /// Record a move; returns the new `(layer, height)` when a layer starts
    pub fn observe(&mut self, z: f64, extruding: bool) -> Option<(u32, f64)> {
        self.last_z = Some(z);
        if !extruding {
            return None;
        }
        if z > self.height_mm + LAYER_EPSILON_MM {
            self.layer += 1;
            self.height_mm = z;
            return Some((self.layer, z));
        }
        None
    }

    /// Last Z passed to [`observe`](Self::observe)
    pub fn last_z(&self) -> Option<f64> {
        self.last_z
    }
}

/// Rate limit for progress reports
///
/// Reports at most once per interval, and only when the whole-percent value
/// changed.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    interval: Duration,
    last_sent: Option<Instant>,
    last_percent: Option<u8>,
}

impl ProgressThrottle {
    /// Create a throttle with the given minimum interval
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: None,
            last_percent: None,
        }
    }

    /// Check if `percent` should be reported now; records it if so
    pub fn should_report(&mut self, percent: u8, now: Instant) -> bool {
        if self.last_percent == Some(percent) {
            return false;
        }
        if let Some(last) = self.last_sent {
            if now.duration_since(last) < self.interval {
                return false;
            }
        }
        self.last_sent = Some(now);
        self.last_percent = Some(percent);
        true
    }
}

/// One print job
#[derive(Debug, Clone)]
pub struct PrintJob {
    snapshot: PrintJobSnapshot,
    layers: LayerTracker,
    started: Option<Instant>,
}

impl PrintJob {
    /// Create an idle job for a selected file
    pub fn new(file: &SelectedFile) -> Self {
        Self {
            snapshot: PrintJobSnapshot {
                file_path: file.path.clone(),
                file_size: file.size,
                file_position: 0,
                start_time: None,
                current_layer: 0,
                last_layer_height_mm: 0.0,
                state: PrintJobState::Idle,
            },
            layers: LayerTracker::new(),
            started: None,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> PrintJobState {
        self.snapshot.state
    }

    /// Copy of the job's public view
    pub fn snapshot(&self) -> PrintJobSnapshot {
        self.snapshot.clone()
    }

    fn transition(&mut self, to: PrintJobState) -> Result<()> {
        let from = self.snapshot.state;
        if !from.can_transition_to(to) {
            return Err(JobError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            }
            .into());
        }
        tracing::debug!("Job {} -> {}", from, to);
        self.snapshot.state = to;
        Ok(())
    }

    /// Begin streaming; returns the `JobStarted` event
    pub fn start(&mut self) -> Result<PrinterEvent> {
        self.transition(PrintJobState::Running)?;
        self.snapshot.start_time = Some(Utc::now());
        self.started = Some(Instant::now());
        Ok(PrinterEvent::JobStarted(self.snapshot.clone()))
    }

    /// Suspend streaming
    pub fn pause(&mut self) -> Result<()> {
        self.transition(PrintJobState::Paused)
    }

    /// Continue streaming
    pub fn resume(&mut self) -> Result<()> {
        self.transition(PrintJobState::Running)
    }

    /// Check if lines should be streamed
    pub fn is_running(&self) -> bool {
        self.snapshot.state == PrintJobState::Running
    }

    /// Reach a terminal state; returns the `JobFinished` event
    pub fn finish(&mut self, outcome: JobOutcome) -> Result<PrinterEvent> {
        self.transition(outcome.state())?;
        let elapsed = self.started.map(|s| s.elapsed()).unwrap_or_default();
        tracing::info!(
            "Job {} {} after {:.1}s",
            self.snapshot.file_path.display(),
            outcome,
            elapsed.as_secs_f64()
        );
        Ok(PrinterEvent::JobFinished {
            outcome,
            elapsed,
            layers: self.layers.layer(),
        })
    }

    /// Record the number of bytes consumed; returns the progress event
    pub fn advance(&mut self, file_position: u64) -> PrinterEvent {
        self.snapshot.file_position = file_position.min(self.snapshot.file_size);
        PrinterEvent::Progress {
            file_position: self.snapshot.file_position,
            file_size: self.snapshot.file_size,
            percent: self.snapshot.percent(),
        }
    }

    /// Progress as a whole percentage
    pub fn percent(&self) -> u8 {
        self.snapshot.percent().floor() as u8
    }

    /// Feed a move into layer detection; returns a layer event on a new layer
    pub fn observe_move(&mut self, z: f64, extruding: bool) -> Option<PrinterEvent> {
        let (layer, height_mm) = self.layers.observe(z, extruding)?;
        self.snapshot.current_layer = layer;
        self.snapshot.last_layer_height_mm = height_mm;
        tracing::debug!("Layer {} at {:.3}mm", layer, height_mm);
        Some(PrinterEvent::LayerChanged { layer, height_mm })
    }

    /// Current layer
    pub fn current_layer(&self) -> u32 {
        self.layers.layer()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> PrintJob {
        PrintJob::new(&SelectedFile {
            path: PathBuf::from("cube.gcode"),
            size: 1000,
        })
    }

    #[test]
    fn test_layer_tracker_monotonic() {
        let mut tracker = LayerTracker::new();
        assert_eq!(tracker.observe(0.2, false), None);
        assert_eq!(tracker.observe(0.2, true), Some((1, 0.2)));
        assert_eq!(tracker.observe(0.2, true), None);
        assert_eq!(tracker.observe(5.0, false), None);
        assert_eq!(tracker.observe(0.4, true), Some((2, 0.4)));
        assert_eq!(tracker.observe(0.3, true), None);
        assert_eq!(tracker.layer(), 2);
        assert_eq!(tracker.last_z(), Some(0.3));
    }

    #[test]
    fn test_progress_throttle() {
        let mut throttle = ProgressThrottle::new(Duration::from_secs(1));
        let t0 = Instant::now();
        assert!(throttle.should_report(1, t0));
        assert!(!throttle.should_report(2, t0 + Duration::from_millis(500)));
        assert!(!throttle.should_report(1, t0 + Duration::from_secs(2)));
        assert!(throttle.should_report(2, t0 + Duration::from_secs(2)));
    }

    #[test]
    fn test_job_lifecycle() {
        let mut job = job();
        assert!(job.pause().is_err());
        assert!(matches!(job.start().unwrap(), PrinterEvent::JobStarted(_)));
        job.pause().unwrap();
        assert!(!job.is_running());
        job.resume().unwrap();
        job.observe_move(0.2, true);
        match job.finish(JobOutcome::Completed).unwrap() {
            PrinterEvent::JobFinished { outcome, layers, .. } => {
                assert_eq!(outcome, JobOutcome::Completed);
                assert_eq!(layers, 1);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(job.finish(JobOutcome::Cancelled).is_err());
    }

    #[test]
    fn test_advance_clamps() {
        let mut job = job();
        job.start().unwrap();
        assert_eq!(
            job.advance(250),
            PrinterEvent::Progress {
                file_position: 250,
                file_size: 1000,
                percent: 25.0
            }
        );
        job.advance(5000);
        assert_eq!(job.percent(), 100);
    }
}

//! Print job lifecycle types shared by both protocol engines

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Lifecycle state of a print job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PrintJobState {
    /// No job streaming
    #[default]
    Idle,
    /// Streaming commands
    Running,
    /// Streaming suspended
    Paused,
    /// End of file reached cleanly
    Completed,
    /// Unrecoverable error
    Failed,
    /// Cancelled by the user or the printer
    Cancelled,
}

impl PrintJobState {
    /// Check if the job has finished
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PrintJobState::Completed | PrintJobState::Failed | PrintJobState::Cancelled
        )
    }

    /// Check if the job is running or paused
    pub fn is_active(&self) -> bool {
        matches!(self, PrintJobState::Running | PrintJobState::Paused)
    }

    /// Check if a transition from this state to `target` is valid
    pub fn can_transition_to(&self, target: PrintJobState) -> bool {
        use PrintJobState::*;
        matches!(
            (self, target),
            (Idle, Running)
                | (Idle, Cancelled)
                | (Running, Paused | Completed | Failed | Cancelled)
                | (Paused, Running | Failed | Cancelled)
                | (Completed | Failed | Cancelled, Idle)
        )
    }
}

impl fmt::Display for PrintJobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Running => write!(f, "Running"),
            Self::Paused => write!(f, "Paused"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Why a job failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FailureReason {
    /// The printer requested a line that left the resend history
    ResendHistoryExhausted,
    /// The firmware reported an error
    PrinterError(String),
    /// Transmission retries were used up or the protocol broke down
    Transmission(String),
    /// The link went silent or failed while printing
    LinkLost(String),
    /// The job file could not be read
    File(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResendHistoryExhausted => write!(f, "resend history exhausted"),
            Self::PrinterError(m) => write!(f, "printer error: {}", m),
            Self::Transmission(m) => write!(f, "transmission error: {}", m),
            Self::LinkLost(m) => write!(f, "link lost: {}", m),
            Self::File(m) => write!(f, "file error: {}", m),
        }
    }
}

/// How a job ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobOutcome {
    /// All commands were acknowledged
    Completed,
    /// Job aborted by an error
    Failed(FailureReason),
    /// Job cancelled; not counted as a failure
    Cancelled,
}

impl JobOutcome {
    /// Job state matching this outcome
    pub fn state(&self) -> PrintJobState {
        match self {
            JobOutcome::Completed => PrintJobState::Completed,
            JobOutcome::Failed(_) => PrintJobState::Failed,
            JobOutcome::Cancelled => PrintJobState::Cancelled,
        }
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Completed => write!(f, "completed"),
            JobOutcome::Failed(reason) => write!(f, "failed ({})", reason),
            JobOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Immutable view of a print job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintJobSnapshot {
    /// Job file
    pub file_path: PathBuf,
    /// Total file size in bytes
    pub file_size: u64,
    /// Bytes consumed so far
    pub file_position: u64,
    /// When streaming started
    pub start_time: Option<DateTime<Utc>>,
    /// Current layer (1-based once printing starts)
    pub current_layer: u32,
    /// Z height of the current layer in mm
    pub last_layer_height_mm: f64,
    /// Lifecycle state
    pub state: PrintJobState,
}

impl PrintJobSnapshot {
    /// Progress as a percentage of the file consumed
    pub fn percent(&self) -> f64 {
        if self.file_size == 0 {
            return 0.0;
        }
        (self.file_position as f64 / self.file_size as f64 * 100.0).clamp(0.0, 100.0)
    }

    /// Time since the job started
    pub fn elapsed(&self) -> Duration {
        self.start_time
            .and_then(|start| (Utc::now() - start).to_std().ok())
            .unwrap_or_default()
    }
}

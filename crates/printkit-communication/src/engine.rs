//! Protocol engine abstraction
//!
//! The façade talks to exactly one engine per connection through the
//! [`Engine`] trait. Each engine runs a monitor thread that owns the
//! transport and all protocol state; requests reach it over an unbounded
//! channel and results leave as [`PrinterEvent`]s.

use crate::communication::LinkProvider;
use parking_lot::RwLock;
use printkit_core::{
    Axis, ConnectionConfig, ControllerError, DriverKind, EventSink, HeaterKind, PrinterEvent,
    PrinterProfile, PrinterState, Result,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;

/// Requests posted to an engine's monitor thread
#[derive(Debug, Clone, PartialEq)]
pub enum EngineRequest {
    /// Relative move of one axis
    Jog {
        /// Axis to move
        axis: Axis,
        /// Distance in mm
        distance_mm: f64,
    },
    /// Home the given axes (all when empty)
    Home(Vec<Axis>),
    /// Extrude or retract filament
    Extrude {
        /// Tool index
        tool: u8,
        /// Filament length in mm; negative retracts
        amount_mm: f64,
        /// Feed rate in mm/min, profile default when absent
        speed: Option<f64>,
    },
    /// Select the active tool
    ChangeTool(u8),
    /// Set fan speed (0-255)
    Fan {
        /// Tool the fan belongs to
        tool: u8,
        /// PWM value
        speed: u8,
    },
    /// Set a heater target; already clamped by the façade
    SetTemperature {
        /// Heater addressed
        heater: HeaterKind,
        /// Target in °C
        celsius: f64,
    },
    /// Raw GCODE line from a terminal
    Raw(String),
    /// A job file was selected
    SelectFile {
        /// Path of the file
        path: PathBuf,
        /// Size in bytes
        size: u64,
    },
    /// Start streaming the selected file
    StartPrint,
    /// Pause or resume the running job
    SetPaused(bool),
    /// Cancel; the cancel flag is already set
    Cancel,
    /// Background temperature poll (binary engine)
    PollNow,
    /// Close the link and stop the monitor thread
    Disconnect,
}

/// Connection state shared between the façade and the monitor thread
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EngineStatus {
    /// Current printer state
    pub state: PrinterState,
    /// A job was requested or is running
    pub job_active: bool,
}

/// Printer state holder
///
/// Written only by the monitor thread (and by the façade before an engine
/// exists); every change is published as a `StateChanged` event.
#[derive(Debug, Clone)]
pub struct StateCell {
    status: Arc<RwLock<EngineStatus>>,
    events: EventSink,
}

impl StateCell {
    /// Create a cell in `PrinterState::None`
    pub fn new(events: EventSink) -> Self {
        Self {
            status: Arc::new(RwLock::new(EngineStatus::default())),
            events,
        }
    }

    /// Current state
    pub fn get(&self) -> PrinterState {
        self.status.read().state
    }

    /// Move to a new state, publishing the transition
    pub fn set(&self, to: PrinterState) {
        let from = {
            let mut status = self.status.write();
            let from = status.state;
            if from == to {
                return;
            }
            status.state = to;
            if !to.is_printing_or_paused() && !to.is_operational() {
                status.job_active = false;
            }
            from
        };
        if !from.can_transition_to(to) {
            tracing::warn!("Unexpected state transition {} -> {}", from, to);
        }
        tracing::info!("Printer state: {} -> {}", from, to);
        self.events.emit(PrinterEvent::StateChanged { from, to });
    }

    /// Check if a job was requested or is running
    pub fn job_active(&self) -> bool {
        self.status.read().job_active
    }

    /// Mark a job as requested or finished
    pub fn set_job_active(&self, active: bool) {
        self.status.write().job_active = active;
    }

    /// Event sink the cell publishes through
    pub fn events(&self) -> &EventSink {
        &self.events
    }
}

/// Everything a monitor thread needs besides its request channel
#[derive(Clone)]
pub struct EngineContext {
    /// Connection parameters
    pub config: ConnectionConfig,
    /// Printer profile
    pub profile: PrinterProfile,
    /// Link source
    pub provider: Arc<dyn LinkProvider>,
    /// Event output
    pub events: EventSink,
    /// Shared printer state
    pub state: StateCell,
    /// Set by `cancel_print`, consumed by the monitor at a safe point
    pub cancel: Arc<AtomicBool>,
}

impl EngineContext {
    /// Take the pending cancel request, if any
    pub fn take_cancel(&self) -> bool {
        self.cancel.swap(false, Ordering::AcqRel)
    }

    /// Check for a pending cancel without consuming it
    pub fn cancel_pending(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }
}

/// Protocol engine driving one connection
pub trait Engine: Send {
    /// Protocol spoken by this engine
    fn driver(&self) -> DriverKind;

    /// Start the monitor thread for `port` at `baud_rate` (0 autodetects)
    fn start(&mut self, port: &str, baud_rate: u32) -> Result<()>;

    /// Post a request to the monitor thread
    fn request(&self, request: EngineRequest) -> Result<()>;

    /// Request cancellation of the active job without blocking
    fn cancel(&self) -> Result<()>;

    /// Stop the monitor thread and wait for it to close the link
    fn shutdown(&mut self);

    /// Check if the monitor thread is still alive
    fn is_running(&self) -> bool;
}

/// Request channel and thread of a running monitor
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<EngineRequest>,
    cancel: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    /// Wrap a request sender and the monitor's cancel flag
    pub fn new(tx: mpsc::UnboundedSender<EngineRequest>, cancel: Arc<AtomicBool>) -> Self {
        Self {
            tx,
            cancel,
            threads: Vec::new(),
        }
    }

    /// Track a spawned thread so `shutdown` can join it
    pub fn attach(&mut self, thread: JoinHandle<()>) {
        self.threads.push(thread);
    }

    /// Post a request
    pub fn request(&self, request: EngineRequest) -> Result<()> {
        self.tx
            .send(request)
            .map_err(|_| ControllerError::EngineStopped.into())
    }

    /// Set the cancel flag and wake the monitor
    pub fn cancel(&self) -> Result<()> {
        self.cancel.store(true, Ordering::Release);
        self.request(EngineRequest::Cancel)
    }

    /// Check if every attached thread is alive
    pub fn is_running(&self) -> bool {
        !self.tx.is_closed() && self.threads.iter().all(|t| !t.is_finished())
    }

    /// Ask the monitor to disconnect and join all threads
    pub fn shutdown(&mut self) {
        let _ = self.tx.send(EngineRequest::Disconnect);
        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                tracing::error!("Engine thread panicked");
            }
        }
    }
}

/// Build the engine for a driver kind
pub fn create_engine(
    driver: DriverKind,
    config: ConnectionConfig,
    profile: PrinterProfile,
    provider: Arc<dyn LinkProvider>,
    state: StateCell,
) -> Box<dyn Engine> {
    let events = state.events().clone();
    let ctx = EngineContext {
        config,
        profile,
        provider,
        events,
        state,
        cancel: Arc::new(AtomicBool::new(false)),
    };
    match driver {
        DriverKind::Marlin => Box::new(crate::marlin::MarlinEngine::new(ctx)),
        DriverKind::S3g => Box::new(crate::s3g::S3gEngine::new(ctx)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_cell_publishes_transitions() {
        let (sink, mut rx) = EventSink::channel();
        let cell = StateCell::new(sink);
        cell.set(PrinterState::OpeningLink);
        cell.set(PrinterState::OpeningLink);
        cell.set(PrinterState::Connecting);
        assert_eq!(
            rx.try_recv().unwrap(),
            PrinterEvent::StateChanged {
                from: PrinterState::None,
                to: PrinterState::OpeningLink
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            PrinterEvent::StateChanged {
                from: PrinterState::OpeningLink,
                to: PrinterState::Connecting
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_job_flag_cleared_on_error() {
        let (sink, _rx) = EventSink::channel();
        let cell = StateCell::new(sink);
        cell.set(PrinterState::Operational);
        cell.set_job_active(true);
        cell.set(PrinterState::Printing);
        assert!(cell.job_active());
        cell.set(PrinterState::Error);
        assert!(!cell.job_active());
    }

    #[test]
    fn test_handle_reports_stopped_engine() {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = EngineHandle::new(tx, Arc::new(AtomicBool::new(false)));
        drop(rx);
        assert!(handle.request(EngineRequest::PollNow).is_err());
        assert!(!handle.is_running());
    }
}

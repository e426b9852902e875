//! Printer façade
//!
//! [`Printer`] is the single entry point the host application uses. It owns
//! at most one protocol engine at a time, validates requests against the
//! current state, and routes every engine event through the
//! [`StateMonitor`] to listeners and subscribers.
//!
//! Engine failures never come back as `Err`: they end in a state transition
//! and an event. Only caller mistakes (no file selected, job already
//! running, not connected) are returned synchronously.

pub mod monitor;

pub use monitor::{ListenerMap, StateMonitor, TELEMETRY_INTERVAL};

use crate::communication::{LinkProvider, SerialLinkProvider};
use crate::engine::{create_engine, Engine, EngineRequest, StateCell};
use crate::job::SelectedFile;
use printkit_core::{
    Axis, ConnectionConfig, ConnectionError, ControllerError, DriverKind, EventSink, HeaterKind,
    HostConfig, JobError, JobOutcome, PrintJobSnapshot, PrinterEvent, PrinterListener,
    PrinterListenerHandle, PrinterProfile, PrinterState, Result, TemperatureSample, AUTO_PORT,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Printer as seen through its event stream
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrinterSnapshot {
    /// Current state
    pub state: PrinterState,
    /// Port of the open link
    pub port: Option<String>,
    /// Baud rate of the open link
    pub baud_rate: Option<u32>,
    /// Last known temperatures
    pub temperatures: TemperatureSample,
    /// Running or paused job
    pub job: Option<PrintJobSnapshot>,
    /// Outcome of the last finished job
    pub last_outcome: Option<JobOutcome>,
    /// Selected job file and its size
    pub selected_file: Option<(PathBuf, u64)>,
    /// Last Z height reported
    pub z_mm: Option<f64>,
    /// Active tool
    pub tool: u8,
    /// A heating wait is in progress
    pub heating: bool,
    /// Last connection error
    pub last_error: Option<String>,
}

impl PrinterSnapshot {
    /// Fold one event into the snapshot
    pub fn apply(&mut self, event: &PrinterEvent) {
        match event {
            PrinterEvent::ConnectionOpened { port, baud_rate } => {
                self.port = Some(port.clone());
                self.baud_rate = Some(*baud_rate);
                self.last_error = None;
            }
            PrinterEvent::ConnectionClosed => {
                self.port = None;
                self.baud_rate = None;
            }
            PrinterEvent::ConnectionError { reason } => self.last_error = Some(reason.clone()),
            PrinterEvent::StateChanged { to, .. } => self.state = *to,
            PrinterEvent::Temperature(sample) => self.temperatures = sample.clone(),
            PrinterEvent::TargetTemperature { heater, celsius } => {
                self.temperatures.set_target(*heater, *celsius)
            }
            PrinterEvent::Message { .. } => {}
            PrinterEvent::Progress { file_position, .. } => {
                if let Some(job) = self.job.as_mut() {
                    job.file_position = *file_position;
                }
            }
            PrinterEvent::ZChanged(z) => self.z_mm = Some(*z),
            PrinterEvent::LayerChanged { layer, height_mm } => {
                if let Some(job) = self.job.as_mut() {
                    job.current_layer = *layer;
                    job.last_layer_height_mm = *height_mm;
                }
            }
            PrinterEvent::ToolChanged(tool) => self.tool = *tool,
            PrinterEvent::FileSelected { path, size } => {
                self.selected_file = Some((path.clone(), *size))
            }
            PrinterEvent::JobStarted(job) => {
                self.job = Some(job.clone());
                self.last_outcome = None;
            }
            PrinterEvent::JobFinished { outcome, .. } => {
                self.job = None;
                self.last_outcome = Some(outcome.clone());
            }
            PrinterEvent::HeatingChanged(on) => self.heating = *on,
        }
    }
}

/// Uniform command surface over one printer
pub struct Printer {
    config: ConnectionConfig,
    profile: PrinterProfile,
    provider: Arc<dyn LinkProvider>,
    state: StateCell,
    engine: Option<Box<dyn Engine>>,
    selected: Option<SelectedFile>,
    /// Selection not yet started or cancelled
    selection_pending: bool,
    monitor: StateMonitor,
}

impl Printer {
    /// Printer on real serial ports
    pub fn new(config: ConnectionConfig, profile: PrinterProfile) -> Result<Self> {
        Self::with_provider(config, profile, Arc::new(SerialLinkProvider))
    }

    /// Printer from a loaded host configuration
    pub fn from_config(config: HostConfig, provider: Arc<dyn LinkProvider>) -> Result<Self> {
        Self::with_provider(config.connection, config.profile, provider)
    }

    /// Printer on links from `provider`
    pub fn with_provider(
        config: ConnectionConfig,
        profile: PrinterProfile,
        provider: Arc<dyn LinkProvider>,
    ) -> Result<Self> {
        config.validate()?;
        profile.validate()?;
        let (sink, rx) = EventSink::channel();
        let monitor = StateMonitor::spawn(rx)?;
        Ok(Self {
            config,
            profile,
            provider,
            state: StateCell::new(sink),
            engine: None,
            selected: None,
            selection_pending: false,
            monitor,
        })
    }

    /// Protocol driver in use
    pub fn driver(&self) -> DriverKind {
        self.config.driver
    }

    /// Open a connection; `None` falls back to the configured port and baud
    ///
    /// Returns once the engine thread is running. The outcome arrives as a
    /// transition to `Operational` or `Error`.
    pub fn connect(&mut self, port: Option<&str>, baud_rate: Option<u32>) -> Result<()> {
        if self.engine.as_ref().is_some_and(|e| e.is_running()) {
            return Err(ControllerError::CommandRejected {
                reason: "already connected".to_string(),
            }
            .into());
        }
        if let Some(mut stale) = self.engine.take() {
            stale.shutdown();
        }

        let port = port.unwrap_or(&self.config.port).to_string();
        let baud_rate = baud_rate.unwrap_or(self.config.baud_rate);

        if !port.eq_ignore_ascii_case(AUTO_PORT) && !self.port_is_listed(&port) {
            tracing::error!("Port {} is not available", port);
            self.state.set(PrinterState::Error);
            self.state.events().emit(PrinterEvent::ConnectionError {
                reason: ConnectionError::PortNotFound { port }.to_string(),
            });
            return Ok(());
        }

        tracing::info!(
            "Connecting to {} at {} baud ({})",
            port,
            baud_rate,
            self.config.driver
        );
        let mut engine = create_engine(
            self.config.driver,
            self.config.clone(),
            self.profile.clone(),
            self.provider.clone(),
            self.state.clone(),
        );
        engine.start(&port, baud_rate)?;
        if let Some(selected) = &self.selected {
            engine.request(EngineRequest::SelectFile {
                path: selected.path.clone(),
                size: selected.size,
            })?;
        }
        self.engine = Some(engine);
        Ok(())
    }

    fn port_is_listed(&self, port: &str) -> bool {
        match self.provider.list_ports() {
            Ok(ports) => ports.iter().any(|p| p.port_name == port),
            Err(e) => {
                tracing::warn!("Port enumeration failed: {}", e);
                false
            }
        }
    }

    /// Close the connection, cancelling any active job first
    pub fn disconnect(&mut self) {
        let Some(mut engine) = self.engine.take() else {
            return;
        };
        if self.state.job_active() || self.state.get().is_printing_or_paused() {
            if let Err(e) = engine.cancel() {
                tracing::debug!("Cancel before disconnect failed: {}", e);
            }
        }
        engine.shutdown();
        self.state.set(PrinterState::Closed);
    }

    fn manual(&self, what: &str, request: EngineRequest) -> Result<()> {
        let state = self.state.get();
        if !state.is_operational() {
            tracing::warn!("Ignoring {}: printer is {}", what, state);
            return Ok(());
        }
        match &self.engine {
            Some(engine) => engine.request(request),
            None => {
                tracing::warn!("Ignoring {}: no engine", what);
                Ok(())
            }
        }
    }

    /// Move one axis by `distance_mm`
    pub fn jog(&self, axis: Axis, distance_mm: f64) -> Result<()> {
        self.manual("jog", EngineRequest::Jog { axis, distance_mm })
    }

    /// Home the given axes, all when empty
    pub fn home(&self, axes: &[Axis]) -> Result<()> {
        self.manual("home", EngineRequest::Home(axes.to_vec()))
    }

    /// Extrude (positive) or retract (negative) filament
    pub fn extrude(&self, tool: u8, amount_mm: f64, speed: Option<f64>) -> Result<()> {
        self.manual(
            "extrude",
            EngineRequest::Extrude {
                tool,
                amount_mm,
                speed,
            },
        )
    }

    /// Select the active tool
    pub fn change_tool(&self, tool: u8) -> Result<()> {
        if tool >= self.profile.extruder_count {
            return Err(ControllerError::CommandRejected {
                reason: format!(
                    "tool {} out of range ({} extruders)",
                    tool, self.profile.extruder_count
                ),
            }
            .into());
        }
        self.manual("tool change", EngineRequest::ChangeTool(tool))
    }

    /// Set a fan speed (0 turns it off)
    pub fn fan(&self, tool: u8, speed: u8) -> Result<()> {
        self.manual("fan", EngineRequest::Fan { tool, speed })
    }

    /// Set a heater target, clamped to the profile ceiling
    pub fn set_temperature(&self, heater: HeaterKind, celsius: f64) -> Result<()> {
        let clamped = self.profile.clamp_temperature(heater, celsius);
        if clamped != celsius {
            tracing::warn!("{} target {} clamped to {}", heater, celsius, clamped);
        }
        self.manual(
            "temperature",
            EngineRequest::SetTemperature {
                heater,
                celsius: clamped,
            },
        )
    }

    /// Pass a raw GCODE line through to the printer
    pub fn send_command(&self, raw: &str) -> Result<()> {
        if self.config.driver == DriverKind::S3g {
            return Err(ControllerError::CommandRejected {
                reason: "raw GCODE is not supported by the s3g driver".to_string(),
            }
            .into());
        }
        self.manual("raw command", EngineRequest::Raw(raw.to_string()))
    }

    /// Choose the job file; optionally start printing it right away
    pub fn select_file(&mut self, path: &Path, start_if_selected: bool) -> Result<()> {
        if self.job_in_progress() {
            return Err(JobError::AlreadyRunning.into());
        }
        let selected = SelectedFile::from_path(path)?;
        match &self.engine {
            Some(engine) => engine.request(EngineRequest::SelectFile {
                path: selected.path.clone(),
                size: selected.size,
            })?,
            None => self.state.events().emit(PrinterEvent::FileSelected {
                path: selected.path.clone(),
                size: selected.size,
            }),
        }
        self.selected = Some(selected);
        self.selection_pending = true;
        if start_if_selected {
            self.start_print()?;
        }
        Ok(())
    }

    /// Start streaming the selected file
    pub fn start_print(&mut self) -> Result<()> {
        let engine = match &self.engine {
            Some(engine) if self.state.get().is_operational() => engine,
            _ => return Err(ControllerError::NotConnected.into()),
        };
        if self.job_in_progress() {
            return Err(JobError::AlreadyRunning.into());
        }
        if self.selected.is_none() {
            return Err(JobError::NoFileSelected.into());
        }
        self.state.set_job_active(true);
        self.selection_pending = false;
        engine.request(EngineRequest::StartPrint)
    }

    /// Pause or resume the running job
    pub fn set_paused(&self, paused: bool) -> Result<()> {
        match &self.engine {
            Some(engine) if self.state.get().is_printing_or_paused() => {
                engine.request(EngineRequest::SetPaused(paused))
            }
            _ => {
                tracing::debug!("No job to {}", if paused { "pause" } else { "resume" });
                Ok(())
            }
        }
    }

    /// Cancel the job; never blocks
    ///
    /// Cancels the active job, or a selected file that was never started.
    /// Anything else is a no-op, so a job is cancelled at most once.
    pub fn cancel_print(&mut self) -> Result<()> {
        if !self.job_in_progress() && !self.selection_pending {
            tracing::debug!("Cancel ignored, no job to cancel");
            return Ok(());
        }
        match &self.engine {
            Some(engine) => {
                self.selection_pending = false;
                engine.cancel()
            }
            None => {
                tracing::debug!("Cancel ignored, not connected");
                Ok(())
            }
        }
    }

    fn job_in_progress(&self) -> bool {
        self.state.job_active() || self.state.get().is_printing_or_paused()
    }

    /// Current state
    pub fn state(&self) -> PrinterState {
        self.state.get()
    }

    /// Ready to accept manual commands
    pub fn is_operational(&self) -> bool {
        self.state.get().is_operational()
    }

    /// A job is streaming
    pub fn is_printing(&self) -> bool {
        self.state.get() == PrinterState::Printing
    }

    /// A job is paused
    pub fn is_paused(&self) -> bool {
        self.state.get() == PrinterState::Paused
    }

    /// Latest view built from the event stream
    pub fn snapshot(&self) -> PrinterSnapshot {
        self.monitor.snapshot()
    }

    /// File chosen with [`select_file`](Self::select_file)
    pub fn selected_file(&self) -> Option<&SelectedFile> {
        self.selected.as_ref()
    }

    /// Register a listener; events arrive on the monitor thread
    pub fn register_listener(&self, listener: Arc<dyn PrinterListener>) -> PrinterListenerHandle {
        let id = uuid::Uuid::new_v4().to_string();
        self.monitor.listeners().write().insert(id.clone(), listener);
        tracing::debug!("Registered listener {}", id);
        PrinterListenerHandle(id)
    }

    /// Remove a listener; returns whether it was registered
    pub fn unregister_listener(&self, handle: &PrinterListenerHandle) -> bool {
        self.monitor.listeners().write().remove(&handle.0).is_some()
    }

    /// Raw event stream, without telemetry coalescing
    pub fn subscribe(&self) -> broadcast::Receiver<PrinterEvent> {
        self.monitor.subscribe()
    }
}

impl Drop for Printer {
    fn drop(&mut self) {
        self.disconnect();
        self.monitor.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::VirtualLinkProvider;
    use printkit_core::Error;

    fn printer() -> Printer {
        Printer::with_provider(
            ConnectionConfig::new("/dev/ttyUSB0", 115200),
            PrinterProfile::default(),
            Arc::new(VirtualLinkProvider::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_unknown_port_moves_to_error() {
        let mut printer = printer();
        let mut events = printer.subscribe();
        printer.connect(None, None).unwrap();
        assert_eq!(printer.state(), PrinterState::Error);
        drop(printer);
        let mut saw_error = false;
        while let Ok(event) = events.try_recv() {
            saw_error |= matches!(event, PrinterEvent::ConnectionError { .. });
        }
        assert!(saw_error);
    }

    #[test]
    fn test_start_print_checks_order() {
        let mut printer = printer();
        assert!(matches!(
            printer.start_print(),
            Err(Error::Controller(ControllerError::NotConnected))
        ));
    }

    #[test]
    fn test_manual_commands_ignored_when_offline() {
        let printer = printer();
        printer.jog(Axis::X, 10.0).unwrap();
        printer.set_temperature(HeaterKind::Tool(0), 500.0).unwrap();
        assert!(printer.change_tool(3).is_err());
    }

    #[test]
    fn test_cancel_without_job_is_noop() {
        let mut printer = printer();
        printer.cancel_print().unwrap();
        assert!(!printer.selection_pending);

        let file = tempfile::NamedTempFile::new().unwrap();
        printer.select_file(file.path(), false).unwrap();
        assert!(printer.selection_pending);
        // Offline: the selection stays pending for the next connection
        printer.cancel_print().unwrap();
        assert!(printer.selection_pending);
    }

    #[test]
    fn test_listener_registration() {
        struct Quiet;
        impl PrinterListener for Quiet {}
        let printer = printer();
        let handle = printer.register_listener(Arc::new(Quiet));
        assert!(printer.unregister_listener(&handle));
        assert!(!printer.unregister_listener(&handle));
    }

    #[test]
    fn test_snapshot_folds_job_events() {
        let mut snapshot = PrinterSnapshot::default();
        snapshot.apply(&PrinterEvent::ZChanged(0.3));
        snapshot.apply(&PrinterEvent::ToolChanged(1));
        snapshot.apply(&PrinterEvent::JobFinished {
            outcome: JobOutcome::Cancelled,
            elapsed: std::time::Duration::from_secs(1),
            layers: 0,
        });
        assert_eq!(snapshot.z_mm, Some(0.3));
        assert_eq!(snapshot.tool, 1);
        assert_eq!(snapshot.last_outcome, Some(JobOutcome::Cancelled));
        assert!(snapshot.job.is_none());
    }
}

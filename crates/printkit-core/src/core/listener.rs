//! Printer listener interface
//!
//! Defines the listener trait the surrounding application implements to
//! receive printer events.

use crate::core::event::{MessageDirection, PrinterEvent};
use crate::data::{HeaterKind, JobOutcome, PrintJobSnapshot, PrinterState, TemperatureSample};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

/// Handle for a registered printer listener.
///
/// Uniquely identifies a listener subscription. Can be used to unsubscribe
/// from printer events.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrinterListenerHandle(pub String);

/// Listener trait for printer events
///
/// All methods default to no-ops. Calls arrive on the state monitor's
/// dispatch thread; engines never wait for them.
#[async_trait]
pub trait PrinterListener: Send + Sync {
    /// Called when the link is established
    async fn on_connection_opened(&self, _port: &str, _baud_rate: u32) {}

    /// Called when the link is closed on request
    async fn on_connection_closed(&self) {}

    /// Called when the link fails
    async fn on_connection_error(&self, _reason: &str) {}

    /// Called when printer state changes
    async fn on_state_changed(&self, _from: PrinterState, _to: PrinterState) {}

    /// Called with a new temperature sample
    async fn on_temperature(&self, _sample: &TemperatureSample) {}

    /// Called when an outgoing command changes a heater target
    async fn on_target_temperature(&self, _heater: HeaterKind, _celsius: f64) {}

    /// Called for every raw line sent or received
    async fn on_message(&self, _direction: MessageDirection, _line: &str) {}

    /// Called when print progress changes
    async fn on_progress(&self, _file_position: u64, _file_size: u64, _percent: f64) {}

    /// Called when Z changes
    async fn on_z_changed(&self, _z: f64) {}

    /// Called when a new layer starts
    async fn on_layer_changed(&self, _layer: u32, _height_mm: f64) {}

    /// Called when the active tool changes
    async fn on_tool_changed(&self, _tool: u8) {}

    /// Called when a job file is selected
    async fn on_file_selected(&self, _path: &Path, _size: u64) {}

    /// Called when a job starts streaming
    async fn on_job_started(&self, _job: &PrintJobSnapshot) {}

    /// Called when a job reaches a terminal state
    async fn on_job_finished(&self, _outcome: &JobOutcome, _elapsed: Duration, _layers: u32) {}

    /// Called when a heating wait starts or ends
    async fn on_heating_changed(&self, _heating: bool) {}
}

/// Route an event to the matching listener method
pub async fn deliver(listener: &dyn PrinterListener, event: &PrinterEvent) {
    match event {
        PrinterEvent::ConnectionOpened { port, baud_rate } => {
            listener.on_connection_opened(port, *baud_rate).await
        }
        PrinterEvent::ConnectionClosed => listener.on_connection_closed().await,
        PrinterEvent::ConnectionError { reason } => listener.on_connection_error(reason).await,
        PrinterEvent::StateChanged { from, to } => listener.on_state_changed(*from, *to).await,
        PrinterEvent::Temperature(sample) => listener.on_temperature(sample).await,
        PrinterEvent::TargetTemperature { heater, celsius } => {
            listener.on_target_temperature(*heater, *celsius).await
        }
        PrinterEvent::Message { direction, line } => listener.on_message(*direction, line).await,
        PrinterEvent::Progress {
            file_position,
            file_size,
            percent,
        } => {
            listener
                .on_progress(*file_position, *file_size, *percent)
                .await
        }
        PrinterEvent::ZChanged(z) => listener.on_z_changed(*z).await,
        PrinterEvent::LayerChanged { layer, height_mm } => {
            listener.on_layer_changed(*layer, *height_mm).await
        }
        PrinterEvent::ToolChanged(tool) => listener.on_tool_changed(*tool).await,
        PrinterEvent::FileSelected { path, size } => listener.on_file_selected(path, *size).await,
        PrinterEvent::JobStarted(job) => listener.on_job_started(job).await,
        PrinterEvent::JobFinished {
            outcome,
            elapsed,
            layers,
        } => listener.on_job_finished(outcome, *elapsed, *layers).await,
        PrinterEvent::HeatingChanged(on) => listener.on_heating_changed(*on).await,
    }
}

//! Event system for printer telemetry
//!
//! Provides:
//! - Event types for connection, state, temperature and job changes
//! - `EventSink`, the fire-and-forget handle engines publish through
//! - Event dispatcher for broadcasting events to async subscribers

use crate::data::{
    HeaterKind, JobOutcome, PrintJobSnapshot, PrinterState, TemperatureSample,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

/// Direction of a raw terminal line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageDirection {
    /// Host to printer
    Sent,
    /// Printer to host
    Received,
}

/// Printer event types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PrinterEvent {
    /// Link established
    ConnectionOpened {
        /// Port name
        port: String,
        /// Baud rate in use
        baud_rate: u32,
    },
    /// Link closed on request
    ConnectionClosed,
    /// Link failed
    ConnectionError {
        /// Human readable reason
        reason: String,
    },
    /// Printer state changed
    StateChanged {
        /// Previous state
        from: PrinterState,
        /// New state
        to: PrinterState,
    },
    /// New temperature sample
    Temperature(TemperatureSample),
    /// A heater target was changed by an outgoing command
    TargetTemperature {
        /// Heater addressed
        heater: HeaterKind,
        /// New target in °C
        celsius: f64,
    },
    /// Raw line for terminal/log views
    Message {
        /// Direction
        direction: MessageDirection,
        /// Line text without terminator
        line: String,
    },
    /// Print progress
    Progress {
        /// Bytes consumed
        file_position: u64,
        /// Total bytes
        file_size: u64,
        /// Percent of the file consumed
        percent: f64,
    },
    /// Current Z height changed (mm)
    ZChanged(f64),
    /// Layer changed
    LayerChanged {
        /// New layer number
        layer: u32,
        /// Z height of the layer in mm
        height_mm: f64,
    },
    /// Active tool changed
    ToolChanged(u8),
    /// A job file was selected
    FileSelected {
        /// Path of the file
        path: PathBuf,
        /// Size in bytes
        size: u64,
    },
    /// Job started streaming
    JobStarted(PrintJobSnapshot),
    /// Job reached a terminal state
    JobFinished {
        /// How it ended
        outcome: JobOutcome,
        /// Time since start
        elapsed: Duration,
        /// Layers printed
        layers: u32,
    },
    /// Heating wait started or ended
    HeatingChanged(bool),
}

impl PrinterEvent {
    /// Telemetry that may be coalesced; only the latest value matters
    pub fn is_telemetry(&self) -> bool {
        matches!(
            self,
            PrinterEvent::Temperature(_) | PrinterEvent::Progress { .. } | PrinterEvent::ZChanged(_)
        )
    }

    /// Key used when coalescing telemetry
    pub fn telemetry_key(&self) -> Option<&'static str> {
        match self {
            PrinterEvent::Temperature(_) => Some("temperature"),
            PrinterEvent::Progress { .. } => Some("progress"),
            PrinterEvent::ZChanged(_) => Some("z"),
            _ => None,
        }
    }
}

impl std::fmt::Display for PrinterEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrinterEvent::ConnectionOpened { port, baud_rate } => {
                write!(f, "Connected to {} @ {}", port, baud_rate)
            }
            PrinterEvent::ConnectionClosed => write!(f, "Disconnected"),
            PrinterEvent::ConnectionError { reason } => write!(f, "Connection error: {}", reason),
            PrinterEvent::StateChanged { from, to } => write!(f, "State: {} -> {}", from, to),
            PrinterEvent::Temperature(sample) => {
                write!(f, "Temperature:")?;
                for (tool, t) in &sample.tools {
                    write!(
                        f,
                        " T{}={:.1}/{:.1}",
                        tool,
                        t.actual.unwrap_or(0.0),
                        t.target.unwrap_or(0.0)
                    )?;
                }
                if let Some(bed) = &sample.bed {
                    write!(
                        f,
                        " B={:.1}/{:.1}",
                        bed.actual.unwrap_or(0.0),
                        bed.target.unwrap_or(0.0)
                    )?;
                }
                Ok(())
            }
            PrinterEvent::TargetTemperature { heater, celsius } => {
                write!(f, "Target {}: {:.1}", heater, celsius)
            }
            PrinterEvent::Message { direction, line } => match direction {
                MessageDirection::Sent => write!(f, "Send: {}", line),
                MessageDirection::Received => write!(f, "Recv: {}", line),
            },
            PrinterEvent::Progress { percent, .. } => write!(f, "Progress: {:.1}%", percent),
            PrinterEvent::ZChanged(z) => write!(f, "Z: {:.2}", z),
            PrinterEvent::LayerChanged { layer, height_mm } => {
                write!(f, "Layer {} at {:.2}mm", layer, height_mm)
            }
            PrinterEvent::ToolChanged(tool) => write!(f, "Tool: T{}", tool),
            PrinterEvent::FileSelected { path, size } => {
                write!(f, "File selected: {} ({} bytes)", path.display(), size)
            }
            PrinterEvent::JobStarted(job) => write!(f, "Job started: {}", job.file_path.display()),
            PrinterEvent::JobFinished {
                outcome,
                elapsed,
                layers,
            } => write!(
                f,
                "Job {} after {:.0}s, {} layers",
                outcome,
                elapsed.as_secs_f64(),
                layers
            ),
            PrinterEvent::HeatingChanged(on) => write!(f, "Heating: {}", on),
        }
    }
}

/// Fire-and-forget publishing handle
///
/// Cloned into every engine thread. Sending never blocks; events published
/// after the consumer went away are dropped.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<PrinterEvent>,
}

impl EventSink {
    /// Create a sink and the receiving end
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PrinterEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Publish an event
    pub fn emit(&self, event: PrinterEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Event dropped, monitor gone");
        }
    }

    /// Check if the consumer is gone
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Event dispatcher for publishing events to subscribers
#[derive(Clone)]
pub struct EventDispatcher {
    /// Broadcast sender channel for printer events.
    tx: broadcast::Sender<PrinterEvent>,
}

impl EventDispatcher {
    /// Create a new event dispatcher
    ///
    /// # Arguments
    /// * `buffer_size` - Size of the broadcast buffer (default 256)
    pub fn new(buffer_size: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer_size);
        Self { tx }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<PrinterEvent> {
        self.tx.subscribe()
    }

    /// Publish an event to all subscribers; returns the number of receivers
    pub fn publish(&self, event: PrinterEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Get number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_is_fire_and_forget() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        sink.emit(PrinterEvent::ConnectionClosed);
        assert!(sink.is_closed());
    }

    #[test]
    fn test_dispatcher_publish() {
        let dispatcher = EventDispatcher::default();
        assert_eq!(dispatcher.publish(PrinterEvent::ZChanged(0.2)), 0);
        let mut rx = dispatcher.subscribe();
        assert_eq!(dispatcher.publish(PrinterEvent::HeatingChanged(true)), 1);
        assert_eq!(rx.try_recv().unwrap(), PrinterEvent::HeatingChanged(true));
    }

    #[test]
    fn test_telemetry_keys() {
        assert!(PrinterEvent::ZChanged(1.0).is_telemetry());
        assert!(!PrinterEvent::ConnectionClosed.is_telemetry());
        assert_eq!(
            PrinterEvent::Temperature(TemperatureSample::default()).telemetry_key(),
            Some("temperature")
        );
    }
}

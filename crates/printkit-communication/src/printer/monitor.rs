//! State monitor
//!
//! Consumes the event stream of one printer on a dedicated thread running
//! a current-thread tokio runtime. For every event it:
//! - updates the shared [`PrinterSnapshot`]
//! - publishes to broadcast subscribers
//! - calls the registered [`PrinterListener`]s
//!
//! Telemetry (temperature, progress, Z) is coalesced: at most one event per
//! kind per flush interval reaches listeners. Pending telemetry is flushed
//! before any other event so ordering is preserved.

use super::PrinterSnapshot;
use printkit_core::core::deliver;
use printkit_core::{
    thread_safe_rw, thread_safe_rw_map, Error, EventDispatcher, PrinterEvent, PrinterListener,
    Result, ThreadSafeRw, ThreadSafeRwMap,
};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Interval at which coalesced telemetry is delivered
pub const TELEMETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Registered listeners keyed by handle id
pub type ListenerMap = ThreadSafeRwMap<String, Arc<dyn PrinterListener>>;

/// Background event consumer
pub struct StateMonitor {
    snapshot: ThreadSafeRw<PrinterSnapshot>,
    listeners: ListenerMap,
    dispatcher: EventDispatcher,
    stop: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl StateMonitor {
    /// Start consuming `events`
    pub fn spawn(events: mpsc::UnboundedReceiver<PrinterEvent>) -> Result<Self> {
        let snapshot = thread_safe_rw(PrinterSnapshot::default());
        let listeners: ListenerMap = thread_safe_rw_map();
        let dispatcher = EventDispatcher::default();
        let (stop_tx, stop_rx) = oneshot::channel();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;
        let worker = Dispatch {
            snapshot: snapshot.clone(),
            listeners: listeners.clone(),
            dispatcher: dispatcher.clone(),
            pending: Vec::new(),
        };
        let thread = std::thread::Builder::new()
            .name("state-monitor".to_string())
            .spawn(move || runtime.block_on(worker.run(events, stop_rx)))
            .map_err(|e| Error::other(format!("Failed to spawn state monitor: {}", e)))?;

        Ok(Self {
            snapshot,
            listeners,
            dispatcher,
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }

    /// Latest snapshot
    pub fn snapshot(&self) -> PrinterSnapshot {
        self.snapshot.read().clone()
    }

    /// Listener registry
    pub fn listeners(&self) -> &ListenerMap {
        &self.listeners
    }

    /// Broadcast subscription to every event, without coalescing
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PrinterEvent> {
        self.dispatcher.subscribe()
    }

    /// Deliver everything already queued, then stop the thread
    pub fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("State monitor panicked");
            }
        }
    }
}

impl Drop for StateMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Dispatch {
    snapshot: ThreadSafeRw<PrinterSnapshot>,
    listeners: ListenerMap,
    dispatcher: EventDispatcher,
    pending: Vec<PrinterEvent>,
}

impl Dispatch {
    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<PrinterEvent>,
        mut stop: oneshot::Receiver<()>,
    ) {
        let mut tick = tokio::time::interval(TELEMETRY_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately
        tick.tick().await;
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => break,
                },
                _ = tick.tick() => self.flush().await,
                _ = &mut stop => {
                    while let Ok(event) = events.try_recv() {
                        self.handle(event).await;
                    }
                    break;
                }
            }
        }
        self.flush().await;
        tracing::debug!("State monitor stopped");
    }

    async fn handle(&mut self, event: PrinterEvent) {
        self.snapshot.write().apply(&event);
        self.dispatcher.publish(event.clone());

        if let Some(key) = event.telemetry_key() {
            match self
                .pending
                .iter_mut()
                .find(|e| e.telemetry_key() == Some(key))
            {
                Some(slot) => *slot = event,
                None => self.pending.push(event),
            }
            return;
        }
        self.flush().await;
        self.deliver(&event).await;
    }

    async fn flush(&mut self) {
        for event in std::mem::take(&mut self.pending) {
            self.deliver(&event).await;
        }
    }

    async fn deliver(&self, event: &PrinterEvent) {
        let listeners: Vec<_> = self.listeners.read().values().cloned().collect();
        for listener in listeners {
            deliver(listener.as_ref(), event).await;
        }
    }
}

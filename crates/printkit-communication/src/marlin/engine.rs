//! Marlin engine and its monitor thread
//!
//! The monitor thread owns the transport and the [`MarlinProtocol`]. It
//! opens the link (probing ports and baud rates when asked to), waits for
//! the printer to answer, then runs the IO loop until a disconnect request
//! or a fatal link error.

use super::baud::{BaudDetector, BaudStep};
use super::protocol::MarlinProtocol;
use super::response::{parse_response, MarlinResponse};
use crate::communication::{is_garbage, LineBuffer, Transport};
use crate::engine::{Engine, EngineContext, EngineHandle, EngineRequest};
use printkit_core::{
    ConnectionError, ControllerError, DriverKind, Error, FailureReason, PrinterEvent,
    PrinterState, Result, AUTO_PORT, DEFAULT_BAUD_CANDIDATES,
};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Read wait per loop iteration; also the idle delay of the loop
const LOOP_DELAY: Duration = Duration::from_millis(10);

const PROBE: &[u8] = b"M105\n";

/// Close a link; a failure is only logged since the link is going away
fn close_link(transport: &mut dyn Transport, port: &str) {
    if let Err(e) = transport.close() {
        tracing::warn!("Failed to close {}: {}", port, e);
    }
}

/// ASCII protocol engine
pub struct MarlinEngine {
    ctx: EngineContext,
    handle: Option<EngineHandle>,
}

impl MarlinEngine {
    /// Create an engine; nothing runs until [`Engine::start`]
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx, handle: None }
    }

    fn handle(&self) -> Result<&EngineHandle> {
        self.handle
            .as_ref()
            .ok_or_else(|| ControllerError::NotConnected.into())
    }
}

impl Engine for MarlinEngine {
    fn driver(&self) -> DriverKind {
        DriverKind::Marlin
    }

    fn start(&mut self, port: &str, baud_rate: u32) -> Result<()> {
        if self.handle.is_some() {
            return Err(ControllerError::CommandRejected {
                reason: "engine already started".to_string(),
            }
            .into());
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let mut handle = EngineHandle::new(tx, self.ctx.cancel.clone());
        let monitor = MarlinMonitor::new(self.ctx.clone(), rx, port.to_string(), baud_rate);
        let thread = std::thread::Builder::new()
            .name("marlin-monitor".to_string())
            .spawn(move || monitor.run())
            .map_err(|e| Error::other(format!("Failed to spawn monitor thread: {}", e)))?;
        handle.attach(thread);
        self.handle = Some(handle);
        Ok(())
    }

    fn request(&self, request: EngineRequest) -> Result<()> {
        self.handle()?.request(request)
    }

    fn cancel(&self) -> Result<()> {
        self.handle()?.cancel()
    }

    fn shutdown(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.shutdown();
        }
    }

    fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| h.is_running())
    }
}

impl Drop for MarlinEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Why the monitor stopped waiting for something
enum Interrupt {
    Disconnect,
}

struct MarlinMonitor {
    ctx: EngineContext,
    rx: mpsc::UnboundedReceiver<EngineRequest>,
    port: String,
    baud_rate: u32,
    deferred: Vec<EngineRequest>,
}

impl MarlinMonitor {
    fn new(
        ctx: EngineContext,
        rx: mpsc::UnboundedReceiver<EngineRequest>,
        port: String,
        baud_rate: u32,
    ) -> Self {
        Self {
            ctx,
            rx,
            port,
            baud_rate,
            deferred: Vec::new(),
        }
    }

    fn run(mut self) {
        self.ctx.state.set(PrinterState::OpeningLink);
        let transport = match self.establish() {
            Ok(Some(transport)) => transport,
            Ok(None) => {
                self.ctx.state.set(PrinterState::Closed);
                self.ctx.events.emit(PrinterEvent::ConnectionClosed);
                return;
            }
            Err(e) => {
                tracing::error!("Connection failed: {}", e);
                self.ctx.state.set(PrinterState::Error);
                self.ctx.events.emit(PrinterEvent::ConnectionError {
                    reason: e.to_string(),
                });
                return;
            }
        };
        tracing::info!("Connected to {} at {} baud", self.port, self.baud_rate);
        self.ctx.events.emit(PrinterEvent::ConnectionOpened {
            port: self.port.clone(),
            baud_rate: self.baud_rate,
        });
        self.io_loop(transport);
    }

    /// Open the link and wait for the printer; `None` means disconnect was requested
    fn establish(&mut self) -> Result<Option<Box<dyn Transport>>> {
        let fallback_baud = self
            .ctx
            .config
            .baud_detection
            .candidates
            .first()
            .copied()
            .unwrap_or(DEFAULT_BAUD_CANDIDATES[0]);

        let auto_port = self.port.eq_ignore_ascii_case(AUTO_PORT);
        let initial_baud = if self.baud_rate == 0 {
            fallback_baud
        } else {
            self.baud_rate
        };
        let mut transport = if auto_port {
            self.ctx.state.set(PrinterState::DetectingLink);
            let fixed_baud = (self.baud_rate != 0).then_some(self.baud_rate);
            let found = match self.detect_port(fixed_baud) {
                Ok(found) => found,
                Err(Interrupt::Disconnect) => return Ok(None),
            };
            let (transport, baud) = found.ok_or(ConnectionError::NoDeviceDetected)?;
            self.baud_rate = baud;
            transport
        } else {
            self.ctx.provider.open(&self.port, initial_baud)?
        };

        if self.baud_rate == 0 {
            self.ctx.state.set(PrinterState::DetectingBaud);
            let mut detector = BaudDetector::new(&self.ctx.config.baud_detection);
            if let Some(first) = detector.current() {
                transport.set_baud_rate(first)?;
            }
            match self.run_detector(transport.as_mut(), &mut detector) {
                Ok(Some(baud)) => {
                    self.baud_rate = baud;
                    return Ok(Some(transport));
                }
                Ok(None) => {
                    close_link(transport.as_mut(), &self.port);
                    return Err(ConnectionError::BaudDetectionFailed {
                        attempted: detector.attempted(),
                    }
                    .into());
                }
                Err(Interrupt::Disconnect) => {
                    close_link(transport.as_mut(), &self.port);
                    return Ok(None);
                }
            }
        }

        self.ctx.state.set(PrinterState::Connecting);
        match self.await_answer(transport.as_mut()) {
            Ok(true) => Ok(Some(transport)),
            Ok(false) => {
                close_link(transport.as_mut(), &self.port);
                Err(ConnectionError::ConnectionTimeout {
                    timeout_ms: self.ctx.config.timeouts.connect_ms,
                }
                .into())
            }
            Err(Interrupt::Disconnect) => {
                close_link(transport.as_mut(), &self.port);
                Ok(None)
            }
        }
    }

    /// Probe every enumerated port
    ///
    /// With a fixed baud each port gets a single-candidate detector;
    /// otherwise each port runs through every configured candidate.
    fn detect_port(
        &mut self,
        fixed_baud: Option<u32>,
    ) -> std::result::Result<Option<(Box<dyn Transport>, u32)>, Interrupt> {
        let ports = match self.ctx.provider.list_ports() {
            Ok(ports) => ports,
            Err(e) => {
                tracing::warn!("Port enumeration failed: {}", e);
                return Ok(None);
            }
        };
        let detection = self.ctx.config.baud_detection.clone();
        for info in ports {
            let mut detector = match fixed_baud {
                Some(baud) => {
                    BaudDetector::with_candidates(vec![baud], 1, detection.timeouts_per_candidate)
                }
                None => BaudDetector::new(&detection),
            };
            let Some(first) = detector.current() else {
                return Ok(None);
            };
            tracing::debug!("Probing {} starting at {} baud", info.port_name, first);
            let mut transport = match self.ctx.provider.open(&info.port_name, first) {
                Ok(t) => t,
                Err(e) => {
                    tracing::debug!("Skipping {}: {}", info.port_name, e);
                    continue;
                }
            };
            match self.run_detector(transport.as_mut(), &mut detector)? {
                Some(baud) => {
                    tracing::info!("Printer found on {} at {} baud", info.port_name, baud);
                    self.port = info.port_name;
                    return Ok(Some((transport, baud)));
                }
                None => close_link(transport.as_mut(), &info.port_name),
            }
        }
        Ok(None)
    }

    /// Drive a baud detector until it accepts a rate or runs out
    fn run_detector(
        &mut self,
        transport: &mut dyn Transport,
        detector: &mut BaudDetector,
    ) -> std::result::Result<Option<u32>, Interrupt> {
        let read_timeout = self.ctx.config.timeouts.read();
        let mut lines = LineBuffer::new();
        let mut buf = [0u8; 256];
        if transport.write_all(PROBE).is_err() {
            return Ok(None);
        }
        let mut last_activity = Instant::now();

        loop {
            self.drain_requests()?;

            let n = match transport.read(&mut buf, LOOP_DELAY) {
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!("Read failed during detection: {}", e);
                    return Ok(None);
                }
            };

            let mut step = BaudStep::Continue;
            let mut answered = false;
            if n > 0 {
                last_activity = Instant::now();
                let chunk = &buf[..n];
                if is_garbage(chunk) {
                    lines.clear();
                    step = detector.on_line(chunk);
                } else {
                    lines.push(chunk);
                    while let Some(line) = lines.next_line() {
                        answered |= line.trim_start().starts_with("ok");
                        step = detector.on_line(line.as_bytes());
                        if step != BaudStep::Continue {
                            break;
                        }
                    }
                }
            } else if last_activity.elapsed() >= read_timeout {
                last_activity = Instant::now();
                step = detector.on_timeout();
                answered = true;
            }

            let outcome = match step {
                BaudStep::Continue => {
                    if answered {
                        transport.write_all(PROBE)
                    } else {
                        Ok(())
                    }
                }
                BaudStep::Switch(baud) => {
                    lines.clear();
                    transport
                        .set_baud_rate(baud)
                        .and_then(|_| transport.clear_input())
                        .and_then(|_| transport.write_all(PROBE))
                }
                BaudStep::Accepted(baud) => return Ok(Some(baud)),
                BaudStep::Exhausted => return Ok(None),
            };
            if let Err(e) = outcome {
                tracing::debug!("Link error during detection: {}", e);
                return Ok(None);
            }
        }
    }

    /// Probe with `M105` until any answer or the connect timeout
    fn await_answer(&mut self, transport: &mut dyn Transport) -> std::result::Result<bool, Interrupt> {
        let started = Instant::now();
        let read_timeout = self.ctx.config.timeouts.read();
        let connect_timeout = self.ctx.config.timeouts.connect();
        let mut lines = LineBuffer::new();
        let mut buf = [0u8; 256];
        if let Err(e) = transport.write_all(PROBE) {
            tracing::debug!("Probe not sent: {}", e);
        }
        let mut last_probe = Instant::now();

        while started.elapsed() < connect_timeout {
            self.drain_requests()?;
            match transport.read(&mut buf, LOOP_DELAY) {
                Ok(0) => {
                    if last_probe.elapsed() >= read_timeout {
                        tracing::debug!("No answer yet, probing again");
                        if let Err(e) = transport.write_all(PROBE) {
                            tracing::debug!("Probe not sent: {}", e);
                        }
                        last_probe = Instant::now();
                    }
                }
                Ok(n) => {
                    lines.push(&buf[..n]);
                    while let Some(line) = lines.next_line() {
                        match parse_response(&line, 0) {
                            MarlinResponse::Ok { .. }
                            | MarlinResponse::Temperature(_)
                            | MarlinResponse::Start
                            | MarlinResponse::Busy => return Ok(true),
                            _ => tracing::debug!("Ignoring '{}' while connecting", line),
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Read failed while connecting: {}", e);
                    return Ok(false);
                }
            }
        }
        Ok(false)
    }

    /// Keep requests that arrive before the link is up; stop on disconnect
    fn drain_requests(&mut self) -> std::result::Result<(), Interrupt> {
        loop {
            match self.rx.try_recv() {
                Ok(EngineRequest::Disconnect) => return Err(Interrupt::Disconnect),
                Ok(request) => self.deferred.push(request),
                Err(mpsc::error::TryRecvError::Empty) => return Ok(()),
                Err(mpsc::error::TryRecvError::Disconnected) => return Err(Interrupt::Disconnect),
            }
        }
    }

    fn io_loop(mut self, mut transport: Box<dyn Transport>) {
        let mut protocol = MarlinProtocol::new(&self.ctx);
        let mut lines = LineBuffer::new();
        let mut buf = [0u8; 1024];
        let read_timeout = self.ctx.config.timeouts.read();
        let link_loss = self.ctx.config.timeouts.link_loss();
        let now = Instant::now();
        let mut last_rx = now;
        let mut last_activity = now;

        self.ctx.state.set(PrinterState::Operational);
        let mut step = protocol.on_connected(now);
        for request in std::mem::take(&mut self.deferred) {
            step = step.and_then(|_| protocol.handle_request(request, now));
        }
        if let Err(e) = step {
            tracing::warn!("Protocol error: {}", e);
        }

        loop {
            let now = Instant::now();

            // 1. REQUEST PHASE
            let disconnect = loop {
                match self.rx.try_recv() {
                    Ok(EngineRequest::Disconnect) => break true,
                    Ok(request) => {
                        if let Err(e) = protocol.handle_request(request, now) {
                            tracing::warn!("Request failed: {}", e);
                        }
                    }
                    Err(mpsc::error::TryRecvError::Empty) => break false,
                    Err(mpsc::error::TryRecvError::Disconnected) => break true,
                }
            };
            if disconnect {
                tracing::info!("Disconnecting from {}", self.port);
                protocol.cancel_before_close();
                if let Err(e) = Self::flush(&mut protocol, transport.as_mut()) {
                    tracing::debug!("Disable sequence not delivered: {}", e);
                }
                close_link(transport.as_mut(), &self.port);
                if protocol.has_job() {
                    protocol.fail(
                        FailureReason::LinkLost("disconnected".to_string()),
                        PrinterState::Closed,
                    );
                } else {
                    self.ctx.state.set(PrinterState::Closed);
                }
                self.ctx.events.emit(PrinterEvent::ConnectionClosed);
                return;
            }

            // 2. WRITE PHASE
            let result = protocol
                .service_cancel(now)
                .and_then(|_| protocol.pump(now))
                .and_then(|_| Self::flush(&mut protocol, transport.as_mut()));
            if let Err(e) = result {
                match self.recover(&mut protocol, transport, e) {
                    Some(t) => {
                        transport = t;
                        last_rx = Instant::now();
                        last_activity = last_rx;
                        continue;
                    }
                    None => return,
                }
            }
            if protocol.is_halted() {
                tracing::error!("Link to {} closed after emergency stop", self.port);
                close_link(transport.as_mut(), &self.port);
                self.ctx.events.emit(PrinterEvent::ConnectionClosed);
                return;
            }

            // 3. READ PHASE
            let read = match transport.read(&mut buf, LOOP_DELAY) {
                Ok(0) => {
                    if last_activity.elapsed() >= read_timeout {
                        last_activity = Instant::now();
                        protocol.on_read_timeout(last_activity)
                    } else {
                        Ok(())
                    }
                }
                Ok(n) => {
                    last_rx = Instant::now();
                    last_activity = last_rx;
                    lines.push(&buf[..n]);
                    Self::process_lines(&mut protocol, &mut lines, last_rx)
                }
                Err(e) => Err(e),
            }
            .and_then(|_| Self::flush(&mut protocol, transport.as_mut()));
            if let Err(e) = read {
                match self.recover(&mut protocol, transport, e) {
                    Some(t) => {
                        transport = t;
                        last_rx = Instant::now();
                        last_activity = last_rx;
                        continue;
                    }
                    None => return,
                }
            }
            if self.ctx.state.get().is_error() {
                tracing::error!("Closing link to {} after printer error", self.port);
                close_link(transport.as_mut(), &self.port);
                self.ctx.events.emit(PrinterEvent::ConnectionClosed);
                return;
            }

            // 4. LINK LOSS PHASE
            if self.ctx.state.get().is_printing_or_paused() && last_rx.elapsed() >= link_loss {
                tracing::warn!("No data from {} for {:?}", self.port, link_loss);
                let e = ConnectionError::ConnectionLost {
                    reason: format!("silent for {}ms", link_loss.as_millis()),
                };
                match self.recover(&mut protocol, transport, e.into()) {
                    Some(t) => {
                        transport = t;
                        last_rx = Instant::now();
                        last_activity = last_rx;
                    }
                    None => return,
                }
            }
        }
    }

    fn process_lines(
        protocol: &mut MarlinProtocol,
        lines: &mut LineBuffer,
        now: Instant,
    ) -> Result<()> {
        while let Some(line) = lines.next_line() {
            tracing::trace!("< {}", line);
            protocol.handle_line(&line, now)?;
        }
        Ok(())
    }

    fn flush(protocol: &mut MarlinProtocol, transport: &mut dyn Transport) -> Result<()> {
        for bytes in protocol.take_outgoing() {
            transport.write_all(&bytes)?;
        }
        Ok(())
    }

    /// Handle a link failure; returns the new transport when the link came back
    fn recover(
        &mut self,
        protocol: &mut MarlinProtocol,
        mut transport: Box<dyn Transport>,
        error: Error,
    ) -> Option<Box<dyn Transport>> {
        close_link(transport.as_mut(), &self.port);
        drop(transport);

        if !error.is_connection_error() {
            tracing::error!("Protocol failure: {}", error);
        }
        if !self.ctx.state.get().is_printing_or_paused() {
            tracing::error!("Link to {} failed: {}", self.port, error);
            self.ctx.state.set(PrinterState::ClosedWithError);
            self.ctx.events.emit(PrinterEvent::ConnectionError {
                reason: error.to_string(),
            });
            return None;
        }

        let attempts = self.ctx.config.reconnect_attempts;
        for attempt in 1..=attempts {
            std::thread::sleep(self.ctx.config.retry_backoff());
            tracing::info!(
                "Reconnecting to {} (attempt {}/{})",
                self.port,
                attempt,
                attempts
            );
            match self.ctx.provider.open(&self.port, self.baud_rate) {
                Ok(mut t) => {
                    let restored = protocol
                        .on_reconnected(Instant::now())
                        .and_then(|_| Self::flush(protocol, t.as_mut()));
                    match restored {
                        Ok(()) => return Some(t),
                        Err(e) => tracing::warn!("Reconnect attempt failed: {}", e),
                    }
                }
                Err(e) => tracing::warn!("Reconnect attempt failed: {}", e),
            }
        }

        tracing::error!("Giving up on {} after {} attempts", self.port, attempts);
        protocol.fail(FailureReason::LinkLost(error.to_string()), PrinterState::Error);
        self.ctx.events.emit(PrinterEvent::ConnectionError {
            reason: error.to_string(),
        });
        None
    }
}

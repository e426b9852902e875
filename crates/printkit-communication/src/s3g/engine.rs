//! S3G engine, its monitor thread and its poll thread
//!
//! The monitor thread owns the [`S3gLink`]. Each loop iteration it:
//! 1. handles queued requests (manual commands, job control, polls)
//! 2. runs a pending cancel
//! 3. streams a batch of job packets, holding a packet back while the
//!    printer reports buffer overflow
//!
//! The poll thread only posts [`EngineRequest::PollNow`]; queries run on
//! the monitor thread between job packets.

use super::commands::S3gCommand;
use super::job::{JobPacket, S3gJobReader};
use super::opcodes::axes;
use super::session::{S3gLink, SendOutcome};
use crate::engine::{Engine, EngineContext, EngineHandle, EngineRequest};
use crate::job::{PrintJob, ProgressThrottle, SelectedFile};
use printkit_core::{
    Axis, CalibrationProfile, ConnectionError, ControllerError, DriverKind, Error, FailureReason,
    HeaterKind, JobOutcome, PrinterEvent, PrinterState, ProtocolError, Result, TemperatureReading,
    TemperatureSample, AUTO_PORT,
};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Idle delay of the monitor loop
const LOOP_DELAY: Duration = Duration::from_millis(10);

/// Sleep granularity of the poll thread
const POLL_SLICE: Duration = Duration::from_millis(50);

/// Packets streamed per loop iteration before requests are checked again
const STREAM_BATCH: usize = 32;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Interval between progress updates on the printer display
const DISPLAY_INTERVAL: Duration = Duration::from_secs(5);

/// Homing speed in microseconds per step
const HOME_FEEDRATE: u32 = 500;

/// Homing timeout in seconds
const HOME_TIMEOUT_S: u16 = 30;

/// Baud rate used when none is configured
const DEFAULT_BAUD: u32 = 115200;

/// Binary protocol engine
pub struct S3gEngine {
    ctx: EngineContext,
    handle: Option<EngineHandle>,
}

impl S3gEngine {
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

impl Engine for S3gEngine {
    fn driver(&self) -> DriverKind {
        DriverKind::S3g
    }

    fn start(&mut self, port: &str, baud_rate: u32) -> Result<()> {
        if self.handle.is_some() {
            return Err(ControllerError::CommandRejected {
                reason: "engine already started".to_string(),
            }
            .into());
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let mut handle = EngineHandle::new(tx.clone(), self.ctx.cancel.clone());
        let baud_rate = if baud_rate == 0 {
            DEFAULT_BAUD
        } else {
            baud_rate
        };
        let monitor = S3gMonitor::new(self.ctx.clone(), rx, port.to_string(), baud_rate);
        let thread = std::thread::Builder::new()
            .name("s3g-monitor".to_string())
            .spawn(move || monitor.run())
            .map_err(|e| Error::other(format!("Failed to spawn monitor thread: {}", e)))?;
        handle.attach(thread);

        let interval = self.ctx.config.timeouts.temperature_poll();
        let poller = std::thread::Builder::new()
            .name("s3g-poll".to_string())
            .spawn(move || poll_loop(tx, interval))
            .map_err(|e| Error::other(format!("Failed to spawn poll thread: {}", e)))?;
        handle.attach(poller);

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

impl Drop for S3gEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Post a poll request every `interval` until the monitor goes away
fn poll_loop(tx: mpsc::UnboundedSender<EngineRequest>, interval: Duration) {
    let mut last = Instant::now();
    loop {
        std::thread::sleep(POLL_SLICE);
        if tx.is_closed() {
            return;
        }
        if last.elapsed() >= interval {
            last = Instant::now();
            if tx.send(EngineRequest::PollNow).is_err() {
                return;
            }
        }
    }
}

/// Streaming state of the running job
struct ActiveJob {
    job: PrintJob,
    reader: S3gJobReader,
    pending: Option<JobPacket>,
    progress: ProgressThrottle,
    display: ProgressThrottle,
    last_z: Option<f64>,
}

/// How a loop iteration ended
enum Flow {
    Continue,
    Stop,
}

struct S3gMonitor {
    ctx: EngineContext,
    rx: mpsc::UnboundedReceiver<EngineRequest>,
    port: String,
    baud_rate: u32,
    calibration: CalibrationProfile,
    temperatures: TemperatureSample,
    selected: Option<SelectedFile>,
    /// Selection not yet started or cancelled
    selection_pending: bool,
    active: Option<ActiveJob>,
}

impl S3gMonitor {
    fn new(
        ctx: EngineContext,
        rx: mpsc::UnboundedReceiver<EngineRequest>,
        port: String,
        baud_rate: u32,
    ) -> Self {
        let calibration = ctx.profile.calibration.clone();
        Self {
            ctx,
            rx,
            port,
            baud_rate,
            calibration,
            temperatures: TemperatureSample::default(),
            selected: None,
            selection_pending: false,
            active: None,
        }
    }

    fn run(mut self) {
        self.ctx.state.set(PrinterState::OpeningLink);
        let mut link = match self.establish() {
            Ok(link) => link,
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
        self.ctx.state.set(PrinterState::Operational);
        self.io_loop(&mut link);
    }

    fn open_link(&self, port: &str) -> Result<S3gLink> {
        let transport = self.ctx.provider.open(port, self.baud_rate)?;
        Ok(S3gLink::new(
            transport,
            self.ctx.config.transmission_retries,
            self.ctx.config.retry_backoff(),
            self.ctx.config.timeouts.read(),
        )
        .with_cancel_flag(self.ctx.cancel.clone()))
    }

    fn establish(&mut self) -> Result<S3gLink> {
        if !self.port.eq_ignore_ascii_case(AUTO_PORT) {
            let mut link = self.open_link(&self.port)?;
            self.ctx.state.set(PrinterState::Connecting);
            if let Err(e) = self.handshake(&mut link) {
                close_link(&mut link, &self.port);
                return Err(e);
            }
            return Ok(link);
        }

        self.ctx.state.set(PrinterState::DetectingLink);
        let candidates: Vec<_> = self
            .ctx
            .provider
            .list_ports()?
            .into_iter()
            .filter(|p| p.is_makerbot())
            .collect();
        for info in candidates {
            tracing::debug!("Trying {}", info.port_name);
            let mut link = match self.open_link(&info.port_name) {
                Ok(link) => link,
                Err(e) => {
                    tracing::debug!("Skipping {}: {}", info.port_name, e);
                    continue;
                }
            };
            match self.handshake(&mut link) {
                Ok(()) => {
                    tracing::info!("Printer found on {}", info.port_name);
                    self.port = info.port_name;
                    return Ok(link);
                }
                Err(e) => {
                    tracing::debug!("No printer on {}: {}", info.port_name, e);
                    close_link(&mut link, &info.port_name);
                }
            }
        }
        Err(ConnectionError::NoDeviceDetected.into())
    }

    /// Version handshake, then EEPROM calibration
    fn handshake(&mut self, link: &mut S3gLink) -> Result<()> {
        let version = link.get_version()?;
        tracing::info!("Firmware version {}.{}", version / 100, version % 100);
        let mut calibration = self.ctx.profile.calibration.clone();
        match link.load_calibration(&mut calibration, &self.ctx.profile.eeprom) {
            Ok(()) => self.calibration = calibration,
            Err(e) if e.is_connection_error() => return Err(e),
            Err(e) => tracing::warn!("Using profile calibration, EEPROM read failed: {}", e),
        }
        Ok(())
    }

    fn io_loop(&mut self, link: &mut S3gLink) {
        loop {
            // 1. REQUEST PHASE
            let mut disconnect = false;
            loop {
                match self.rx.try_recv() {
                    Ok(EngineRequest::Disconnect) => {
                        disconnect = true;
                        break;
                    }
                    Ok(request) => {
                        let result = self.handle_request(link, request);
                        if let Err(e) = result {
                            if let Flow::Stop = self.handle_error(link, e) {
                                return;
                            }
                        }
                    }
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        disconnect = true;
                        break;
                    }
                }
            }
            if disconnect {
                tracing::info!("Disconnecting from {}", self.port);
                if self.ctx.take_cancel() {
                    if let Err(e) = self.perform_cancel(link) {
                        tracing::debug!("Disable sequence not delivered: {}", e);
                    }
                }
                close_link(link, &self.port);
                self.fail_job(FailureReason::LinkLost("disconnected".to_string()));
                self.ctx.state.set(PrinterState::Closed);
                self.ctx.events.emit(PrinterEvent::ConnectionClosed);
                return;
            }

            // 2. CANCEL PHASE
            if self.ctx.take_cancel() {
                if let Err(e) = self.perform_cancel(link) {
                    if let Flow::Stop = self.handle_error(link, e) {
                        return;
                    }
                }
            }

            // 3. STREAM PHASE
            let streaming = self.active.as_ref().is_some_and(|a| a.job.is_running());
            if !streaming {
                std::thread::sleep(LOOP_DELAY);
                continue;
            }
            match self.stream_batch(link) {
                Ok(true) => {}
                Ok(false) => std::thread::sleep(self.ctx.config.retry_backoff()),
                Err(e) => {
                    if let Flow::Stop = self.handle_error(link, e) {
                        return;
                    }
                }
            }
        }
    }

    /// Map an engine error to a state change; `Stop` ends the monitor
    fn handle_error(&mut self, link: &mut S3gLink, error: Error) -> Flow {
        match &error {
            Error::Protocol(ProtocolError::CancelBuild) => {
                tracing::warn!("Printer cancelled the build");
                if let Err(e) = self.finish_cancelled(link, false) {
                    return self.handle_error(link, e);
                }
                Flow::Continue
            }
            Error::Protocol(ProtocolError::BufferOverflow) if self.ctx.cancel_pending() => {
                Flow::Continue
            }
            Error::Protocol(ProtocolError::CommandRejected { .. }) => {
                tracing::warn!("{}", error);
                if self.active.is_some() {
                    self.fail_job(FailureReason::PrinterError(error.to_string()));
                    self.ctx.state.set(PrinterState::Operational);
                }
                Flow::Continue
            }
            Error::Protocol(ProtocolError::MalformedPacket { .. })
            | Error::Protocol(ProtocolError::UnknownOpcode { .. })
            | Error::Job(_) => {
                tracing::error!("Job stream unusable: {}", error);
                if self.active.is_some() {
                    self.fail_job(FailureReason::File(error.to_string()));
                    self.ctx.state.set(PrinterState::Operational);
                }
                Flow::Continue
            }
            _ => {
                tracing::error!("Link to {} failed: {}", self.port, error);
                close_link(link, &self.port);
                let reason = if error.is_connection_error() {
                    FailureReason::LinkLost(error.to_string())
                } else {
                    FailureReason::Transmission(error.to_string())
                };
                self.fail_job(reason);
                self.ctx.state.set(PrinterState::ClosedWithError);
                self.ctx.events.emit(PrinterEvent::ConnectionError {
                    reason: error.to_string(),
                });
                Flow::Stop
            }
        }
    }

    fn handle_request(&mut self, link: &mut S3gLink, request: EngineRequest) -> Result<()> {
        let job_running = self.active.is_some();
        match request {
            EngineRequest::Jog { axis, distance_mm } if !job_running => {
                if axis == Axis::E {
                    let feed = self.ctx.profile.feed_rates.e;
                    return self.extrude(link, 0, distance_mm, feed);
                }
                let index = axis_index(axis);
                let feed = match axis {
                    Axis::X => self.ctx.profile.feed_rates.x,
                    Axis::Y => self.ctx.profile.feed_rates.y,
                    _ => self.ctx.profile.feed_rates.z,
                };
                let mut steps = [0i32; 5];
                steps[index] = self.calibration.axes[index].mm_to_steps(distance_mm);
                link.command(&S3gCommand::QueueExtendedPointNew {
                    steps,
                    duration_us: move_duration_us(distance_mm, feed),
                    relative: axes::ALL,
                })?;
            }
            EngineRequest::Home(requested) if !job_running => {
                let requested = if requested.is_empty() {
                    vec![Axis::X, Axis::Y, Axis::Z]
                } else {
                    requested
                };
                let xy = requested.iter().fold(0u8, |mask, axis| match axis {
                    Axis::X => mask | axes::X,
                    Axis::Y => mask | axes::Y,
                    _ => mask,
                });
                if xy != 0 {
                    link.command(&S3gCommand::FindAxesMaximums {
                        axes: xy,
                        feedrate: HOME_FEEDRATE,
                        timeout_s: HOME_TIMEOUT_S,
                    })?;
                }
                if requested.contains(&Axis::Z) {
                    link.command(&S3gCommand::FindAxesMinimums {
                        axes: axes::Z,
                        feedrate: HOME_FEEDRATE,
                        timeout_s: HOME_TIMEOUT_S,
                    })?;
                }
            }
            EngineRequest::Extrude {
                tool,
                amount_mm,
                speed,
            } if !job_running => {
                let feed = speed.unwrap_or(self.ctx.profile.feed_rates.e);
                return self.extrude(link, tool, amount_mm, feed);
            }
            EngineRequest::ChangeTool(tool) if !job_running => {
                link.command(&S3gCommand::ChangeTool(tool))?;
                self.ctx.events.emit(PrinterEvent::ToolChanged(tool));
            }
            EngineRequest::Jog { .. }
            | EngineRequest::Home(_)
            | EngineRequest::Extrude { .. }
            | EngineRequest::ChangeTool(_) => {
                tracing::warn!("Motion command ignored while a job is active");
            }
            EngineRequest::Fan { tool, speed } => {
                link.command(&S3gCommand::set_fan(tool, speed > 0))?;
            }
            EngineRequest::SetTemperature { heater, celsius } => {
                let command = match heater {
                    HeaterKind::Tool(t) => S3gCommand::set_toolhead_temperature(t, to_i16(celsius)),
                    HeaterKind::Bed => S3gCommand::set_platform_temperature(to_i16(celsius)),
                };
                link.command(&command)?;
                self.temperatures.set_target(heater, celsius);
                self.ctx
                    .events
                    .emit(PrinterEvent::TargetTemperature { heater, celsius });
            }
            EngineRequest::Raw(line) => {
                tracing::warn!("Raw command '{}' not supported by the binary protocol", line);
            }
            EngineRequest::SelectFile { path, size } => {
                if self.active.is_some() {
                    tracing::warn!("File selection ignored while a job is active");
                    return Ok(());
                }
                tracing::info!("Selected {} ({} bytes)", path.display(), size);
                self.ctx.events.emit(PrinterEvent::FileSelected {
                    path: path.clone(),
                    size,
                });
                self.selected = Some(SelectedFile { path, size });
                self.selection_pending = true;
            }
            EngineRequest::StartPrint => self.start_print(link)?,
            EngineRequest::SetPaused(paused) => self.set_paused(link, paused)?,
            EngineRequest::Cancel => {}
            EngineRequest::PollNow => self.poll_temperatures(link)?,
            EngineRequest::Disconnect => {}
        }
        Ok(())
    }

    fn extrude(&mut self, link: &mut S3gLink, tool: u8, amount_mm: f64, feed: f64) -> Result<()> {
        let index = if tool == 0 { 3 } else { 4 };
        let mut steps = [0i32; 5];
        steps[index] = self.calibration.extruder(tool).mm_to_steps(amount_mm);
        link.command(&S3gCommand::QueueExtendedPointNew {
            steps,
            duration_us: move_duration_us(amount_mm, feed),
            relative: axes::ALL,
        })?;
        Ok(())
    }

    fn poll_temperatures(&mut self, link: &mut S3gLink) -> Result<()> {
        let mut reading = TemperatureReading::default();
        for tool in 0..self.ctx.profile.extruder_count {
            reading.tools.insert(tool, link.tool_temperature(tool)?);
        }
        if self.ctx.profile.heated_bed {
            reading.bed = Some(link.platform_temperature()?);
        }
        self.temperatures.apply(&reading);
        self.ctx
            .events
            .emit(PrinterEvent::Temperature(self.temperatures.clone()));
        Ok(())
    }

    fn start_print(&mut self, link: &mut S3gLink) -> Result<()> {
        if self.active.is_some() {
            tracing::warn!("Start ignored, a job is already active");
            return Ok(());
        }
        let Some(selected) = self.selected.clone() else {
            tracing::warn!("Start ignored, no file selected");
            self.ctx.state.set_job_active(false);
            return Ok(());
        };
        let reader = match S3gJobReader::open(&selected.path, self.calibration.clone()) {
            Ok(reader) => reader,
            Err(e) => {
                tracing::error!("Cannot start job: {}", e);
                self.ctx.state.set_job_active(false);
                return Ok(());
            }
        };
        let name = selected
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        link.command(&S3gCommand::BuildStart { steps: 0, name })?;

        let mut job = PrintJob::new(&selected);
        let event = job.start()?;
        self.ctx.events.emit(event);
        self.active = Some(ActiveJob {
            job,
            reader,
            pending: None,
            progress: ProgressThrottle::new(PROGRESS_INTERVAL),
            display: ProgressThrottle::new(DISPLAY_INTERVAL),
            last_z: None,
        });
        self.selection_pending = false;
        self.ctx.state.set_job_active(true);
        self.ctx.state.set(PrinterState::Printing);
        Ok(())
    }

    fn set_paused(&mut self, link: &mut S3gLink, paused: bool) -> Result<()> {
        let Some(active) = self.active.as_mut() else {
            tracing::debug!("Pause ignored, no job");
            return Ok(());
        };
        if active.job.is_running() != paused {
            return Ok(());
        }
        link.command(&S3gCommand::Pause)?;
        let (result, state) = if paused {
            (active.job.pause(), PrinterState::Paused)
        } else {
            (active.job.resume(), PrinterState::Printing)
        };
        result?;
        self.ctx.state.set(state);
        Ok(())
    }

    /// Send packets until the batch is done; `false` means the printer is full
    fn stream_batch(&mut self, link: &mut S3gLink) -> Result<bool> {
        for _ in 0..STREAM_BATCH {
            if self.ctx.cancel_pending() {
                return Ok(true);
            }
            let Some(active) = self.active.as_mut() else {
                return Ok(true);
            };
            let packet = match active.pending.take() {
                Some(packet) => packet,
                None => match active.reader.next_packet()? {
                    Some(packet) => packet,
                    None => {
                        self.complete(link)?;
                        return Ok(true);
                    }
                },
            };
            match link.send(&packet.payload)? {
                SendOutcome::Overflow => {
                    tracing::trace!("Printer buffer full, holding packet");
                    active.pending = Some(packet);
                    return Ok(false);
                }
                SendOutcome::Accepted(_) => self.after_packet(link, &packet)?,
            }
        }
        Ok(true)
    }

    fn after_packet(&mut self, link: &mut S3gLink, packet: &JobPacket) -> Result<()> {
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };
        let now = Instant::now();
        if let Some(motion) = packet.motion {
            if active.last_z != Some(motion.z_mm) {
                active.last_z = Some(motion.z_mm);
                self.ctx.events.emit(PrinterEvent::ZChanged(motion.z_mm));
            }
            if let Some(event) = active.job.observe_move(motion.z_mm, motion.extruding) {
                self.ctx.events.emit(event);
            }
        }
        let progress = active.job.advance(packet.end_offset);
        let percent = active.job.percent();
        if active.progress.should_report(percent, now) {
            self.ctx.events.emit(progress);
        }
        if active.display.should_report(percent, now) {
            link.command(&S3gCommand::SetBuildPercent(percent))?;
        }
        Ok(())
    }

    /// End of file: park, notify the printer, complete the job
    fn complete(&mut self, link: &mut S3gLink) -> Result<()> {
        let Some(active) = self.active.as_ref() else {
            return Ok(());
        };
        tracing::info!("Job stream finished, parking");
        link.command(&S3gCommand::FindAxesMaximums {
            axes: axes::X | axes::Y,
            feedrate: HOME_FEEDRATE,
            timeout_s: HOME_TIMEOUT_S,
        })?;
        if active.reader.z_homed() {
            let z = self.calibration.z();
            let current_mm = z.steps_to_mm(active.reader.steps()[2]);
            let travel_mm = z.platform_length_mm - current_mm;
            link.command(&S3gCommand::QueueExtendedPointNew {
                steps: [0, 0, z.max_steps(), 0, 0],
                duration_us: move_duration_us(travel_mm, self.ctx.profile.feed_rates.z),
                relative: axes::ALL & !axes::Z,
            })?;
        }
        link.command(&S3gCommand::EnableAxes {
            axes: axes::ALL,
            enable: false,
        })?;
        link.command(&S3gCommand::BuildEnd)?;

        if let Some(mut active) = self.active.take() {
            self.ctx
                .events
                .emit(active.job.advance(active.reader.position()));
            let event = active.job.finish(JobOutcome::Completed)?;
            self.ctx.events.emit(event);
        }
        self.ctx.state.set_job_active(false);
        self.ctx.state.set(PrinterState::Operational);
        Ok(())
    }

    fn perform_cancel(&mut self, link: &mut S3gLink) -> Result<()> {
        if self.active.is_none() && !self.selection_pending {
            tracing::debug!("Cancel ignored, no job to cancel");
            return Ok(());
        }
        tracing::info!("Cancelling print");
        self.finish_cancelled(link, true)
    }

    /// Disable heaters and motors once and report `Cancelled`
    fn finish_cancelled(&mut self, link: &mut S3gLink, abort: bool) -> Result<()> {
        let started = self.active.is_some();
        let mut job = match self.active.take() {
            Some(active) => active.job,
            None => match &self.selected {
                Some(selected) if self.selection_pending => {
                    self.selection_pending = false;
                    PrintJob::new(selected)
                }
                _ => return Ok(()),
            },
        };
        match job.finish(JobOutcome::Cancelled) {
            Ok(event) => self.ctx.events.emit(event),
            Err(e) => tracing::warn!("Job could not be cancelled: {}", e),
        }
        if self.ctx.state.get().is_printing_or_paused() {
            self.ctx.state.set(PrinterState::Operational);
        }
        self.ctx.state.set_job_active(false);

        if abort && started {
            link.command(&S3gCommand::AbortImmediately)?;
        }
        for tool in 0..self.ctx.profile.extruder_count {
            link.command(&S3gCommand::set_toolhead_temperature(tool, 0))?;
        }
        if self.ctx.profile.heated_bed {
            link.command(&S3gCommand::set_platform_temperature(0))?;
        }
        link.command(&S3gCommand::EnableAxes {
            axes: axes::ALL,
            enable: false,
        })?;
        if started {
            link.command(&S3gCommand::BuildEnd)?;
        }
        Ok(())
    }

    fn fail_job(&mut self, reason: FailureReason) {
        if let Some(mut active) = self.active.take() {
            match active.job.finish(JobOutcome::Failed(reason)) {
                Ok(event) => self.ctx.events.emit(event),
                Err(e) => tracing::warn!("Job could not be failed: {}", e),
            }
        }
        self.ctx.state.set_job_active(false);
    }
}

/// Close a link; a failure is only logged since the link is going away
fn close_link(link: &mut S3gLink, port: &str) {
    if let Err(e) = link.close() {
        tracing::warn!("Failed to close {}: {}", port, e);
    }
}

fn axis_index(axis: Axis) -> usize {
    match axis {
        Axis::X => 0,
        Axis::Y => 1,
        Axis::Z => 2,
        Axis::E => 3,
    }
}

/// Duration of a move of `distance_mm` at `feed_mm_per_min`
fn move_duration_us(distance_mm: f64, feed_mm_per_min: f64) -> u32 {
    if feed_mm_per_min <= 0.0 {
        return 0;
    }
    let us = distance_mm.abs() / feed_mm_per_min * 60_000_000.0;
    us.round().min(u32::MAX as f64) as u32
}

fn to_i16(celsius: f64) -> i16 {
    celsius.round().clamp(0.0, i16::MAX as f64) as i16
}

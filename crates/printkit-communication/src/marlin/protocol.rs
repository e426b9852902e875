//! Marlin line protocol state machine
//!
//! [`MarlinProtocol`] owns everything above the byte stream: line numbering
//! and checksums, the resend history, the outbound queue, the print job and
//! the host-side machine model. It never touches a transport. Received
//! lines and read timeouts go in; wire bytes come out of
//! [`take_outgoing`](MarlinProtocol::take_outgoing) and events go to the
//! engine's sink.
//!
//! Flow control is ping-pong: one command is in flight until the printer
//! answers `ok`. When nothing is in flight the next command is chosen in
//! this order:
//! 1. pending resend replay
//! 2. queued commands (user, pause/resume/cancel sequences)
//! 3. temperature poll, when due and no heating wait is running
//! 4. next line of the running job

use super::history::{LineHistory, PendingResend};
use super::interceptors::{format_number, Disposition, Effect, MachineModel, MarlinOpcode};
use super::response::{parse_response, MarlinResponse};
use crate::command::{CommandOrigin, OutboundCommand};
use crate::engine::{EngineContext, EngineRequest, StateCell};
use crate::job::{GcodeFile, PrintJob, ProgressThrottle, SelectedFile};
use printkit_core::{
    Axis, ConnectionConfig, EventSink, FailureReason, HeaterKind, JobOutcome, MessageDirection,
    Position, PrintJobState, PrinterEvent, PrinterProfile, PrinterState, Result,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Machine state captured when a job is paused
#[derive(Debug, Clone, PartialEq)]
pub struct PauseCapture {
    /// Position to return to; replaced by the `M114` answer when it arrives
    pub position: Position,
    /// Position came from the printer rather than the host model
    pub reported: bool,
    /// The job was in relative positioning mode
    pub relative: bool,
    /// Feed rate in effect at pause time
    pub feed_rate: f64,
    /// Fan PWM at pause time
    pub fan_speed: u8,
    /// Filament retracted by the pause sequence
    pub retracted_mm: f64,
    /// Z lift applied by the pause sequence
    pub lifted_mm: f64,
}

/// ASCII protocol state
pub struct MarlinProtocol {
    config: ConnectionConfig,
    profile: PrinterProfile,
    events: EventSink,
    state: StateCell,
    cancel: Arc<AtomicBool>,
    current_line: u32,
    history: LineHistory,
    pending_resend: Option<PendingResend>,
    in_flight: u32,
    probe_sent: bool,
    heating_interrupted: bool,
    halted: bool,
    queue: VecDeque<OutboundCommand>,
    selected: Option<SelectedFile>,
    /// Selection not yet started or cancelled
    selection_pending: bool,
    job: Option<PrintJob>,
    file: Option<GcodeFile>,
    progress: ProgressThrottle,
    model: MachineModel,
    pause: Option<PauseCapture>,
    last_poll: Option<Instant>,
    outgoing: VecDeque<Vec<u8>>,
}

impl MarlinProtocol {
    /// Create protocol state for one connection
    pub fn new(ctx: &EngineContext) -> Self {
        Self {
            config: ctx.config.clone(),
            profile: ctx.profile.clone(),
            events: ctx.events.clone(),
            state: ctx.state.clone(),
            cancel: ctx.cancel.clone(),
            current_line: 1,
            history: LineHistory::new(ctx.config.resend_history),
            pending_resend: None,
            in_flight: 0,
            probe_sent: false,
            heating_interrupted: false,
            halted: false,
            queue: VecDeque::new(),
            selected: None,
            selection_pending: false,
            job: None,
            file: None,
            progress: ProgressThrottle::new(PROGRESS_INTERVAL),
            model: MachineModel::new(&ctx.profile, ctx.config.heatup_ok_count),
            pause: None,
            last_poll: None,
            outgoing: VecDeque::new(),
        }
    }

    /// Wire bytes produced since the last call, in send order
    pub fn take_outgoing(&mut self) -> Vec<Vec<u8>> {
        self.outgoing.drain(..).collect()
    }

    /// Next line number to be assigned
    pub fn current_line(&self) -> u32 {
        self.current_line
    }

    /// Commands awaiting `ok`
    pub fn in_flight(&self) -> u32 {
        self.in_flight
    }

    /// Resend request being replayed
    pub fn pending_resend(&self) -> Option<PendingResend> {
        self.pending_resend
    }

    /// Host-side machine model
    pub fn model(&self) -> &MachineModel {
        &self.model
    }

    /// Captured pause state
    pub fn pause_capture(&self) -> Option<&PauseCapture> {
        self.pause.as_ref()
    }

    /// Check if an emergency stop was sent
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Check if a job is running or paused
    pub fn has_job(&self) -> bool {
        self.job.is_some()
    }

    /// The link answered; start from a clean slate
    pub fn on_connected(&mut self, now: Instant) -> Result<()> {
        self.reset_link_state();
        self.last_poll = None;
        self.pump(now)
    }

    /// Process one received line
    pub fn handle_line(&mut self, line: &str, now: Instant) -> Result<()> {
        if !line.trim().is_empty() {
            self.events.emit(PrinterEvent::Message {
                direction: MessageDirection::Received,
                line: line.to_string(),
            });
        }
        let response = parse_response(line, self.model.tool);
        if let Some(reading) = response.temperatures() {
            self.model.temperatures.apply(reading);
            self.events
                .emit(PrinterEvent::Temperature(self.model.temperatures.clone()));
        }

        match response {
            MarlinResponse::Ok { .. } => {
                self.in_flight = self.in_flight.saturating_sub(1);
                self.probe_sent = false;
                if let Some(event) = self.model.on_ok() {
                    self.events.emit(event);
                }
                self.pump(now)?;
            }
            MarlinResponse::Resend { line } => self.handle_resend(line),
            MarlinResponse::Error {
                message,
                recoverable,
            } => {
                if recoverable {
                    tracing::warn!("Printer reported transmission error: {}", message);
                } else {
                    tracing::error!("Printer reported fatal error: {}", message);
                    self.fail(FailureReason::PrinterError(message), PrinterState::Error);
                }
            }
            MarlinResponse::Position(position) => {
                self.model.position = position;
                if self.model.awaiting_position {
                    self.model.awaiting_position = false;
                    if let Some(capture) = self.pause.as_mut().filter(|c| !c.reported) {
                        capture.position = position;
                        capture.reported = true;
                        tracing::debug!("Pause position captured: {}", position);
                    }
                }
            }
            MarlinResponse::Start => self.handle_firmware_start(),
            MarlinResponse::Busy
            | MarlinResponse::Temperature(_)
            | MarlinResponse::Empty
            | MarlinResponse::Unknown(_) => {}
        }
        Ok(())
    }

    /// No data arrived within the read timeout
    pub fn on_read_timeout(&mut self, now: Instant) -> Result<()> {
        if self.halted {
            return Ok(());
        }
        if self.in_flight == 0 {
            tracing::debug!("Read timeout while idle, probing");
            self.send_probe();
            self.in_flight = 1;
            return Ok(());
        }
        if self.pending_resend.is_some() {
            tracing::debug!("Read timeout with resend pending, replaying");
            self.in_flight = 0;
            return self.pump(now);
        }
        if self.model.heating {
            return Ok(());
        }
        if !self.probe_sent {
            tracing::debug!("Read timeout with a line in flight, probing");
            self.send_probe();
            self.probe_sent = true;
        } else {
            tracing::warn!("No answer to probe, assuming the acknowledgement was lost");
            self.in_flight = 0;
            self.probe_sent = false;
            self.pump(now)?;
        }
        Ok(())
    }

    /// Translate and queue a façade request
    pub fn handle_request(&mut self, request: EngineRequest, now: Instant) -> Result<()> {
        match request {
            EngineRequest::Jog { axis, distance_mm } => {
                let feed = self.feed_rate(axis);
                self.enqueue_relative(&format!(
                    "G1 {}{} F{}",
                    axis.letter(),
                    format_number(distance_mm),
                    format_number(feed)
                ));
            }
            EngineRequest::Home(axes) => {
                let mut command = "G28".to_string();
                for axis in axes.iter().filter(|a| **a != Axis::E) {
                    command.push(' ');
                    command.push(axis.letter());
                }
                self.enqueue(command, CommandOrigin::User);
            }
            EngineRequest::Extrude {
                tool,
                amount_mm,
                speed,
            } => {
                if tool != self.model.tool {
                    self.enqueue(format!("T{}", tool), CommandOrigin::User);
                }
                let feed = speed.unwrap_or(self.profile.feed_rates.e);
                self.enqueue_relative(&format!(
                    "G1 E{} F{}",
                    format_number(amount_mm),
                    format_number(feed)
                ));
            }
            EngineRequest::ChangeTool(tool) => {
                self.enqueue(format!("T{}", tool), CommandOrigin::User)
            }
            EngineRequest::Fan { tool, speed } => {
                let command = match (speed, tool) {
                    (0, 0) => "M107".to_string(),
                    (0, t) => format!("M107 P{}", t),
                    (s, 0) => format!("M106 S{}", s),
                    (s, t) => format!("M106 P{} S{}", t, s),
                };
                self.enqueue(command, CommandOrigin::User);
            }
            EngineRequest::SetTemperature { heater, celsius } => {
                let command = match heater {
                    HeaterKind::Tool(t) => format!("M104 T{} S{}", t, format_number(celsius)),
                    HeaterKind::Bed => format!("M140 S{}", format_number(celsius)),
                };
                self.enqueue(command, CommandOrigin::User);
            }
            EngineRequest::Raw(line) => {
                let line = line.trim();
                if line.is_empty() {
                    return Ok(());
                }
                if MarlinOpcode::parse(line) == MarlinOpcode::M112 {
                    self.emergency_stop();
                    return Ok(());
                }
                self.enqueue(line.to_string(), CommandOrigin::User);
            }
            EngineRequest::SelectFile { path, size } => self.select_file(SelectedFile { path, size }),
            EngineRequest::StartPrint => self.start_print(),
            EngineRequest::SetPaused(true) => self.pause_job(),
            EngineRequest::SetPaused(false) => self.resume_job(),
            EngineRequest::Cancel => return self.service_cancel(now),
            EngineRequest::PollNow => self.last_poll = None,
            EngineRequest::Disconnect => return Ok(()),
        }
        self.pump(now)
    }

    /// Act on a pending cancel request
    ///
    /// The cancel runs once nothing is in flight. A heating wait blocks the
    /// firmware, so it is interrupted with `M108` first.
    pub fn service_cancel(&mut self, now: Instant) -> Result<()> {
        if !self.cancel.load(Ordering::Acquire) {
            return Ok(());
        }
        if self.in_flight > 0 {
            if self.model.heating && !self.heating_interrupted {
                tracing::info!("Interrupting heating wait for cancel");
                self.write_plain("M108");
                self.heating_interrupted = true;
            }
            return Ok(());
        }
        self.pump(now)
    }

    /// Run a pending cancel immediately, without waiting for acknowledgements
    ///
    /// Used when the link is about to close, so the disable sequence is
    /// written back to back.
    pub fn cancel_before_close(&mut self) {
        if !self.cancel.swap(false, Ordering::AcqRel) {
            return;
        }
        self.perform_cancel();
        while let Some(command) = self.queue.pop_front() {
            if let Some(text) = command.as_text() {
                self.write_plain(text);
            }
        }
    }

    /// Send the next commands while nothing is in flight
    pub fn pump(&mut self, now: Instant) -> Result<()> {
        while self.in_flight == 0 && !self.halted {
            if self.cancel.swap(false, Ordering::AcqRel) {
                self.perform_cancel();
                continue;
            }
            if self.pending_resend.is_some() {
                self.replay_next();
                continue;
            }
            if let Some(command) = self.queue.pop_front() {
                self.send_command(command)?;
                continue;
            }
            if self.poll_due(now) {
                self.last_poll = Some(now);
                self.send_command(OutboundCommand::text("M105", CommandOrigin::Poll))?;
                continue;
            }
            if self.job.as_ref().is_some_and(|j| j.is_running()) {
                self.send_next_job_line()?;
                continue;
            }
            break;
        }
        Ok(())
    }

    /// Fail the active job and move to `state`
    pub fn fail(&mut self, reason: FailureReason, state: PrinterState) {
        self.queue.clear();
        self.pending_resend = None;
        self.pause = None;
        self.file = None;
        if let Some(event) = self.model.clear_heating() {
            self.events.emit(event);
        }
        if let Some(mut job) = self.job.take() {
            match job.finish(JobOutcome::Failed(reason)) {
                Ok(event) => self.events.emit(event),
                Err(e) => tracing::warn!("Job could not be failed: {}", e),
            }
        }
        self.state.set(state);
    }

    /// Link came back after a loss; repeat the last numbered line
    pub fn on_reconnected(&mut self, now: Instant) -> Result<()> {
        self.in_flight = 0;
        self.probe_sent = false;
        self.pending_resend = None;
        if let Some((line, bytes)) = self.history.last() {
            tracing::info!("Link restored, resending line {}", line);
            let bytes = bytes.to_vec();
            self.write_bytes(bytes);
            self.in_flight = 1;
            return Ok(());
        }
        self.pump(now)
    }

    fn reset_link_state(&mut self) {
        self.in_flight = 0;
        self.probe_sent = false;
        self.pending_resend = None;
        self.history.clear();
        self.current_line = 1;
    }

    fn poll_due(&self, now: Instant) -> bool {
        if self.model.heating {
            return false;
        }
        match self.last_poll {
            None => true,
            Some(last) => now.duration_since(last) >= self.config.timeouts.temperature_poll(),
        }
    }

    fn feed_rate(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.profile.feed_rates.x,
            Axis::Y => self.profile.feed_rates.y,
            Axis::Z => self.profile.feed_rates.z,
            Axis::E => self.profile.feed_rates.e,
        }
    }

    fn enqueue(&mut self, command: String, origin: CommandOrigin) {
        self.queue.push_back(OutboundCommand::text(command, origin));
    }

    fn enqueue_relative(&mut self, command: &str) {
        let restore = if self.model.relative { "G91" } else { "G90" };
        self.enqueue("G91".to_string(), CommandOrigin::User);
        self.enqueue(command.to_string(), CommandOrigin::User);
        self.enqueue(restore.to_string(), CommandOrigin::User);
    }

    fn select_file(&mut self, file: SelectedFile) {
        if self.job.is_some() {
            tracing::warn!("File selection ignored while a job is active");
            return;
        }
        tracing::info!("Selected {} ({} bytes)", file.path.display(), file.size);
        self.events.emit(PrinterEvent::FileSelected {
            path: file.path.clone(),
            size: file.size,
        });
        self.selected = Some(file);
        self.selection_pending = true;
    }

    fn start_print(&mut self) {
        if self.job.is_some() {
            tracing::warn!("Start ignored, a job is already active");
            return;
        }
        let Some(selected) = self.selected.clone() else {
            tracing::warn!("Start ignored, no file selected");
            self.state.set_job_active(false);
            return;
        };
        let file = match GcodeFile::open(&selected.path) {
            Ok(file) => file,
            Err(e) => {
                tracing::error!("Cannot start job: {}", e);
                self.state.set_job_active(false);
                return;
            }
        };
        let mut job = PrintJob::new(&selected);
        match job.start() {
            Ok(event) => self.events.emit(event),
            Err(e) => {
                tracing::error!("Cannot start job: {}", e);
                self.state.set_job_active(false);
                return;
            }
        }
        self.job = Some(job);
        self.selection_pending = false;
        self.file = Some(file);
        self.progress = ProgressThrottle::new(PROGRESS_INTERVAL);
        self.pause = None;
        self.state.set_job_active(true);
        self.state.set(PrinterState::Printing);
        self.queue
            .push_back(OutboundCommand::text("M110 N0", CommandOrigin::System));
    }

    fn pause_job(&mut self) {
        let Some(job) = self.job.as_mut() else {
            tracing::debug!("Pause ignored, no job");
            return;
        };
        if !job.is_running() {
            return;
        }
        if let Err(e) = job.pause() {
            tracing::warn!("Pause rejected: {}", e);
            return;
        }
        self.state.set(PrinterState::Paused);

        let retract = self.profile.pause_retraction_mm.max(0.0);
        let lift = self.profile.pause_lift_mm.max(0.0);
        self.pause = Some(PauseCapture {
            position: self.model.position,
            reported: false,
            relative: self.model.relative,
            feed_rate: self.model.feed_rate,
            fan_speed: self.model.fan_speed,
            retracted_mm: retract,
            lifted_mm: lift,
        });

        self.enqueue("M114".to_string(), CommandOrigin::System);
        self.enqueue("M107".to_string(), CommandOrigin::System);
        if retract > 0.0 || lift > 0.0 {
            self.enqueue("G91".to_string(), CommandOrigin::System);
            if retract > 0.0 {
                self.enqueue(
                    format!(
                        "G1 E-{} F{}",
                        format_number(retract),
                        format_number(self.profile.feed_rates.e)
                    ),
                    CommandOrigin::System,
                );
            }
            if lift > 0.0 {
                self.enqueue(
                    format!(
                        "G1 Z{} F{}",
                        format_number(lift),
                        format_number(self.profile.feed_rates.z)
                    ),
                    CommandOrigin::System,
                );
            }
            self.enqueue("G90".to_string(), CommandOrigin::System);
        }
    }

    fn resume_job(&mut self) {
        let Some(job) = self.job.as_mut() else {
            tracing::debug!("Resume ignored, no job");
            return;
        };
        if job.state() != PrintJobState::Paused {
            return;
        }
        if let Err(e) = job.resume() {
            tracing::warn!("Resume rejected: {}", e);
            return;
        }

        if let Some(capture) = self.pause.take() {
            for command in self.resume_sequence(&capture) {
                self.enqueue(command, CommandOrigin::System);
            }
        }
        self.state.set(PrinterState::Printing);
    }

    fn resume_sequence(&self, capture: &PauseCapture) -> Vec<String> {
        let feeds = &self.profile.feed_rates;
        let p = capture.position;
        let mut commands = Vec::new();
        if capture.lifted_mm > 0.0 || capture.retracted_mm > 0.0 {
            commands.push("G91".to_string());
            if capture.lifted_mm > 0.0 {
                commands.push(format!(
                    "G1 Z-{} F{}",
                    format_number(capture.lifted_mm),
                    format_number(feeds.z)
                ));
            }
            if capture.retracted_mm > 0.0 {
                commands.push(format!(
                    "G1 E{} F{}",
                    format_number(capture.retracted_mm),
                    format_number(feeds.e)
                ));
            }
            commands.push("G90".to_string());
        }
        if capture.fan_speed > 0 {
            commands.push(format!("M106 S{}", capture.fan_speed));
        }
        commands.push(format!("G92 E{}", format_number(p.e)));
        commands.push(format!(
            "G1 X{} Y{} F{}",
            format_number(p.x),
            format_number(p.y),
            format_number(feeds.x.min(feeds.y) * self.profile.resume_feed_factor)
        ));
        commands.push(format!(
            "G1 Z{} F{}",
            format_number(p.z),
            format_number(feeds.z)
        ));
        commands.push(format!("G1 F{}", format_number(capture.feed_rate)));
        if capture.relative {
            commands.push("G91".to_string());
        }
        commands
    }

    fn disable_sequence(&self) -> Vec<String> {
        let mut commands: Vec<String> = (0..self.profile.extruder_count.max(1))
            .map(|t| format!("M104 T{} S0", t))
            .collect();
        if self.profile.heated_bed {
            commands.push("M140 S0".to_string());
        }
        commands.push("M107".to_string());
        commands.push("G91".to_string());
        commands.push(format!(
            "G1 Z{} F{}",
            format_number(self.profile.cancel_lift_mm),
            format_number(self.profile.feed_rates.z)
        ));
        commands.push("G90".to_string());
        commands.push("G28 X Y".to_string());
        commands.push("M84".to_string());
        commands
    }

    fn perform_cancel(&mut self) {
        self.heating_interrupted = false;
        let mut job = match self.job.take() {
            Some(job) => job,
            None => match &self.selected {
                Some(selected) if self.selection_pending => {
                    self.selection_pending = false;
                    PrintJob::new(selected)
                }
                _ => {
                    tracing::debug!("Cancel ignored, no job to cancel");
                    return;
                }
            },
        };
        tracing::info!("Cancelling print");
        self.queue.clear();
        self.pending_resend = None;
        self.pause = None;
        self.file = None;
        if let Some(event) = self.model.clear_heating() {
            self.events.emit(event);
        }

        match job.finish(JobOutcome::Cancelled) {
            Ok(event) => self.events.emit(event),
            Err(e) => tracing::warn!("Job could not be cancelled: {}", e),
        }
        if self.state.get().is_printing_or_paused() {
            self.state.set(PrinterState::Operational);
        }
        self.state.set_job_active(false);

        for command in self.disable_sequence() {
            self.enqueue(command, CommandOrigin::System);
        }
    }

    fn complete(&mut self) {
        let Some(mut job) = self.job.take() else {
            return;
        };
        if let Some(file) = self.file.take() {
            self.events.emit(job.advance(file.position()));
        }
        match job.finish(JobOutcome::Completed) {
            Ok(event) => self.events.emit(event),
            Err(e) => tracing::warn!("Job could not be completed: {}", e),
        }
        self.state.set_job_active(false);
        self.state.set(PrinterState::Operational);
    }

    fn send_next_job_line(&mut self) -> Result<()> {
        let next = match self.file.as_mut() {
            Some(file) => file.next_command(),
            None => Ok(None),
        };
        match next {
            Ok(Some(line)) => {
                let position = self.file.as_ref().map(|f| f.position()).unwrap_or(0);
                if let Some(job) = self.job.as_mut() {
                    let event = job.advance(position);
                    if self.progress.should_report(job.percent(), Instant::now()) {
                        self.events.emit(event);
                    }
                }
                self.send_command(OutboundCommand::text(line, CommandOrigin::Job))
            }
            Ok(None) => {
                self.complete();
                Ok(())
            }
            Err(e) => {
                tracing::error!("Job file error: {}", e);
                self.fail(FailureReason::File(e.to_string()), PrinterState::Operational);
                Ok(())
            }
        }
    }

    fn send_command(&mut self, mut command: OutboundCommand) -> Result<()> {
        let Some(text) = command.as_text().map(str::to_string) else {
            tracing::warn!("Binary command dropped by the ASCII engine");
            return Ok(());
        };
        let disposition = self.model.intercept(&text);
        let mut reset_line = None;
        let mut follow_ups = Vec::new();
        let mut probe = false;
        for effect in self.model.take_effects() {
            match effect {
                Effect::Event(event) => self.events.emit(event),
                Effect::ResetLineNumber(n) => reset_line = Some(n),
                Effect::LocalPause => self.local_pause(),
                Effect::Probe => probe = true,
                Effect::FollowUp(command) => follow_ups.push(command),
                Effect::Move { z, extruding } => {
                    if command.origin() == CommandOrigin::Job {
                        if let Some(event) =
                            self.job.as_mut().and_then(|j| j.observe_move(z, extruding))
                        {
                            self.events.emit(event);
                        }
                    }
                }
            }
        }
        for follow_up in follow_ups.into_iter().rev() {
            self.queue
                .push_front(OutboundCommand::text(follow_up, CommandOrigin::System));
        }

        match disposition {
            Disposition::Suppress => {
                tracing::debug!("Suppressed {}", text);
                if probe {
                    self.send_probe();
                    self.in_flight = 1;
                }
            }
            Disposition::EmergencyStop => self.emergency_stop(),
            Disposition::SendUnnumbered => {
                let bytes = command.encode()?.to_vec();
                command.mark_sent();
                self.write_bytes(bytes);
                self.in_flight = 1;
                if let Some(n) = reset_line {
                    self.history.clear();
                    self.current_line = n + 1;
                }
            }
            Disposition::Send => {
                let numbered = self.state.get().is_printing_or_paused();
                if numbered {
                    command.set_line_number(self.current_line);
                }
                let bytes = command.encode()?.to_vec();
                command.mark_sent();
                if numbered {
                    self.history.push(self.current_line, bytes.clone());
                    self.current_line += 1;
                }
                self.write_bytes(bytes);
                self.in_flight = 1;
            }
        }
        Ok(())
    }

    fn handle_resend(&mut self, line: u32) {
        if self.job.is_none() {
            tracing::warn!("Resend of line {} requested outside a job, ignored", line);
            return;
        }
        let delta = i64::from(self.current_line) - i64::from(line);
        if let Some(pending) = self.pending_resend {
            if pending.target_line == line && i64::from(pending.delta) == delta {
                tracing::debug!("Duplicate resend request for line {}", line);
                return;
            }
        }
        if delta < 1 || delta > self.history.len() as i64 || self.history.get(line).is_none() {
            tracing::error!(
                "Resend of line {} impossible (current line {}, history {})",
                line,
                self.current_line,
                self.history.len()
            );
            self.fail(FailureReason::ResendHistoryExhausted, PrinterState::Error);
            return;
        }
        tracing::warn!("Printer requested resend from line {}", line);
        self.pending_resend = Some(PendingResend {
            target_line: line,
            delta: delta as u32,
        });
    }

    fn replay_next(&mut self) {
        let Some(mut pending) = self.pending_resend else {
            return;
        };
        let line = self.current_line - pending.delta;
        let Some(bytes) = self.history.get(line).map(<[u8]>::to_vec) else {
            self.pending_resend = None;
            self.fail(FailureReason::ResendHistoryExhausted, PrinterState::Error);
            return;
        };
        tracing::debug!("Replaying line {}", line);
        self.write_bytes(bytes);
        self.in_flight = 1;
        pending.delta -= 1;
        self.pending_resend = (pending.delta > 0).then_some(pending);
    }

    fn local_pause(&mut self) {
        if let Some(job) = self.job.as_mut() {
            if job.is_running() && job.pause().is_ok() {
                tracing::info!("Job paused by stop command");
                self.state.set(PrinterState::Paused);
            }
        }
    }

    fn emergency_stop(&mut self) {
        tracing::error!("Emergency stop");
        self.write_plain("M112");
        self.halted = true;
        self.fail(
            FailureReason::PrinterError("emergency stop".to_string()),
            PrinterState::ClosedWithError,
        );
    }

    fn send_probe(&mut self) {
        self.write_plain("M105");
    }

    fn write_plain(&mut self, command: &str) {
        self.write_bytes(format!("{}\n", command).into_bytes());
    }

    fn write_bytes(&mut self, bytes: Vec<u8>) {
        let line = String::from_utf8_lossy(&bytes).trim_end().to_string();
        tracing::trace!("> {}", line);
        self.events.emit(PrinterEvent::Message {
            direction: MessageDirection::Sent,
            line,
        });
        self.outgoing.push_back(bytes);
    }

    fn handle_firmware_start(&mut self) {
        if self.job.is_some() {
            tracing::error!("Printer restarted during a job");
            self.fail(
                FailureReason::PrinterError("printer reset".to_string()),
                PrinterState::Error,
            );
            return;
        }
        tracing::info!("Printer restarted, line numbering reset");
        self.reset_link_state();
    }
}

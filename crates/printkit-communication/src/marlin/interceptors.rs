//! Per-opcode interception of outbound GCODE
//!
//! Every line leaving the ASCII engine passes through [`MachineModel::intercept`],
//! which looks up the handler for its opcode in a static table. Handlers
//! keep the host's model of the machine (position, mode, tool, targets,
//! heating wait) in step with what the printer was told and report side
//! effects for the engine to act on.

use printkit_core::{HeaterKind, PrinterEvent, PrinterProfile, Position, TemperatureSample};

/// Opcodes with host-side behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarlinOpcode {
    /// Rapid move
    G0,
    /// Linear move
    G1,
    /// Home
    G28,
    /// Absolute positioning
    G90,
    /// Relative positioning
    G91,
    /// Set position
    G92,
    /// Unconditional stop
    M0,
    /// Conditional stop
    M1,
    /// Set tool temperature
    M104,
    /// Fan on
    M106,
    /// Fan off
    M107,
    /// Set tool temperature and wait
    M109,
    /// Set line number
    M110,
    /// Emergency stop
    M112,
    /// Report position
    M114,
    /// Set bed temperature
    M140,
    /// Set bed temperature and wait
    M190,
    /// Select tool
    ToolChange(u8),
    /// No host-side behavior
    Other,
}

impl MarlinOpcode {
    /// Opcode of a GCODE line
    pub fn parse(command: &str) -> Self {
        let Some(word) = command.split_whitespace().next() else {
            return MarlinOpcode::Other;
        };
        let mut chars = word.chars();
        let letter = chars.next().map(|c| c.to_ascii_uppercase());
        let Ok(number) = chars.as_str().parse::<u32>() else {
            return MarlinOpcode::Other;
        };
        match (letter, number) {
            (Some('G'), 0) => MarlinOpcode::G0,
            (Some('G'), 1) => MarlinOpcode::G1,
            (Some('G'), 28) => MarlinOpcode::G28,
            (Some('G'), 90) => MarlinOpcode::G90,
            (Some('G'), 91) => MarlinOpcode::G91,
            (Some('G'), 92) => MarlinOpcode::G92,
            (Some('M'), 0) => MarlinOpcode::M0,
            (Some('M'), 1) => MarlinOpcode::M1,
            (Some('M'), 104) => MarlinOpcode::M104,
            (Some('M'), 106) => MarlinOpcode::M106,
            (Some('M'), 107) => MarlinOpcode::M107,
            (Some('M'), 109) => MarlinOpcode::M109,
            (Some('M'), 110) => MarlinOpcode::M110,
            (Some('M'), 112) => MarlinOpcode::M112,
            (Some('M'), 114) => MarlinOpcode::M114,
            (Some('M'), 140) => MarlinOpcode::M140,
            (Some('M'), 190) => MarlinOpcode::M190,
            (Some('T'), n) => u8::try_from(n)
                .map(MarlinOpcode::ToolChange)
                .unwrap_or(MarlinOpcode::Other),
            _ => MarlinOpcode::Other,
        }
    }

    /// Handler for this opcode
    pub fn handler(self) -> Handler {
        match self {
            MarlinOpcode::G0 | MarlinOpcode::G1 => handle_move,
            MarlinOpcode::G28 => handle_home,
            MarlinOpcode::G90 => handle_absolute,
            MarlinOpcode::G91 => handle_relative,
            MarlinOpcode::G92 => handle_set_position,
            MarlinOpcode::M0 | MarlinOpcode::M1 => handle_stop,
            MarlinOpcode::M104 => handle_tool_temperature,
            MarlinOpcode::M109 => handle_tool_temperature_wait,
            MarlinOpcode::M140 => handle_bed_temperature,
            MarlinOpcode::M190 => handle_bed_temperature_wait,
            MarlinOpcode::M106 => handle_fan_on,
            MarlinOpcode::M107 => handle_fan_off,
            MarlinOpcode::M110 => handle_set_line_number,
            MarlinOpcode::M112 => handle_emergency_stop,
            MarlinOpcode::M114 => handle_report_position,
            MarlinOpcode::ToolChange(_) => handle_tool_change,
            MarlinOpcode::Other => handle_passthrough,
        }
    }
}

/// Handler signature
pub type Handler = fn(&mut MachineModel, &GcodeWords) -> Disposition;

/// What to do with an intercepted line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Send, numbered while printing
    Send,
    /// Send without a line number
    SendUnnumbered,
    /// Do not send
    Suppress,
    /// Send immediately, then fail the link
    EmergencyStop,
}

/// Side effect reported by a handler
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Publish an event
    Event(PrinterEvent),
    /// Reset the line counter; the next line gets `n + 1`
    ResetLineNumber(u32),
    /// Pause the job locally
    LocalPause,
    /// Send an `M105` probe
    Probe,
    /// Queue a command right after this one
    FollowUp(String),
    /// A move happened; feeds layer detection
    Move {
        /// Z after the move
        z: f64,
        /// Material was pushed
        extruding: bool,
    },
}

/// Parameter words of a GCODE line
#[derive(Debug, Clone, PartialEq)]
pub struct GcodeWords {
    opcode: MarlinOpcode,
    words: Vec<(char, Option<f64>)>,
}

impl GcodeWords {
    /// Split a line into opcode and parameter words
    pub fn parse(command: &str) -> Self {
        let words = command
            .split_whitespace()
            .skip(1)
            .filter_map(|w| {
                let mut chars = w.chars();
                let letter = chars.next()?.to_ascii_uppercase();
                letter
                    .is_ascii_alphabetic()
                    .then(|| (letter, chars.as_str().parse::<f64>().ok()))
            })
            .collect();
        Self {
            opcode: MarlinOpcode::parse(command),
            words,
        }
    }

    /// Opcode of the line
    pub fn opcode(&self) -> MarlinOpcode {
        self.opcode
    }

    /// Numeric value of a parameter
    pub fn value(&self, letter: char) -> Option<f64> {
        self.words
            .iter()
            .find(|(l, _)| *l == letter)
            .and_then(|(_, v)| *v)
    }

    /// Check if a parameter letter is present, with or without a value
    pub fn has(&self, letter: char) -> bool {
        self.words.iter().any(|(l, _)| *l == letter)
    }

    /// Check if any parameter is present
    pub fn is_bare(&self) -> bool {
        self.words.is_empty()
    }
}

/// Host-side model of the machine
#[derive(Debug, Clone)]
pub struct MachineModel {
    /// Last commanded position
    pub position: Position,
    /// `G91` in effect
    pub relative: bool,
    /// Last feed rate (mm/min)
    pub feed_rate: f64,
    /// Active tool
    pub tool: u8,
    /// Last-known temperatures
    pub temperatures: TemperatureSample,
    /// Heating wait in progress
    pub heating: bool,
    /// Fan PWM value
    pub fan_speed: u8,
    /// An `M114` answer is expected
    pub awaiting_position: bool,
    heatup_oks_remaining: u32,
    heatup_ok_count: u32,
    extruder_offsets: Vec<(f64, f64)>,
    effects: Vec<Effect>,
}

impl MachineModel {
    /// Create a model for a printer profile
    pub fn new(profile: &PrinterProfile, heatup_ok_count: u32) -> Self {
        Self {
            position: Position::default(),
            relative: false,
            feed_rate: profile.feed_rates.x,
            tool: 0,
            temperatures: TemperatureSample::default(),
            heating: false,
            fan_speed: 0,
            awaiting_position: false,
            heatup_oks_remaining: 0,
            heatup_ok_count: heatup_ok_count.max(1),
            extruder_offsets: profile.extruder_offsets.clone(),
            effects: Vec::new(),
        }
    }

    /// Run the handler for one outbound line
    pub fn intercept(&mut self, command: &str) -> Disposition {
        let words = GcodeWords::parse(command);
        let handler = words.opcode().handler();
        handler(self, &words)
    }

    /// Effects reported since the last call
    pub fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    /// Count an `ok`; ends the heating wait after enough of them
    pub fn on_ok(&mut self) -> Option<PrinterEvent> {
        if !self.heating {
            return None;
        }
        self.heatup_oks_remaining = self.heatup_oks_remaining.saturating_sub(1);
        if self.heatup_oks_remaining == 0 {
            self.heating = false;
            tracing::debug!("Heating wait finished");
            return Some(PrinterEvent::HeatingChanged(false));
        }
        None
    }

    /// Abandon a heating wait (cancel, link loss)
    pub fn clear_heating(&mut self) -> Option<PrinterEvent> {
        if !self.heating {
            return None;
        }
        self.heating = false;
        self.heatup_oks_remaining = 0;
        Some(PrinterEvent::HeatingChanged(false))
    }

    fn emit(&mut self, event: PrinterEvent) {
        self.effects.push(Effect::Event(event));
    }

    fn set_target(&mut self, heater: HeaterKind, celsius: f64) {
        self.temperatures.set_target(heater, celsius);
        self.emit(PrinterEvent::TargetTemperature { heater, celsius });
    }

    fn start_heating(&mut self) {
        self.heatup_oks_remaining = self.heatup_ok_count;
        if !self.heating {
            self.heating = true;
            self.emit(PrinterEvent::HeatingChanged(true));
        }
    }

    fn tool_offset(&self, tool: u8) -> (f64, f64) {
        self.extruder_offsets
            .get(tool as usize)
            .copied()
            .unwrap_or((0.0, 0.0))
    }
}

/// Format a number for GCODE: up to three decimals, no trailing zeros
pub fn format_number(value: f64) -> String {
    let text = format!("{:.3}", value);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text == "-0" {
        "0".to_string()
    } else {
        text.to_string()
    }
}

fn handle_passthrough(_: &mut MachineModel, _: &GcodeWords) -> Disposition {
    Disposition::Send
}

fn handle_move(m: &mut MachineModel, w: &GcodeWords) -> Disposition {
    let old = m.position;
    let target = |current: f64, value: Option<f64>, relative: bool| match value {
        Some(v) if relative => current + v,
        Some(v) => v,
        None => current,
    };
    m.position.x = target(old.x, w.value('X'), m.relative);
    m.position.y = target(old.y, w.value('Y'), m.relative);
    m.position.z = target(old.z, w.value('Z'), m.relative);
    m.position.e = target(old.e, w.value('E'), m.relative);
    if let Some(f) = w.value('F') {
        m.feed_rate = f;
    }

    if m.position.z != old.z {
        m.emit(PrinterEvent::ZChanged(m.position.z));
    }
    let extruding = m.position.e > old.e;
    m.effects.push(Effect::Move {
        z: m.position.z,
        extruding,
    });
    Disposition::Send
}

fn handle_home(m: &mut MachineModel, w: &GcodeWords) -> Disposition {
    let all = !(w.has('X') || w.has('Y') || w.has('Z'));
    let old_z = m.position.z;
    if all || w.has('X') {
        m.position.x = 0.0;
    }
    if all || w.has('Y') {
        m.position.y = 0.0;
    }
    if all || w.has('Z') {
        m.position.z = 0.0;
    }
    if m.position.z != old_z {
        m.emit(PrinterEvent::ZChanged(m.position.z));
    }
    Disposition::Send
}

fn handle_absolute(m: &mut MachineModel, _: &GcodeWords) -> Disposition {
    m.relative = false;
    Disposition::Send
}

fn handle_relative(m: &mut MachineModel, _: &GcodeWords) -> Disposition {
    m.relative = true;
    Disposition::Send
}

fn handle_set_position(m: &mut MachineModel, w: &GcodeWords) -> Disposition {
    if w.is_bare() {
        m.position = Position::default();
        return Disposition::Send;
    }
    if let Some(x) = w.value('X') {
        m.position.x = x;
    }
    if let Some(y) = w.value('Y') {
        m.position.y = y;
    }
    if let Some(z) = w.value('Z') {
        m.position.z = z;
    }
    if let Some(e) = w.value('E') {
        m.position.e = e;
    }
    Disposition::Send
}

fn handle_stop(m: &mut MachineModel, _: &GcodeWords) -> Disposition {
    m.effects.push(Effect::LocalPause);
    m.effects.push(Effect::Probe);
    Disposition::Suppress
}

fn tool_of(m: &MachineModel, w: &GcodeWords) -> u8 {
    w.value('T')
        .and_then(|t| u8::try_from(t as i64).ok())
        .unwrap_or(m.tool)
}

fn handle_tool_temperature(m: &mut MachineModel, w: &GcodeWords) -> Disposition {
    if let Some(s) = w.value('S') {
        let tool = tool_of(m, w);
        m.set_target(HeaterKind::Tool(tool), s);
    }
    Disposition::Send
}

fn handle_tool_temperature_wait(m: &mut MachineModel, w: &GcodeWords) -> Disposition {
    if let Some(s) = w.value('S').or_else(|| w.value('R')) {
        let tool = tool_of(m, w);
        m.set_target(HeaterKind::Tool(tool), s);
    }
    m.start_heating();
    Disposition::Send
}

fn handle_bed_temperature(m: &mut MachineModel, w: &GcodeWords) -> Disposition {
    if let Some(s) = w.value('S') {
        m.set_target(HeaterKind::Bed, s);
    }
    Disposition::Send
}

fn handle_bed_temperature_wait(m: &mut MachineModel, w: &GcodeWords) -> Disposition {
    if let Some(s) = w.value('S').or_else(|| w.value('R')) {
        m.set_target(HeaterKind::Bed, s);
    }
    m.start_heating();
    Disposition::Send
}

fn handle_fan_on(m: &mut MachineModel, w: &GcodeWords) -> Disposition {
    m.fan_speed = w.value('S').map(|s| s.clamp(0.0, 255.0) as u8).unwrap_or(255);
    Disposition::Send
}

fn handle_fan_off(m: &mut MachineModel, _: &GcodeWords) -> Disposition {
    m.fan_speed = 0;
    Disposition::Send
}

fn handle_set_line_number(m: &mut MachineModel, w: &GcodeWords) -> Disposition {
    let n = w.value('N').map(|n| n.max(0.0) as u32).unwrap_or(0);
    m.effects.push(Effect::ResetLineNumber(n));
    Disposition::SendUnnumbered
}

fn handle_emergency_stop(_: &mut MachineModel, _: &GcodeWords) -> Disposition {
    Disposition::EmergencyStop
}

fn handle_report_position(m: &mut MachineModel, _: &GcodeWords) -> Disposition {
    m.awaiting_position = true;
    Disposition::Send
}

fn handle_tool_change(m: &mut MachineModel, w: &GcodeWords) -> Disposition {
    let MarlinOpcode::ToolChange(tool) = w.opcode() else {
        return Disposition::Send;
    };
    if tool == m.tool {
        return Disposition::Send;
    }
    let (old_dx, old_dy) = m.tool_offset(m.tool);
    let (new_dx, new_dy) = m.tool_offset(tool);
    let (dx, dy) = (new_dx - old_dx, new_dy - old_dy);
    m.tool = tool;
    m.emit(PrinterEvent::ToolChanged(tool));
    if dx != 0.0 || dy != 0.0 {
        m.position.x += dx;
        m.position.y += dy;
        let follow_up = format!(
            "G92 X{} Y{}",
            format_number(m.position.x),
            format_number(m.position.y)
        );
        m.effects.push(Effect::FollowUp(follow_up));
    }
    Disposition::Send
}

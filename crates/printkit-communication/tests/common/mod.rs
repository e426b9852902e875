//! Simulated printers and helpers shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use printkit_communication::s3g::opcodes::op;
use printkit_communication::s3g::{encode_packet, PacketDecoder};
use printkit_communication::{checksum, Responder, SerialPortInfo, VirtualLinkProvider};
use printkit_core::{
    HeaterKind, JobOutcome, MessageDirection, PrintJobSnapshot, PrinterEvent, PrinterListener,
    PrinterState,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const TEMPERATURE_REPORT: &str = "ok T:20.0 /0.0 B:20.0 /0.0 @:0 B@:0\n";

/// Line received by the simulated Marlin firmware
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedLine {
    pub number: Option<u32>,
    pub command: String,
    pub checksum_ok: bool,
}

/// Marlin firmware that acknowledges everything
///
/// With `answer_baud` set, every other baud rate produces line noise.
pub struct SimulatedMarlin {
    pub answer_baud: Option<u32>,
    pub ack_delay: Option<Duration>,
    pub received: Arc<Mutex<Vec<ReceivedLine>>>,
    partial: String,
}

impl SimulatedMarlin {
    pub fn new(received: Arc<Mutex<Vec<ReceivedLine>>>) -> Self {
        Self {
            answer_baud: None,
            ack_delay: None,
            received,
            partial: String::new(),
        }
    }

    /// Produce line noise at every other baud rate
    pub fn answering_at(mut self, baud: u32) -> Self {
        self.answer_baud = Some(baud);
        self
    }

    /// Take `delay` to acknowledge each numbered line
    pub fn slow(mut self, delay: Duration) -> Self {
        self.ack_delay = Some(delay);
        self
    }

    fn parse(line: &str) -> ReceivedLine {
        let Some(rest) = line.strip_prefix('N') else {
            return ReceivedLine {
                number: None,
                command: line.to_string(),
                checksum_ok: true,
            };
        };
        let (body, cs) = match line.rsplit_once('*') {
            Some((body, cs)) => (body, cs.parse::<u8>().ok()),
            None => (line, None),
        };
        let (number, command) = rest
            .split_once(' ')
            .map(|(n, c)| (n.parse().ok(), c))
            .unwrap_or((None, rest));
        let command = command.split('*').next().unwrap_or_default().to_string();
        ReceivedLine {
            number,
            command,
            checksum_ok: cs == Some(checksum(body)),
        }
    }
}

impl Responder for SimulatedMarlin {
    fn on_write(&mut self, baud_rate: u32, data: &[u8]) -> Vec<u8> {
        if self.answer_baud.is_some_and(|b| b != baud_rate) {
            return vec![0xFE, 0x81, 0x13, 0xC7, b'\n'];
        }
        self.partial.push_str(&String::from_utf8_lossy(data));
        let mut out = String::new();
        while let Some(end) = self.partial.find('\n') {
            let line: String = self.partial.drain(..=end).collect();
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let received = Self::parse(line);
            if let (Some(_), Some(delay)) = (received.number, self.ack_delay) {
                std::thread::sleep(delay);
            }
            if received.command.starts_with("M105") {
                out.push_str(TEMPERATURE_REPORT);
            } else {
                out.push_str("ok\n");
            }
            self.received.lock().push(received);
        }
        out.into_bytes()
    }
}

/// S3G firmware that accepts every packet
pub struct SimulatedBot {
    pub received: Arc<Mutex<Vec<Vec<u8>>>>,
    pub overflow_budget: u32,
    pub move_delay: Option<Duration>,
    decoder: PacketDecoder,
}

impl SimulatedBot {
    pub fn new(received: Arc<Mutex<Vec<Vec<u8>>>>) -> Self {
        Self {
            received,
            overflow_budget: 0,
            move_delay: None,
            decoder: PacketDecoder::new(),
        }
    }

    /// Answer the first `n` buffered commands with a buffer overflow
    pub fn with_overflows(mut self, n: u32) -> Self {
        self.overflow_budget = n;
        self
    }

    /// Take `delay` to accept each queued move
    pub fn slow(mut self, delay: Duration) -> Self {
        self.move_delay = Some(delay);
        self
    }

    fn answer(&mut self, payload: &[u8]) -> Vec<u8> {
        let response: Vec<u8> = match payload[0] {
            op::GET_VERSION => vec![0x81, 0x2C, 0x02],
            op::READ_FROM_EEPROM => vec![0x85],
            op::TOOL_QUERY => match payload.get(2) {
                Some(2) | Some(30) => vec![0x81, 25, 0],
                _ => vec![0x81, 0, 0],
            },
            opcode if opcode >= 0x80 && self.overflow_budget > 0 => {
                self.overflow_budget -= 1;
                return encode_packet(&[0x82]).unwrap_or_default();
            }
            op::QUEUE_EXTENDED_POINT_NEW => {
                if let Some(delay) = self.move_delay {
                    std::thread::sleep(delay);
                }
                vec![0x81]
            }
            _ => vec![0x81],
        };
        self.received.lock().push(payload.to_vec());
        encode_packet(&response).unwrap_or_default()
    }
}

impl Responder for SimulatedBot {
    fn on_write(&mut self, _baud_rate: u32, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        for byte in data {
            if let Ok(Some(payload)) = self.decoder.push(*byte) {
                if !payload.is_empty() {
                    out.extend(self.answer(&payload));
                }
            }
        }
        out
    }
}

pub type MarlinLog = Arc<Mutex<Vec<ReceivedLine>>>;
pub type BotLog = Arc<Mutex<Vec<Vec<u8>>>>;

/// Provider with one simulated Marlin port, shaped by `configure`
pub fn marlin_provider<F>(port: &str, configure: F) -> (VirtualLinkProvider, MarlinLog)
where
    F: Fn(SimulatedMarlin) -> SimulatedMarlin + Send + Sync + 'static,
{
    let received: MarlinLog = Arc::new(Mutex::new(Vec::new()));
    let log = received.clone();
    let provider = VirtualLinkProvider::new().with_port(
        SerialPortInfo::new(port, "Simulated Marlin"),
        move || Box::new(configure(SimulatedMarlin::new(log.clone()))),
    );
    (provider, received)
}

/// Provider with one simulated S3G bot
pub fn bot_provider(port: &str, overflows: u32) -> (VirtualLinkProvider, BotLog) {
    bot_provider_with(port, move |bot| bot.with_overflows(overflows))
}

/// Provider with one simulated S3G bot, shaped by `configure`
pub fn bot_provider_with<F>(port: &str, configure: F) -> (VirtualLinkProvider, BotLog)
where
    F: Fn(SimulatedBot) -> SimulatedBot + Send + Sync + 'static,
{
    let received: BotLog = Arc::new(Mutex::new(Vec::new()));
    let log = received.clone();
    let provider = VirtualLinkProvider::new().with_port(
        SerialPortInfo::new(port, "Simulated Replicator").with_usb_ids(0x23C1, 0xD314),
        move || Box::new(configure(SimulatedBot::new(log.clone()))),
    );
    (provider, received)
}

/// Listener keeping every non-telemetry event in arrival order
#[derive(Default)]
pub struct RecordingListener {
    pub events: Mutex<Vec<PrinterEvent>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<PrinterEvent> {
        self.events.lock().clone()
    }

    pub fn states(&self) -> Vec<PrinterState> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                PrinterEvent::StateChanged { to, .. } => Some(to),
                _ => None,
            })
            .collect()
    }

    pub fn outcomes(&self) -> Vec<JobOutcome> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                PrinterEvent::JobFinished { outcome, .. } => Some(outcome),
                _ => None,
            })
            .collect()
    }

    pub fn outcome(&self) -> Option<JobOutcome> {
        self.events().into_iter().find_map(|e| match e {
            PrinterEvent::JobFinished { outcome, .. } => Some(outcome),
            _ => None,
        })
    }
}

#[async_trait]
impl PrinterListener for RecordingListener {
    async fn on_connection_closed(&self) {
        self.events.lock().push(PrinterEvent::ConnectionClosed);
    }

    async fn on_connection_error(&self, reason: &str) {
        self.events.lock().push(PrinterEvent::ConnectionError {
            reason: reason.to_string(),
        });
    }

    async fn on_state_changed(&self, from: PrinterState, to: PrinterState) {
        self.events
            .lock()
            .push(PrinterEvent::StateChanged { from, to });
    }

    async fn on_target_temperature(&self, heater: HeaterKind, celsius: f64) {
        self.events
            .lock()
            .push(PrinterEvent::TargetTemperature { heater, celsius });
    }

    async fn on_message(&self, direction: MessageDirection, line: &str) {
        if direction == MessageDirection::Sent {
            self.events.lock().push(PrinterEvent::Message {
                direction,
                line: line.to_string(),
            });
        }
    }

    async fn on_job_started(&self, job: &PrintJobSnapshot) {
        self.events.lock().push(PrinterEvent::JobStarted(job.clone()));
    }

    async fn on_job_finished(&self, outcome: &JobOutcome, elapsed: Duration, layers: u32) {
        self.events.lock().push(PrinterEvent::JobFinished {
            outcome: outcome.clone(),
            elapsed,
            layers,
        });
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

//! Marlin printer driven end to end through the façade

mod common;

use common::*;
use printkit_communication::Printer;
use printkit_core::{
    ConnectionConfig, HeaterKind, JobOutcome, PrinterEvent, PrinterProfile, PrinterState,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const PORT: &str = "/dev/ttySIM0";
const WAIT: Duration = Duration::from_secs(10);

fn config(baud_rate: u32) -> ConnectionConfig {
    let mut config = ConnectionConfig::new(PORT, baud_rate);
    config.timeouts.read_ms = 200;
    config.timeouts.connect_ms = 3_000;
    config
}

fn job_file(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
    let path = dir.path().join("job.gcode");
    std::fs::write(&path, contents).unwrap();
    path
}

fn connected(
    config: ConnectionConfig,
    provider: printkit_communication::VirtualLinkProvider,
) -> (Printer, Arc<RecordingListener>) {
    let mut printer =
        Printer::with_provider(config, PrinterProfile::default(), Arc::new(provider)).unwrap();
    let listener = Arc::new(RecordingListener::default());
    printer.register_listener(listener.clone());
    printer.connect(None, None).unwrap();
    (printer, listener)
}

#[test]
fn test_three_line_job_completes() {
    let dir = tempfile::tempdir().unwrap();
    let path = job_file(&dir, "G28\nG1 X10 F3000\nM104 S200\n");
    let (provider, received) = marlin_provider(PORT, |sim| sim);
    let (mut printer, listener) = connected(config(115200), provider);
    assert!(wait_until(WAIT, || printer.is_operational()));

    printer.select_file(&path, false).unwrap();
    printer.start_print().unwrap();
    assert!(wait_until(WAIT, || listener.outcome().is_some()));
    assert!(wait_until(WAIT, || printer.state() == PrinterState::Operational));
    assert_eq!(listener.outcome(), Some(JobOutcome::Completed));

    let job_lines: Vec<_> = received
        .lock()
        .iter()
        .filter(|l| l.number.is_some() && !l.command.starts_with("M105"))
        .cloned()
        .collect();
    let commands: Vec<_> = job_lines.iter().map(|l| l.command.as_str()).collect();
    assert_eq!(commands, vec!["G28", "G1 X10 F3000", "M104 S200"]);
    assert!(job_lines.iter().all(|l| l.checksum_ok));
    assert!(job_lines.windows(2).all(|w| w[0].number < w[1].number));

    let events = listener.events();
    let position = |pred: &dyn Fn(&PrinterEvent) -> bool| events.iter().position(pred).unwrap();
    let printing = position(&|e| {
        matches!(
            e,
            PrinterEvent::StateChanged {
                to: PrinterState::Printing,
                ..
            }
        )
    });
    let target = position(&|e| {
        matches!(
            e,
            PrinterEvent::TargetTemperature {
                heater: HeaterKind::Tool(0),
                celsius
            } if *celsius == 200.0
        )
    });
    let finished = position(&|e| matches!(e, PrinterEvent::JobFinished { .. }));
    let operational = events
        .iter()
        .rposition(|e| {
            matches!(
                e,
                PrinterEvent::StateChanged {
                    to: PrinterState::Operational,
                    ..
                }
            )
        })
        .unwrap();
    assert!(printing < target);
    assert!(target < finished);
    assert!(printing < operational);
}

#[test]
fn test_baud_detection_finds_answering_rate() {
    let (provider, _) = marlin_provider(PORT, |sim| sim.answering_at(115200));
    let mut config = config(0);
    config.baud_detection.candidates = vec![250000, 115200, 57600];
    let (printer, listener) = connected(config, provider);

    assert!(wait_until(WAIT, || printer.is_operational()));
    assert!(wait_until(WAIT, || printer.snapshot().baud_rate == Some(115200)));
    assert!(listener.states().contains(&PrinterState::DetectingBaud));
}

#[test]
fn test_baud_detection_gives_up() {
    let (provider, _) = marlin_provider(PORT, |sim| sim.answering_at(1));
    let mut config = config(0);
    config.baud_detection.candidates = vec![250000, 115200, 57600];
    let (printer, listener) = connected(config, provider);

    assert!(wait_until(WAIT, || printer.state() == PrinterState::Error));
    assert!(wait_until(WAIT, || listener
        .events()
        .iter()
        .any(|e| matches!(e, PrinterEvent::ConnectionError { .. }))));
    assert!(!printer.is_operational());
}

#[test]
fn test_unknown_port_fails_without_engine() {
    let (provider, _) = marlin_provider(PORT, |sim| sim);
    let mut printer =
        Printer::with_provider(config(115200), PrinterProfile::default(), Arc::new(provider))
            .unwrap();
    printer.connect(Some("/dev/ttyNOPE"), None).unwrap();
    assert_eq!(printer.state(), PrinterState::Error);
}

#[test]
fn test_pause_resume_and_cancel() {
    let dir = tempfile::tempdir().unwrap();
    let path = job_file(&dir, &"G1 X1 F3000\nG1 X2\n".repeat(500));
    let (provider, received) = marlin_provider(PORT, |sim| sim.slow(Duration::from_millis(2)));
    let (mut printer, listener) = connected(config(115200), provider);
    assert!(wait_until(WAIT, || printer.is_operational()));

    printer.select_file(&path, true).unwrap();
    assert!(wait_until(WAIT, || printer.is_printing()));

    printer.set_paused(true).unwrap();
    assert!(wait_until(WAIT, || printer.is_paused()));
    assert!(wait_until(WAIT, || received
        .lock()
        .iter()
        .any(|l| l.command == "M114")));

    printer.set_paused(false).unwrap();
    assert!(wait_until(WAIT, || printer.is_printing()));

    printer.cancel_print().unwrap();
    assert!(wait_until(WAIT, || listener.outcome().is_some()));
    assert_eq!(listener.outcome(), Some(JobOutcome::Cancelled));
    assert!(wait_until(WAIT, || printer.state() == PrinterState::Operational));
    assert!(wait_until(WAIT, || received
        .lock()
        .iter()
        .any(|l| l.command == "M84")));
}

#[test]
fn test_disconnect_cancels_active_job() {
    let dir = tempfile::tempdir().unwrap();
    let path = job_file(&dir, &"G1 X1 F3000\n".repeat(2000));
    let (provider, received) = marlin_provider(PORT, |sim| sim.slow(Duration::from_millis(2)));
    let (mut printer, listener) = connected(config(115200), provider);
    assert!(wait_until(WAIT, || printer.is_operational()));

    printer.select_file(&path, true).unwrap();
    assert!(wait_until(WAIT, || printer.is_printing()));
    printer.disconnect();

    assert_eq!(printer.state(), PrinterState::Closed);
    assert!(wait_until(WAIT, || listener.outcome().is_some()));
    assert_eq!(listener.outcome(), Some(JobOutcome::Cancelled));
    assert!(received.lock().iter().any(|l| l.command == "M104 T0 S0"));

    printer.disconnect();
    assert_eq!(printer.state(), PrinterState::Closed);
}

#[test]
fn test_start_print_requires_selection() {
    let (provider, _) = marlin_provider(PORT, |sim| sim);
    let (mut printer, _listener) = connected(config(115200), provider);
    assert!(wait_until(WAIT, || printer.is_operational()));
    assert!(matches!(
        printer.start_print(),
        Err(printkit_core::Error::Job(printkit_core::JobError::NoFileSelected))
    ));
}

#[test]
fn test_manual_temperature_is_clamped() {
    let (provider, received) = marlin_provider(PORT, |sim| sim);
    let (printer, _listener) = connected(config(115200), provider);
    assert!(wait_until(WAIT, || printer.is_operational()));

    printer
        .set_temperature(HeaterKind::Tool(0), 1_000.0)
        .unwrap();
    let ceiling = PrinterProfile::default().max_nozzle_temp;
    let expected = format!("M104 T0 S{}", ceiling);
    assert!(wait_until(WAIT, || received
        .lock()
        .iter()
        .any(|l| l.command == expected)));
}

#[test]
fn test_auto_port_detects_baud() {
    let (provider, _) = marlin_provider(PORT, |sim| sim.answering_at(115200));
    let mut config = config(0);
    config.port = "AUTO".to_string();
    config.baud_detection.candidates = vec![250000, 115200, 57600];
    let (printer, listener) = connected(config, provider);

    assert!(wait_until(WAIT, || printer.is_operational()));
    assert!(wait_until(WAIT, || printer.snapshot().baud_rate == Some(115200)));
    assert_eq!(printer.snapshot().port.as_deref(), Some(PORT));
    assert!(listener.states().contains(&PrinterState::DetectingLink));
    assert!(!listener
        .events()
        .iter()
        .any(|e| matches!(e, PrinterEvent::ConnectionError { .. })));
}

fn count(received: &MarlinLog, command: &str) -> usize {
    received
        .lock()
        .iter()
        .filter(|l| l.command == command)
        .count()
}

#[test]
fn test_cancel_while_paused_finishes_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = job_file(&dir, &"G1 X1 F3000\nG1 X2\n".repeat(500));
    let (provider, received) = marlin_provider(PORT, |sim| sim.slow(Duration::from_millis(2)));
    let (mut printer, listener) = connected(config(115200), provider);
    assert!(wait_until(WAIT, || printer.is_operational()));

    printer.select_file(&path, true).unwrap();
    assert!(wait_until(WAIT, || printer.is_printing()));
    printer.set_paused(true).unwrap();
    assert!(wait_until(WAIT, || printer.is_paused()));

    printer.cancel_print().unwrap();
    assert!(wait_until(WAIT, || listener.outcome().is_some()));
    assert!(wait_until(WAIT, || count(&received, "M84") == 1));
    assert_eq!(printer.state(), PrinterState::Operational);

    printer.cancel_print().unwrap();
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(listener.outcomes(), vec![JobOutcome::Cancelled]);
    assert_eq!(count(&received, "M84"), 1);
}

#[test]
fn test_cancel_after_completion_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let path = job_file(&dir, "G28\nG1 X10 F3000\n");
    let (provider, received) = marlin_provider(PORT, |sim| sim);
    let (mut printer, listener) = connected(config(115200), provider);
    assert!(wait_until(WAIT, || printer.is_operational()));

    printer.select_file(&path, true).unwrap();
    assert!(wait_until(WAIT, || listener.outcome().is_some()));
    assert!(wait_until(WAIT, || printer.state() == PrinterState::Operational));

    printer.cancel_print().unwrap();
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(listener.outcomes(), vec![JobOutcome::Completed]);
    assert_eq!(count(&received, "M84"), 0);
}

#[test]
fn test_emergency_stop_closes_link() {
    let (provider, received) = marlin_provider(PORT, |sim| sim);
    let (printer, listener) = connected(config(115200), provider);
    assert!(wait_until(WAIT, || printer.is_operational()));

    printer.send_command("M112").unwrap();
    assert!(wait_until(WAIT, || listener
        .events()
        .contains(&PrinterEvent::ConnectionClosed)));
    assert_eq!(printer.state(), PrinterState::ClosedWithError);
    assert_eq!(count(&received, "M112"), 1);
    assert!(wait_until(WAIT, || printer.snapshot().port.is_none()));
}

//! S3G printer driven end to end through the façade

mod common;

use common::*;
use printkit_communication::s3g::opcodes::{axes, op};
use printkit_communication::s3g::S3gCommand;
use printkit_communication::Printer;
use printkit_core::{
    ConnectionConfig, DriverKind, HeaterKind, JobOutcome, PrinterEvent, PrinterProfile,
    PrinterState,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const PORT: &str = "/dev/ttyACM7";
const WAIT: Duration = Duration::from_secs(10);

fn config() -> ConnectionConfig {
    let mut config = ConnectionConfig::new(PORT, 115200).with_driver(DriverKind::S3g);
    config.timeouts.read_ms = 200;
    config.retry_backoff_ms = 1;
    config
}

fn x3g_file(dir: &tempfile::TempDir, moves: usize) -> PathBuf {
    let mut commands = vec![
        S3gCommand::SetExtendedPosition { steps: [0; 5] },
        S3gCommand::set_toolhead_temperature(0, 220),
    ];
    for i in 0..moves {
        let z = (i / 10) as i32 * 80;
        commands.push(S3gCommand::QueueExtendedPointNew {
            steps: [100 * (i as i32 % 10), 0, z, -(i as i32) * 5, 0],
            duration_us: 10_000,
            relative: 0,
        });
    }
    let bytes: Vec<u8> = commands
        .iter()
        .flat_map(|c| c.encode().unwrap())
        .collect();
    let path = dir.path().join("cube.x3g");
    std::fs::write(&path, bytes).unwrap();
    path
}

fn opcodes(log: &BotLog) -> Vec<u8> {
    log.lock().iter().map(|p| p[0]).collect()
}

fn connected(provider: printkit_communication::VirtualLinkProvider) -> (Printer, Arc<RecordingListener>) {
    let mut printer =
        Printer::with_provider(config(), PrinterProfile::default(), Arc::new(provider)).unwrap();
    let listener = Arc::new(RecordingListener::default());
    printer.register_listener(listener.clone());
    printer.connect(None, None).unwrap();
    (printer, listener)
}

#[test]
fn test_handshake_reaches_operational() {
    let (provider, log) = bot_provider(PORT, 0);
    let (printer, listener) = connected(provider);
    assert!(wait_until(WAIT, || printer.is_operational()));
    assert_eq!(opcodes(&log)[0], op::GET_VERSION);
    assert!(wait_until(WAIT, || listener
        .states()
        .ends_with(&[PrinterState::Connecting, PrinterState::Operational])));
}

#[test]
fn test_job_streams_through_overflows() {
    let dir = tempfile::tempdir().unwrap();
    let path = x3g_file(&dir, 40);
    let (provider, log) = bot_provider(PORT, 5);
    let (mut printer, listener) = connected(provider);
    assert!(wait_until(WAIT, || printer.is_operational()));

    printer.select_file(&path, true).unwrap();
    assert!(wait_until(WAIT, || listener.outcome().is_some()));
    assert_eq!(listener.outcome(), Some(JobOutcome::Completed));
    assert!(wait_until(WAIT, || printer.state() == PrinterState::Operational));

    let sent = opcodes(&log);
    let start = sent
        .iter()
        .position(|o| *o == op::BUILD_START_NOTIFICATION)
        .unwrap();
    let end = sent
        .iter()
        .rposition(|o| *o == op::BUILD_END_NOTIFICATION)
        .unwrap();
    assert!(start < end);
    let moves = sent
        .iter()
        .filter(|o| **o == op::QUEUE_EXTENDED_POINT_NEW)
        .count();
    assert_eq!(moves, 40);
    assert!(sent[..end].contains(&op::ENABLE_AXES));
}

#[test]
fn test_cancel_disables_heaters_and_motors() {
    let dir = tempfile::tempdir().unwrap();
    let path = x3g_file(&dir, 5_000);
    let (provider, log) = bot_provider(PORT, 0);
    let (mut printer, listener) = connected(provider);
    assert!(wait_until(WAIT, || printer.is_operational()));

    printer.select_file(&path, true).unwrap();
    assert!(wait_until(WAIT, || printer.is_printing()
        || listener.outcome().is_some()));
    printer.cancel_print().unwrap();
    assert!(wait_until(WAIT, || listener.outcome().is_some()));

    if listener.outcome() == Some(JobOutcome::Cancelled) {
        let sent = log.lock().clone();
        let disable = S3gCommand::EnableAxes {
            axes: axes::ALL,
            enable: false,
        }
        .encode()
        .unwrap();
        let heater_off = S3gCommand::set_toolhead_temperature(0, 0).encode().unwrap();
        assert!(sent.contains(&heater_off));
        assert!(sent.contains(&disable));
        assert!(sent.iter().any(|p| p[0] == op::ABORT_IMMEDIATELY));
    }
    assert!(wait_until(WAIT, || printer.state() == PrinterState::Operational));
}

#[test]
fn test_manual_commands_are_translated() {
    let (provider, log) = bot_provider(PORT, 0);
    let (printer, listener) = connected(provider);
    assert!(wait_until(WAIT, || printer.is_operational()));

    printer
        .set_temperature(HeaterKind::Tool(0), 210.0)
        .unwrap();
    printer.home(&[]).unwrap();
    let expected = S3gCommand::set_toolhead_temperature(0, 210).encode().unwrap();
    assert!(wait_until(WAIT, || log.lock().contains(&expected)));
    assert!(wait_until(WAIT, || opcodes(&log).contains(&op::FIND_AXES_MINIMUMS)));
    assert!(wait_until(WAIT, || listener.events().iter().any(|e| matches!(
        e,
        PrinterEvent::TargetTemperature {
            heater: HeaterKind::Tool(0),
            ..
        }
    ))));
    assert!(printer.send_command("G28").is_err());
}

#[test]
fn test_disconnect_closes_link() {
    let (provider, _log) = bot_provider(PORT, 0);
    let (mut printer, listener) = connected(provider);
    assert!(wait_until(WAIT, || printer.is_operational()));
    printer.disconnect();
    assert_eq!(printer.state(), PrinterState::Closed);
    assert!(wait_until(WAIT, || listener
        .states()
        .last()
        .is_some_and(|s| *s == PrinterState::Closed)));
}

fn disable_packet() -> Vec<u8> {
    S3gCommand::EnableAxes {
        axes: axes::ALL,
        enable: false,
    }
    .encode()
    .unwrap()
}

#[test]
fn test_cancel_while_paused_finishes_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = x3g_file(&dir, 2_000);
    let (provider, log) = bot_provider_with(PORT, |bot| bot.slow(Duration::from_millis(2)));
    let (mut printer, listener) = connected(provider);
    assert!(wait_until(WAIT, || printer.is_operational()));

    printer.select_file(&path, true).unwrap();
    assert!(wait_until(WAIT, || printer.is_printing()));
    printer.set_paused(true).unwrap();
    assert!(wait_until(WAIT, || printer.is_paused()));

    printer.cancel_print().unwrap();
    assert!(wait_until(WAIT, || listener.outcome().is_some()));
    assert!(wait_until(WAIT, || printer.state() == PrinterState::Operational));

    printer.cancel_print().unwrap();
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(listener.outcomes(), vec![JobOutcome::Cancelled]);
    let sent = log.lock().clone();
    let disable = disable_packet();
    assert_eq!(sent.iter().filter(|p| **p == disable).count(), 1);
    assert_eq!(
        sent.iter().filter(|p| p[0] == op::ABORT_IMMEDIATELY).count(),
        1
    );
}

#[test]
fn test_cancel_after_completion_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let path = x3g_file(&dir, 20);
    let (provider, log) = bot_provider(PORT, 0);
    let (mut printer, listener) = connected(provider);
    assert!(wait_until(WAIT, || printer.is_operational()));

    printer.select_file(&path, true).unwrap();
    assert!(wait_until(WAIT, || listener.outcome().is_some()));
    assert!(wait_until(WAIT, || printer.state() == PrinterState::Operational));

    printer.cancel_print().unwrap();
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(listener.outcomes(), vec![JobOutcome::Completed]);
    assert!(!opcodes(&log).contains(&op::ABORT_IMMEDIATELY));
}

//! # printkit
//!
//! Hardware-control core of a 3D printer host:
//! - Marlin-style ASCII GCODE streaming with line numbers, checksums and
//!   resend handling
//! - MakerBot S3G/x3g binary packet streaming
//! - A print job lifecycle shared by both protocols
//! - A [`Printer`] façade and a state monitor that fans events out to
//!   listeners
//!
//! ## Architecture
//!
//! printkit is organized as a workspace:
//!
//! 1. **printkit-core** - state machine, job model, configuration, errors, events
//! 2. **printkit-communication** - serial links, protocol engines, façade
//! 3. **printkit** - this crate: logging setup and the command line tool

pub use printkit_communication::{
    list_ports, Printer, PrinterSnapshot, SerialLinkProvider, SerialPortInfo,
    VirtualLinkProvider,
};
pub use printkit_core::{
    ConnectionConfig, ConnectionError, ControllerError, DriverKind, Error, HeaterKind,
    HostConfig, JobError, JobOutcome, PrinterEvent, PrinterListener, PrinterProfile,
    PrinterState, ProtocolError, Result,
};

use std::path::Path;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Load a host configuration file, or defaults when no path is given
pub fn load_config(path: Option<&Path>) -> Result<HostConfig> {
    match path {
        Some(path) => {
            let config = HostConfig::load(path)?;
            tracing::info!("Loaded configuration from {}", path.display());
            Ok(config)
        }
        None => Ok(HostConfig::default()),
    }
}

/// Initialize logging with the default configuration
///
/// Sets up structured logging with:
/// - Console output on stderr, so stdout stays free for command output
/// - RUST_LOG environment variable support
/// - Thread names, which identify the monitor and poll threads
pub fn init_logging(verbose: bool) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let env_filter = EnvFilter::from_default_env().add_directive(level.into());

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_names(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialise logging: {}", e))?;

    Ok(())
}

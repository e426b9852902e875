use anyhow::{bail, Context};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use printkit::{
    init_logging, list_ports, load_config, DriverKind, HostConfig, JobOutcome, Printer,
    PrinterListener, PrinterState, BUILD_DATE, VERSION,
};
use printkit_core::{MessageDirection, PrintJobSnapshot};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "printkit", version, about = "3D printer host")]
struct Cli {
    /// Host configuration file (TOML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, clap::Args)]
struct LinkArgs {
    /// Serial port, or AUTO
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate, 0 autodetects (marlin only)
    #[arg(short, long)]
    baud: Option<u32>,

    /// Protocol driver: marlin or s3g
    #[arg(short, long)]
    driver: Option<DriverKind>,
}

#[derive(Subcommand)]
enum Command {
    /// List serial ports
    Ports,
    /// Print a GCODE or x3g file
    Print {
        #[command(flatten)]
        link: LinkArgs,
        /// Job file
        file: PathBuf,
    },
    /// Send commands typed on stdin and show the printer's answers
    Console {
        #[command(flatten)]
        link: LinkArgs,
    },
}

/// Prints events for a terminal user
#[derive(Default)]
struct TerminalListener {
    echo_messages: bool,
    outcome: Mutex<Option<JobOutcome>>,
}

#[async_trait]
impl PrinterListener for TerminalListener {
    async fn on_connection_opened(&self, port: &str, baud_rate: u32) {
        println!("Connected to {} at {} baud", port, baud_rate);
    }

    async fn on_connection_error(&self, reason: &str) {
        eprintln!("Connection error: {}", reason);
    }

    async fn on_state_changed(&self, _from: PrinterState, to: PrinterState) {
        println!("State: {}", to);
    }

    async fn on_message(&self, direction: MessageDirection, line: &str) {
        if self.echo_messages && direction == MessageDirection::Received {
            println!("< {}", line);
        }
    }

    async fn on_progress(&self, _file_position: u64, _file_size: u64, percent: f64) {
        println!("Progress: {:.1}%", percent);
    }

    async fn on_layer_changed(&self, layer: u32, height_mm: f64) {
        println!("Layer {} at {:.2} mm", layer, height_mm);
    }

    async fn on_job_started(&self, job: &PrintJobSnapshot) {
        println!("Printing {} ({} bytes)", job.file_path.display(), job.file_size);
    }

    async fn on_job_finished(&self, outcome: &JobOutcome, elapsed: Duration, layers: u32) {
        println!(
            "Job {} after {}s, {} layers",
            outcome,
            elapsed.as_secs(),
            layers
        );
        *self.outcome.lock() = Some(outcome.clone());
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;
    tracing::debug!("printkit {} built {}", VERSION, BUILD_DATE);

    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Command::Ports => ports(),
        Command::Print { link, file } => print(config, link, &file),
        Command::Console { link } => console(config, link),
    }
}

fn ports() -> anyhow::Result<()> {
    let ports = list_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        let ids = match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => format!(" [{:04x}:{:04x}]", vid, pid),
            _ => String::new(),
        };
        let makerbot = if port.is_makerbot() { " (MakerBot)" } else { "" };
        println!("{}  {}{}{}", port.port_name, port.description, ids, makerbot);
    }
    Ok(())
}

fn open(
    mut config: HostConfig,
    link: LinkArgs,
    listener: Arc<TerminalListener>,
) -> anyhow::Result<Printer> {
    if let Some(driver) = link.driver {
        config.connection.driver = driver;
    }
    let mut printer = Printer::new(config.connection, config.profile)?;
    printer.register_listener(listener);
    printer.connect(link.port.as_deref(), link.baud)?;

    let connect_timeout = Duration::from_secs(60);
    let started = Instant::now();
    loop {
        match printer.state() {
            state if state.is_operational() => return Ok(printer),
            state if state.is_error() || state == PrinterState::Closed => {
                bail!("Could not connect: printer is {}", state)
            }
            _ if started.elapsed() > connect_timeout => bail!("Timed out waiting for the printer"),
            _ => std::thread::sleep(Duration::from_millis(50)),
        }
    }
}

fn print(config: HostConfig, link: LinkArgs, file: &Path) -> anyhow::Result<()> {
    let listener = Arc::new(TerminalListener::default());
    let mut printer = open(config, link, listener.clone())?;
    printer
        .select_file(file, true)
        .with_context(|| format!("Cannot print {}", file.display()))?;

    let outcome = loop {
        if let Some(outcome) = listener.outcome.lock().clone() {
            break outcome;
        }
        if printer.state().is_error() {
            bail!("Printer failed: {}", printer.state());
        }
        std::thread::sleep(Duration::from_millis(100));
    };
    printer.disconnect();
    match outcome {
        JobOutcome::Completed => Ok(()),
        other => bail!("Job {}", other),
    }
}

fn console(config: HostConfig, link: LinkArgs) -> anyhow::Result<()> {
    let listener = Arc::new(TerminalListener {
        echo_messages: true,
        ..Default::default()
    });
    let mut printer = open(config, link, listener)?;
    println!("Type GCODE lines; 'quit' exits");

    for line in std::io::stdin().lock().lines() {
        let line = line?;
        let line = line.trim();
        match line {
            "" => continue,
            "quit" | "exit" => break,
            _ => {
                if let Err(e) = printer.send_command(line) {
                    eprintln!("{}", e);
                }
            }
        }
        if !printer.is_operational() {
            eprintln!("Printer is {}", printer.state());
            break;
        }
    }
    printer.disconnect();
    Ok(())
}

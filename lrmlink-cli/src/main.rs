//! lrmlink CLI - Command-line tool for LRM earth-resistance meters.
//!
//! ## Features
//!
//! - List and classify candidate serial ports
//! - Show the identity of a connected meter
//! - Download stored measurements to a JSON file
//! - Stream firmware images to the device
//! - Decode scanned optical codes (multi-part QR exports)

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use console::style;
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use lrmlink::{
    FirmwareConfig, LinkSession, MeasurementSink, OpticalDecoder, ScanOutcome, SerialTransport,
    auto_detect_port, detect_ports, download_measurements, transfer_firmware,
};
use std::env;
use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;

mod config;
mod sink;

use config::Config;
use sink::JsonFileSink;

/// Fallback baud rate when neither flags nor config specify one.
const DEFAULT_BAUD: u32 = 115200;

/// lrmlink - talk to LRM earth-resistance meters.
///
/// Environment variables:
///   LRMLINK_PORT  - Default serial port
///   LRMLINK_BAUD  - Default baud rate (default: 115200)
#[derive(Parser)]
#[command(name = "lrmlink")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "LRMLINK_PORT")]
    port: Option<String>,

    /// Baud rate for the serial link.
    #[arg(short, long, global = true, env = "LRMLINK_BAUD")]
    baud: Option<u32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Connect to the meter and show its identity.
    Info {
        /// Output identity as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Download stored measurements to a JSON file.
    Download {
        /// Output file for the downloaded points.
        #[arg(short, long)]
        output: PathBuf,

        /// User identifier attached to the stored points.
        #[arg(long)]
        user: Option<String>,
    },

    /// Stream a firmware image to the device.
    Firmware {
        /// Path to the firmware image.
        image: PathBuf,
    },

    /// Decode scanned optical codes (one code per line).
    Scan {
        /// Input file with scanned codes (stdin if not specified).
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    if env::var("NO_COLOR").is_ok() || !console::Term::stderr().is_term() {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    debug!(
        "lrmlink v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    // Load configuration
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::ListPorts { json } => {
            cmd_list_ports(*json);
            Ok(())
        },
        Commands::Info { json } => cmd_info(&cli, &config, *json).await,
        Commands::Download { output, user } => {
            let user = user
                .clone()
                .or_else(|| config.download.user.clone())
                .unwrap_or_else(|| "default".to_string());
            cmd_download(&cli, &config, output.clone(), &user).await
        },
        Commands::Firmware { image } => cmd_firmware(&cli, &config, image).await,
        Commands::Scan { input } => cmd_scan(input.as_deref()),
    }
}

/// Resolve the serial port from flags, config, or auto-detection.
fn resolve_port(cli: &Cli, config: &Config) -> Result<String> {
    if let Some(port) = cli.port.clone().or_else(|| config.connection.port.clone()) {
        return Ok(port);
    }

    let detected = auto_detect_port().context("no serial port found; use --port")?;
    Ok(detected.name)
}

fn resolve_baud(cli: &Cli, config: &Config) -> u32 {
    cli.baud.or(config.connection.baud).unwrap_or(DEFAULT_BAUD)
}

/// Connect to the meter on the resolved port.
async fn connect(cli: &Cli, config: &Config) -> Result<LinkSession> {
    let port = resolve_port(cli, config)?;
    let baud = resolve_baud(cli, config);

    if !cli.quiet {
        eprintln!(
            "{} Connecting to {} at {} baud...",
            style("⏳").yellow(),
            style(&port).cyan(),
            baud
        );
    }

    let transport = SerialTransport::new(&port).with_baud_rate(baud);
    let session = LinkSession::connect(transport)
        .await
        .with_context(|| format!("could not connect to the meter on {port}"))?;

    if !cli.quiet {
        eprintln!(
            "{} Connected to {}",
            style("✓").green(),
            style(session.identity().model).bold()
        );
    }
    Ok(session)
}

/// List-ports command implementation.
fn cmd_list_ports(json: bool) {
    let ports = detect_ports();

    if json {
        let entries: Vec<serde_json::Value> = ports
            .iter()
            .map(|p| {
                serde_json::json!({
                    "name": p.name,
                    "bridge": p.bridge.name(),
                    "vid": p.vid,
                    "pid": p.pid,
                    "product": p.product,
                })
            })
            .collect();
        #[allow(clippy::unwrap_used)] // Serializing json! values cannot fail
        let text = serde_json::to_string_pretty(&entries).unwrap();
        println!("{text}");
        return;
    }

    if ports.is_empty() {
        eprintln!("{} No serial ports found", style("!").yellow());
        return;
    }

    for port in &ports {
        let marker = if port.is_likely_meter() {
            style("●").green()
        } else {
            style("○").dim()
        };
        let bridge = if port.bridge.is_known() {
            format!(" [{}]", port.bridge.name())
        } else {
            String::new()
        };
        let product = port
            .product
            .as_ref()
            .map(|p| format!(" - {p}"))
            .unwrap_or_default();
        println!("{marker} {}{}{}", port.name, style(bridge).yellow(), product);
    }
}

/// Info command implementation.
async fn cmd_info(cli: &Cli, config: &Config, json: bool) -> Result<()> {
    let session = connect(cli, config).await?;
    let identity = session.identity();

    if json {
        let value = serde_json::json!({
            "model": identity.model,
            "family": identity.family,
            "device_type": identity.device_type,
            "serial_number": identity.serial_number,
            "hw_version": identity.hw_version.to_string(),
            "fw_version": identity.fw_version.to_string(),
        });
        #[allow(clippy::unwrap_used)] // Serializing json! values cannot fail
        let text = serde_json::to_string_pretty(&value).unwrap();
        println!("{text}");
    } else {
        println!("Model:         {}", style(identity.model).bold());
        println!("Serial number: {}", identity.serial_number);
        println!("Hardware:      {}", identity.hw_version);
        println!("Firmware:      {}", identity.fw_version);
    }

    session.disconnect().await?;
    Ok(())
}

/// Download command implementation.
async fn cmd_download(cli: &Cli, config: &Config, output: PathBuf, user: &str) -> Result<()> {
    let session = connect(cli, config).await?;

    let pb = progress_bar(cli.quiet);
    let points = download_measurements(&session, |p| {
        if p.current == 0 {
            pb.set_length(u64::from(p.total));
            pb.set_message("downloading measurements");
        }
        pb.set_position(u64::from(p.current));
    })
    .await
    .context("measurement download failed")?;
    pb.finish_and_clear();

    session.disconnect().await?;

    let count = points.len();
    let mut sink = JsonFileSink::new(output.clone());
    sink.store(user, points)
        .context("could not write the output file")?;

    if !cli.quiet {
        eprintln!(
            "{} Downloaded {} points to {}",
            style("✓").green(),
            style(count).bold(),
            output.display()
        );
    }
    Ok(())
}

/// Firmware command implementation.
async fn cmd_firmware(cli: &Cli, config: &Config, image_path: &PathBuf) -> Result<()> {
    let image = fs::read(image_path)
        .with_context(|| format!("could not read firmware image {}", image_path.display()))?;

    if !cli.quiet {
        eprintln!(
            "{} Firmware image: {} ({} bytes)",
            style("📦").cyan(),
            image_path.display(),
            image.len()
        );
    }

    let session = connect(cli, config).await?;

    let pb = progress_bar(cli.quiet);
    pb.set_length(image.len() as u64);
    pb.set_message("sending firmware");
    transfer_firmware(&session, &image, &FirmwareConfig::default(), |sent, _| {
        pb.set_position(sent as u64);
    })
    .await
    .context("firmware transfer failed")?;
    pb.finish_and_clear();

    session.disconnect().await?;

    if !cli.quiet {
        eprintln!("{} Firmware transfer complete", style("🎉").green().bold());
    }
    Ok(())
}

/// Scan command implementation.
fn cmd_scan(input: Option<&std::path::Path>) -> Result<()> {
    let reader: Box<dyn Read> = match input {
        Some(path) => Box::new(
            fs::File::open(path)
                .with_context(|| format!("could not open {}", path.display()))?,
        ),
        None => Box::new(std::io::stdin()),
    };

    let mut decoder = OpticalDecoder::new();
    let mut all_points = Vec::new();

    for line in BufReader::new(reader).lines() {
        let line = line.context("could not read scan input")?;
        if line.trim().is_empty() {
            continue;
        }

        match decoder.feed(&line) {
            Ok(ScanOutcome::Complete(points)) => {
                eprintln!(
                    "{} Decoded {} points",
                    style("✓").green(),
                    points.len()
                );
                all_points.extend(points);
            },
            Ok(ScanOutcome::Partial { group, received, total }) => {
                eprintln!(
                    "{} Group {group}: {received}/{total} parts",
                    style("…").yellow()
                );
            },
            Ok(ScanOutcome::DuplicatePart { group, part }) => {
                eprintln!(
                    "{} Group {group}: part {part} already scanned",
                    style("!").yellow()
                );
            },
            Err(e) => {
                eprintln!("{} {e}", style("✗").red());
            },
        }
    }

    let pending: Vec<u32> = decoder.pending_groups().collect();
    if !pending.is_empty() {
        bail!("incomplete scan groups: {pending:?}");
    }

    let text = serde_json::to_string_pretty(&all_points)?;
    println!("{text}");
    Ok(())
}

/// Build a progress bar, hidden in quiet mode or without a terminal.
fn progress_bar(quiet: bool) -> ProgressBar {
    if quiet || !console::Term::stderr().is_term() {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(0);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pick-to-light station host CLI
//!
//! # Usage
//!
//! ```bash
//! # Run a station on a serial port with a manifest
//! pickstation --port /dev/ttyUSB0 --manifest orders.csv
//!
//! # Use a configuration file, override the destination count
//! pickstation --config station.toml --destinations 5
//!
//! # Try the console without hardware (commands are printed)
//! pickstation run --dry-run --manifest orders.csv
//!
//! # Inspect a manifest
//! pickstation check-manifest orders.csv
//!
//! # Write a default configuration / list serial ports
//! pickstation gen-config -o station.toml
//! pickstation ports
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use pickstation::{
    list_ports, spawn_console, BackorderFormat, DestinationState, DeviceReader, DeviceWriter,
    FileBackorderSink, Manifest, MemoryTransport, Notice, SerialTransport, Station,
    StationConfig, StationError, StatusReport, StopHandle, HELP,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "pickstation")]
#[command(author = "naskel.com")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Pick-to-light station host - drives destination lights and reconciles confirmed pieces")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Serial port (overrides the configuration file)
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Baud rate
    #[arg(short, long, global = true)]
    baud: Option<u32>,

    /// Number of destinations on the station
    #[arg(short, long, global = true)]
    destinations: Option<u16>,

    /// Directory for backorder files
    #[arg(long, global = true)]
    backorder_dir: Option<PathBuf>,

    /// Backorder file format
    #[arg(long, value_enum, global = true)]
    backorder_format: Option<FormatArg>,

    /// Order manifest (CSV) to load at startup
    #[arg(short, long, global = true)]
    manifest: Option<PathBuf>,

    /// Log filter (e.g. "pickstation=trace"), overrides --verbose
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Verbose mode (debug logs)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the station (default)
    Run {
        /// Use an in-memory device and print the commands instead of
        /// writing them to a serial port
        #[arg(long)]
        dry_run: bool,
    },

    /// Load a manifest and print per sku/lot totals
    CheckManifest {
        /// Manifest file
        file: PathBuf,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Write a configuration file with every default filled in
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "station.toml")]
        output: PathBuf,
    },

    /// List serial ports
    Ports,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Csv,
    JsonLines,
}

impl From<FormatArg> for BackorderFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Csv => BackorderFormat::Csv,
            FormatArg::JsonLines => BackorderFormat::JsonLines,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match &cli.log_level {
        Some(level) => {
            EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("pickstation=info"))
        }
        None if cli.verbose => EnvFilter::new("pickstation=debug"),
        None => EnvFilter::new("pickstation=info"),
    };
    fmt().with_env_filter(filter).with_target(false).init();

    match &cli.command {
        None => cmd_run(&cli, false),
        Some(Commands::Run { dry_run }) => cmd_run(&cli, *dry_run),
        Some(Commands::CheckManifest { file, json }) => cmd_check_manifest(file, *json),
        Some(Commands::GenConfig { output }) => cmd_gen_config(output),
        Some(Commands::Ports) => cmd_ports(),
    }
}

fn build_config(cli: &Cli) -> Result<StationConfig> {
    let mut config = match &cli.config {
        Some(path) => StationConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => StationConfig::default(),
    };

    if let Some(port) = &cli.port {
        config.serial.port = port.clone();
    }
    if let Some(baud) = cli.baud {
        config.serial.baud_rate = baud;
    }
    if let Some(destinations) = cli.destinations {
        config.station.destinations = destinations;
    }
    if let Some(dir) = &cli.backorder_dir {
        config.backorder.directory = dir.clone();
    }
    if let Some(format) = cli.backorder_format {
        config.backorder.format = format.into();
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn cmd_run(cli: &Cli, dry_run: bool) -> Result<()> {
    let config = build_config(cli)?;

    tracing::info!(
        port = %config.serial.port,
        baud = config.serial.baud_rate,
        destinations = config.station.destinations,
        dry_run,
        "Starting pickstation"
    );

    let sink = FileBackorderSink::create(&config.backorder.directory, config.backorder.format)
        .context("Failed to create backorder file")?;
    println!("Backorders are written to {}", sink.path().display());

    let reader: Box<dyn DeviceReader>;
    let writer: Box<dyn DeviceWriter>;
    if dry_run {
        let transport = MemoryTransport::new(config.serial.timeout());
        reader = Box::new(transport.reader());
        writer = Box::new(EchoWriter);
    } else {
        let (serial_reader, serial_writer) =
            SerialTransport::open(&config.serial).context("Failed to open serial port")?;
        reader = Box::new(serial_reader);
        writer = Box::new(serial_writer);
    }

    let (tx, rx) = crossbeam::channel::unbounded();
    let mut station = Station::new(&config, reader, writer, Box::new(sink), rx);
    ctrlc_handler(station.stop_handle());

    if let Some(path) = &cli.manifest {
        // A bad manifest only blocks sessions; `load <path>` can fix it.
        match Manifest::from_file(path) {
            Ok(manifest) => station.load_manifest(manifest),
            Err(e) => tracing::error!(path = %path.display(), error = %e, "Manifest not loaded"),
        }
    }

    spawn_console(tx).context("Failed to start console")?;
    println!("{HELP}");

    let summary = station.run(print_notice).context("Station error")?;

    tracing::info!(
        sessions = summary.engine.sessions_started,
        records = summary.engine.records_written,
        sink_failures = summary.engine.sink_failures,
        commands_failed = summary.commands_failed,
        bytes_read = summary.reader.bytes_read,
        "Shutdown complete"
    );
    Ok(())
}

/// Prints device commands instead of sending them.
struct EchoWriter;

impl DeviceWriter for EchoWriter {
    fn write_line(&mut self, line: &str) -> Result<(), StationError> {
        println!("  -> {line}");
        Ok(())
    }
}

fn print_notice(notice: Notice) {
    match notice {
        Notice::Status(report) => print_status(&report),
        Notice::Help => println!("{HELP}"),
        Notice::Rejected(reason) => println!("error: {reason}"),
    }
}

fn print_status(report: &StatusReport) {
    match &report.session {
        Some((sku, lot)) => println!("Session: {sku} / {lot}"),
        None => println!("Session: none ({} manifest lines)", report.manifest_lines),
    }
    println!("{:>4}  {:<11} {:>8} {:>9}", "DEST", "STATE", "ORDER", "PIECES");
    for dest in &report.destinations {
        let order = dest
            .assigned_order
            .map(|o| o.to_string())
            .unwrap_or_else(|| "-".into());
        let pieces = if dest.state == DestinationState::Idle {
            "-".to_string()
        } else {
            format!("{}/{}", dest.confirmed_pieces, dest.required_pieces)
        };
        println!("{:>4}  {:<11} {:>8} {:>9}", dest.id, dest.state, order, pieces);
    }
    if !report.pending.is_empty() {
        let pending: Vec<String> = report.pending.iter().map(u16::to_string).collect();
        println!("Awaiting review: {}", pending.join(", "));
    }
}

fn cmd_check_manifest(file: &Path, json: bool) -> Result<()> {
    let manifest = Manifest::from_file(file)
        .with_context(|| format!("Failed to load manifest {}", file.display()))?;
    let totals = manifest.totals();

    if json {
        println!("{}", serde_json::to_string_pretty(&totals)?);
        return Ok(());
    }

    println!("{:<16} {:<12} {:>7} {:>8}", "SKU", "LOT", "ORDERS", "PIECES");
    for t in &totals {
        println!("{:<16} {:<12} {:>7} {:>8}", t.sku, t.lot, t.orders, t.pieces);
    }
    println!();
    println!("{} order lines", manifest.len());
    for rejected in manifest.rejected() {
        println!("skipped: {rejected}");
    }
    Ok(())
}

fn cmd_gen_config(output: &Path) -> Result<()> {
    let text = StationConfig::default().to_toml_string()?;
    std::fs::write(output, text)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Configuration written to {}", output.display());
    Ok(())
}

fn cmd_ports() -> Result<()> {
    let ports = list_ports().context("Failed to list serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{:<24} {}", port.name, port.kind);
    }
    Ok(())
}

/// Setup Ctrl+C handler.
fn ctrlc_handler(stop_handle: StopHandle) {
    let _ = ctrlc::set_handler(move || {
        tracing::info!("Received Ctrl+C, shutting down...");
        stop_handle.stop();
    });
}

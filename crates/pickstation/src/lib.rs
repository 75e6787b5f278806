// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pick-to-light station host
//!
//! Drives a fulfillment station's destination LEDs, seven-segment displays
//! and confirmation buttons through a microcontroller on a serial line, and
//! reconciles what the operator confirms against the order manifest.
//!
//! # Features
//!
//! - **Line protocol**: newline framing, `boton_N` / `+N` / `-N` events,
//!   `ENCENDER_*` / `ACTUALIZAR_*` / `APAGAR_*` commands (two dialects)
//! - **Reconciliation**: per-destination state machine with short-ship and
//!   lot substitution review
//! - **Backorders**: append-only CSV or JSON Lines records
//! - **Transports**: serial port, or an in-memory loopback for dry runs
//!
//! # Example
//!
//! ```rust,ignore
//! use pickstation::{Manifest, MemoryBackorderSink, SerialTransport, Station, StationConfig};
//!
//! let config = StationConfig::from_file("station.toml")?;
//! let (reader, writer) = SerialTransport::open(&config.serial)?;
//! let (tx, rx) = crossbeam::channel::unbounded();
//!
//! let mut station = Station::new(&config, Box::new(reader), Box::new(writer),
//!     Box::new(MemoryBackorderSink::new()), rx);
//! station.load_manifest(Manifest::from_file("orders.csv")?);
//! let summary = station.run(|notice| println!("{notice:?}"))?;
//! ```

mod backorder;
mod config;
mod encoder;
mod engine;
mod error;
mod framer;
mod manifest;
mod operator;
mod protocol;
mod queue;
mod reader;
mod registry;
mod station;
mod transport;

pub use backorder::{
    BackorderFormat, BackorderRecord, BackorderSink, FileBackorderSink, MemoryBackorderSink,
    ReasonCode, CSV_HEADER,
};
pub use config::{
    BackorderConfig, ConfigError, SerialConfig, StationConfig, StationSettings, MAX_DESTINATIONS,
};
pub use encoder::CommandEncoder;
pub use engine::{
    AllocationStrategy, CancelSnapshot, Engine, EngineStats, RetryPolicy, StatusReport,
    Substitute,
};
pub use error::{Result, StationError};
pub use framer::{LineFramer, DEFAULT_MAX_LINE};
pub use manifest::{LotTotal, Manifest, ManifestError, OrderLine};
pub use operator::{spawn_console, OperatorCommand, HELP};
pub use protocol::{Command, Delta, DeviceEvent, Dialect};
pub use queue::InboundQueue;
pub use reader::{run_reader, spawn_reader, ReaderStats};
pub use registry::{
    AdjustPolicy, ClosedDestination, Destination, DestinationId, DestinationState, Registry,
};
pub use station::{Notice, Station, StationSummary, StopHandle};
pub use transport::{
    list_ports, DeviceReader, DeviceWriter, MemoryReader, MemoryTransport, MemoryWriter,
    PortEntry, SerialReader, SerialTransport, SerialWriter,
};

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Backorder record sinks.
//!
//! Records are append-only facts written when a destination closes. The file
//! sink creates one file per station run:
//!
//! ```text
//! backorders_2026-03-14_09-30-00.csv
//! backorders_2026-03-14_09-30-00.jsonl
//! ```

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// CSV header line.
pub const CSV_HEADER: &str =
    "sku,lot_required,lot_confirmed,order,destination,required_pieces,confirmed_pieces,reason";

/// Why a record was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasonCode {
    Ok,
    Short,
    Substituted,
    Cancelled,
}

impl ReasonCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ReasonCode::Ok => "ok",
            ReasonCode::Short => "short",
            ReasonCode::Substituted => "substituted",
            ReasonCode::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One closure fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackorderRecord {
    pub sku: String,
    pub lot_required: String,
    pub lot_confirmed: String,
    pub order: u32,
    pub destination: u16,
    pub required_pieces: u32,
    pub confirmed_pieces: u32,
    pub reason: ReasonCode,
}

impl BackorderRecord {
    /// CSV row for this record, without the line terminator.
    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{}",
            csv_field(&self.sku),
            csv_field(&self.lot_required),
            csv_field(&self.lot_confirmed),
            self.order,
            self.destination,
            self.required_pieces,
            self.confirmed_pieces,
            self.reason
        )
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Output file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackorderFormat {
    #[default]
    Csv,
    JsonLines,
}

impl BackorderFormat {
    pub fn extension(self) -> &'static str {
        match self {
            BackorderFormat::Csv => "csv",
            BackorderFormat::JsonLines => "jsonl",
        }
    }
}

/// Append-only destination for backorder records.
pub trait BackorderSink: Send {
    /// Append one record. The record must be durable when this returns.
    fn append(&mut self, record: &BackorderRecord) -> io::Result<()>;

    /// Human-readable location, for logs.
    fn describe(&self) -> String;
}

/// File-backed sink, flushed after every record.
pub struct FileBackorderSink {
    path: PathBuf,
    writer: BufWriter<File>,
    format: BackorderFormat,
}

impl FileBackorderSink {
    /// Create a timestamped file in `directory`.
    pub fn create(directory: impl AsRef<Path>, format: BackorderFormat) -> io::Result<Self> {
        let directory = directory.as_ref();
        std::fs::create_dir_all(directory)?;
        let ts = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
        let path = directory.join(format!("backorders_{}.{}", ts, format.extension()));
        Self::open(path, format)
    }

    /// Open `path` for appending; a CSV header is written if the file is new.
    pub fn open(path: impl AsRef<Path>, format: BackorderFormat) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let is_new = file.metadata()?.len() == 0;
        let mut writer = BufWriter::new(file);

        if is_new && format == BackorderFormat::Csv {
            writeln!(writer, "{}", CSV_HEADER)?;
            writer.flush()?;
        }

        tracing::info!(path = %path.display(), ?format, "Backorder file ready");
        Ok(Self {
            path,
            writer,
            format,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BackorderSink for FileBackorderSink {
    fn append(&mut self, record: &BackorderRecord) -> io::Result<()> {
        match self.format {
            BackorderFormat::Csv => writeln!(self.writer, "{}", record.to_csv_row())?,
            BackorderFormat::JsonLines => {
                let line = serde_json::to_string(record)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                writeln!(self.writer, "{}", line)?;
            }
        }
        self.writer.flush()
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-memory sink. Clones share the same record list.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackorderSink {
    records: Arc<Mutex<Vec<BackorderRecord>>>,
}

impl MemoryBackorderSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything appended so far.
    pub fn records(&self) -> Vec<BackorderRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl BackorderSink for MemoryBackorderSink {
    fn append(&mut self, record: &BackorderRecord) -> io::Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

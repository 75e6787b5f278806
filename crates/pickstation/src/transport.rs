// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Byte transport to the station microcontroller.
//!
//! The link is split into a read half, owned by the reading loop, and a
//! write half, owned by the command encoder. The two halves never share a
//! lock.

use crate::config::SerialConfig;
use crate::error::StationError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;

/// Read half of the device link.
pub trait DeviceReader: Send {
    /// Read available bytes into `buf`.
    ///
    /// Returns `Ok(0)` when the read timeout elapses with no data.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StationError>;
}

/// Write half of the device link.
pub trait DeviceWriter: Send {
    /// Write `line` followed by the `\n` delimiter and flush.
    fn write_line(&mut self, line: &str) -> Result<(), StationError>;
}

// ---------------------------------------------------------------------------
// Serial transport
// ---------------------------------------------------------------------------

/// Serial port transport (8N1, no flow control).
pub struct SerialTransport;

impl SerialTransport {
    /// Open the configured port and split it into read and write halves.
    pub fn open(config: &SerialConfig) -> Result<(SerialReader, SerialWriter), StationError> {
        let port = serialport::new(config.port.as_str(), config.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(config.timeout())
            .open()
            .map_err(|e| StationError::Transport(format!("open {}: {}", config.port, e)))?;

        let writer = port.try_clone()?;

        tracing::info!(
            port = %config.port,
            baud = config.baud_rate,
            timeout_ms = config.timeout_ms,
            "Serial port opened"
        );

        Ok((SerialReader { port }, SerialWriter { port: writer }))
    }
}

/// Read half of a serial port.
pub struct SerialReader {
    port: Box<dyn serialport::SerialPort>,
}

impl DeviceReader for SerialReader {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StationError> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(0),
            Err(e) => Err(StationError::Transport(format!("read: {}", e))),
        }
    }
}

/// Write half of a serial port.
pub struct SerialWriter {
    port: Box<dyn serialport::SerialPort>,
}

impl DeviceWriter for SerialWriter {
    fn write_line(&mut self, line: &str) -> Result<(), StationError> {
        self.port
            .write_all(line.as_bytes())
            .and_then(|_| self.port.write_all(b"\n"))
            .and_then(|_| self.port.flush())
            .map_err(|e| StationError::Transport(format!("write {:?}: {}", line, e)))
    }
}

/// Serial port found on this host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortEntry {
    pub name: String,
    pub kind: String,
}

/// Enumerate serial ports.
pub fn list_ports() -> Result<Vec<PortEntry>, StationError> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|p| {
            let kind = match p.port_type {
                serialport::SerialPortType::UsbPort(usb) => format!(
                    "usb {:04x}:{:04x} {}",
                    usb.vid,
                    usb.pid,
                    usb.product.unwrap_or_default()
                ),
                serialport::SerialPortType::PciPort => "pci".to_string(),
                serialport::SerialPortType::BluetoothPort => "bluetooth".to_string(),
                serialport::SerialPortType::Unknown => "unknown".to_string(),
            };
            PortEntry {
                name: p.port_name,
                kind: kind.trim_end().to_string(),
            }
        })
        .collect())
}

// ---------------------------------------------------------------------------
// In-memory transport
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryLink {
    inbound: VecDeque<u8>,
    sent: Vec<String>,
    fail_writes: bool,
}

/// In-process loopback standing in for the device.
///
/// The test (or `--dry-run` console) plays the device: [`inject`] queues
/// bytes for the read half and [`sent`] returns every line the write half
/// received. Clones share the same link.
///
/// [`inject`]: MemoryTransport::inject
/// [`sent`]: MemoryTransport::sent
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    link: Arc<Mutex<MemoryLink>>,
    read_timeout: Duration,
}

impl MemoryTransport {
    pub fn new(read_timeout: Duration) -> Self {
        Self {
            link: Arc::new(Mutex::new(MemoryLink::default())),
            read_timeout,
        }
    }

    /// Queue raw bytes as if the device had sent them.
    pub fn inject(&self, bytes: &[u8]) {
        self.link.lock().inbound.extend(bytes.iter().copied());
    }

    /// Every line written by the host so far.
    pub fn sent(&self) -> Vec<String> {
        self.link.lock().sent.clone()
    }

    /// Take and clear the written lines.
    pub fn take_sent(&self) -> Vec<String> {
        std::mem::take(&mut self.link.lock().sent)
    }

    /// Make subsequent writes fail with a transport error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.link.lock().fail_writes = fail;
    }

    pub fn reader(&self) -> MemoryReader {
        MemoryReader {
            link: self.link.clone(),
            read_timeout: self.read_timeout,
        }
    }

    pub fn writer(&self) -> MemoryWriter {
        MemoryWriter {
            link: self.link.clone(),
        }
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new(Duration::from_millis(5))
    }
}

pub struct MemoryReader {
    link: Arc<Mutex<MemoryLink>>,
    read_timeout: Duration,
}

impl DeviceReader for MemoryReader {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StationError> {
        {
            let mut link = self.link.lock();
            if !link.inbound.is_empty() {
                let n = buf.len().min(link.inbound.len());
                for (slot, byte) in buf.iter_mut().zip(link.inbound.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
        }
        std::thread::sleep(self.read_timeout);
        Ok(0)
    }
}

pub struct MemoryWriter {
    link: Arc<Mutex<MemoryLink>>,
}

impl DeviceWriter for MemoryWriter {
    fn write_line(&mut self, line: &str) -> Result<(), StationError> {
        let mut link = self.link.lock();
        if link.fail_writes {
            return Err(StationError::Transport(format!(
                "write {:?}: link down",
                line
            )));
        }
        link.sent.push(line.to_string());
        Ok(())
    }
}

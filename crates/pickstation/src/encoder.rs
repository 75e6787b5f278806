// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Outbound command encoder.

use crate::error::StationError;
use crate::protocol::{Command, Dialect};
use crate::transport::DeviceWriter;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Formats commands and writes them to the device, one at a time.
///
/// Clones share the writer; the mutex around it is the only thing
/// serializing concurrent senders. Failed writes are reported, never retried.
#[derive(Clone)]
pub struct CommandEncoder {
    writer: Arc<Mutex<Box<dyn DeviceWriter>>>,
    dialect: Dialect,
    sent: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl CommandEncoder {
    pub fn new(writer: Box<dyn DeviceWriter>, dialect: Dialect) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
            dialect,
            sent: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Encode and write one command.
    pub fn send(&self, command: &Command) -> Result<(), StationError> {
        let line = command.encode(self.dialect);
        let result = self.writer.lock().write_line(&line);
        match &result {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(command = %line, "Sent");
            }
            Err(_) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
        result
    }

    /// Write every command in order. Failures are logged and the remaining
    /// commands are still attempted; returns the number of failures.
    pub fn send_all(&self, commands: &[Command]) -> usize {
        let mut failures = 0;
        for command in commands {
            if let Err(e) = self.send(command) {
                failures += 1;
                tracing::warn!(error = %e, "Device command not delivered");
            }
        }
        failures
    }

    pub fn commands_sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn commands_failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Line framing for the device link.
//!
//! The microcontroller emits one event per line:
//!
//! ```text
//! boton_3\r\n
//! +1\n
//! -2\n
//! ```
//!
//! [`LineFramer`] accumulates raw bytes and yields each complete line with
//! the delimiter stripped and surrounding whitespace (spaces, `\r`, `\t`)
//! trimmed. Blank lines are dropped. A line longer than the configured
//! limit is reported once as [`StationError::Framing`] and the rest of it
//! is discarded up to the next delimiter.

use crate::error::StationError;

/// Line delimiter
pub const DELIMITER: u8 = b'\n';

/// Default maximum line length in bytes
pub const DEFAULT_MAX_LINE: usize = 256;

/// Stateful newline framer.
#[derive(Debug)]
pub struct LineFramer {
    buf: Vec<u8>,
    max_line: usize,
    /// Set after an overflow until the next delimiter is seen
    discarding: bool,
    overflows: u64,
}

impl LineFramer {
    /// Create a framer that rejects lines longer than `max_line` bytes.
    pub fn new(max_line: usize) -> Self {
        Self {
            buf: Vec::with_capacity(max_line.min(1024)),
            max_line: max_line.max(1),
            discarding: false,
            overflows: 0,
        }
    }

    /// Feed raw bytes, returning every message completed by them.
    ///
    /// Messages and framing errors are returned in stream order.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<String, StationError>> {
        let mut out = Vec::new();

        for &byte in bytes {
            if byte == DELIMITER {
                if self.discarding {
                    self.discarding = false;
                } else if let Some(line) = self.take_line() {
                    out.push(Ok(line));
                }
                self.buf.clear();
                continue;
            }

            if self.discarding {
                continue;
            }

            self.buf.push(byte);
            if self.buf.len() > self.max_line {
                out.push(Err(StationError::Framing {
                    len: self.buf.len(),
                    limit: self.max_line,
                }));
                self.overflows += 1;
                self.buf.clear();
                self.discarding = true;
            }
        }

        out
    }

    fn take_line(&self) -> Option<String> {
        let text = String::from_utf8_lossy(&self.buf);
        let trimmed = text.trim_matches(|c: char| c == ' ' || c == '\r' || c == '\t');
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    /// Bytes held waiting for a delimiter.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Number of overlong lines dropped so far.
    pub fn overflows(&self) -> u64 {
        self.overflows
    }

    /// Drop any partial line.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.discarding = false;
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE)
    }
}

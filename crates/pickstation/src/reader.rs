// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Device reading loop.

use crate::framer::LineFramer;
use crate::queue::InboundQueue;
use crate::transport::DeviceReader;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const READ_CHUNK: usize = 256;

/// Counters reported when the loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderStats {
    pub bytes_read: u64,
    pub messages: u64,
    pub framing_errors: u64,
    pub read_errors: u64,
}

/// Read, frame and queue device messages until `running` is cleared.
///
/// A read error is logged, followed by a pause of `error_backoff` before the
/// next attempt.
pub fn run_reader(
    mut reader: Box<dyn DeviceReader>,
    queue: InboundQueue,
    running: Arc<AtomicBool>,
    max_line: usize,
    error_backoff: Duration,
) -> ReaderStats {
    let mut framer = LineFramer::new(max_line);
    let mut stats = ReaderStats::default();
    let mut buf = [0u8; READ_CHUNK];

    tracing::debug!("Reading loop started");

    while running.load(Ordering::SeqCst) {
        let n = match reader.read(&mut buf) {
            Ok(0) => continue,
            Ok(n) => n,
            Err(e) => {
                stats.read_errors += 1;
                tracing::warn!(error = %e, "Device read failed");
                thread::sleep(error_backoff);
                continue;
            }
        };
        stats.bytes_read += n as u64;

        for item in framer.feed(&buf[..n]) {
            match item {
                Ok(line) => {
                    tracing::trace!(message = %line, "Received");
                    stats.messages += 1;
                    queue.push(line);
                }
                Err(e) => {
                    stats.framing_errors += 1;
                    tracing::warn!(error = %e, "Dropping overlong device line");
                }
            }
        }
    }

    tracing::debug!(
        bytes = stats.bytes_read,
        messages = stats.messages,
        framing_errors = stats.framing_errors,
        "Reading loop stopped"
    );
    stats
}

/// Run [`run_reader`] on a dedicated thread.
pub fn spawn_reader(
    reader: Box<dyn DeviceReader>,
    queue: InboundQueue,
    running: Arc<AtomicBool>,
    max_line: usize,
    error_backoff: Duration,
) -> io::Result<JoinHandle<ReaderStats>> {
    thread::Builder::new()
        .name("pickstation-reader".into())
        .spawn(move || run_reader(reader, queue, running, max_line, error_backoff))
}

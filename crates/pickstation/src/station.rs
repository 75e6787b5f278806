// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Station runtime: reading thread plus the reconciliation loop.
//!
//! Each loop iteration first handles every queued device message, then every
//! queued operator command, then waits up to the poll interval for the next
//! operator command. A command that arrives during the wait is handled on
//! the following iteration, after the device messages queued meanwhile.

use crate::backorder::BackorderSink;
use crate::config::StationConfig;
use crate::encoder::CommandEncoder;
use crate::engine::{Engine, EngineStats, StatusReport};
use crate::error::StationError;
use crate::manifest::Manifest;
use crate::operator::OperatorCommand;
use crate::protocol::Command;
use crate::queue::InboundQueue;
use crate::reader::{spawn_reader, ReaderStats};
use crate::transport::{DeviceReader, DeviceWriter};
use crossbeam::channel::{Receiver, RecvTimeoutError, TryRecvError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Handle to stop a running station.
#[derive(Clone)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
}

impl StopHandle {
    /// Stop the station.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Output meant for the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Status(StatusReport),
    Help,
    /// An operator command failed; the text says why.
    Rejected(String),
}

/// Totals reported at shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StationSummary {
    pub engine: EngineStats,
    pub reader: ReaderStats,
    pub commands_sent: u64,
    pub commands_failed: u64,
    pub discarded_at_startup: usize,
}

/// A running station: one device link, one engine, one operator channel.
pub struct Station {
    engine: Engine,
    encoder: CommandEncoder,
    queue: InboundQueue,
    device: Option<Box<dyn DeviceReader>>,
    reader: Option<JoinHandle<ReaderStats>>,
    running: Arc<AtomicBool>,
    operator: Receiver<OperatorCommand>,
    operator_closed: bool,
    deferred: VecDeque<OperatorCommand>,
    poll_interval: Duration,
    read_timeout: Duration,
    settle: Duration,
    max_line: usize,
    discarded_at_startup: usize,
}

impl Station {
    pub fn new(
        config: &StationConfig,
        device: Box<dyn DeviceReader>,
        writer: Box<dyn DeviceWriter>,
        sink: Box<dyn BackorderSink>,
        operator: Receiver<OperatorCommand>,
    ) -> Self {
        Self {
            engine: Engine::new(&config.station, sink),
            encoder: CommandEncoder::new(writer, config.station.dialect),
            queue: InboundQueue::new(),
            device: Some(device),
            reader: None,
            running: Arc::new(AtomicBool::new(true)),
            operator,
            operator_closed: false,
            deferred: VecDeque::new(),
            poll_interval: config.station.poll_interval(),
            read_timeout: config.serial.timeout(),
            settle: config.serial.startup_settle(),
            max_line: config.station.max_line_bytes,
            discarded_at_startup: 0,
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            running: self.running.clone(),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn queue(&self) -> &InboundQueue {
        &self.queue
    }

    /// Install a manifest, sending whatever the engine emits.
    pub fn load_manifest(&mut self, manifest: Manifest) {
        let commands = self.engine.load_manifest(manifest);
        self.send(&commands);
    }

    /// Start the reading thread, wait for the device to settle and discard
    /// whatever it printed while booting.
    pub fn start(&mut self) -> Result<(), StationError> {
        let Some(device) = self.device.take() else {
            return Ok(());
        };
        let handle = spawn_reader(
            device,
            self.queue.clone(),
            self.running.clone(),
            self.max_line,
            self.read_timeout,
        )?;
        self.reader = Some(handle);

        if !self.settle.is_zero() {
            tracing::info!(settle_ms = self.settle.as_millis() as u64, "Waiting for device");
            let deadline = Instant::now() + self.settle;
            while self.running.load(Ordering::SeqCst) && Instant::now() < deadline {
                thread::sleep(self.poll_interval.min(deadline.saturating_duration_since(Instant::now())));
            }
        }
        self.discarded_at_startup = self.queue.clear();
        if self.discarded_at_startup > 0 {
            tracing::debug!(
                discarded = self.discarded_at_startup,
                "Discarded device output from startup"
            );
        }
        Ok(())
    }

    /// One loop iteration. Returns `false` once the station should stop.
    pub fn step<F: FnMut(Notice)>(&mut self, on_notice: &mut F) -> bool {
        for line in self.queue.drain() {
            let commands = self.engine.handle_line(&line);
            self.send(&commands);
        }

        while let Some(command) = self.deferred.pop_front() {
            if !self.handle_operator(command, on_notice) {
                return false;
            }
        }

        if self.operator_closed {
            thread::sleep(self.poll_interval);
            return self.running.load(Ordering::SeqCst);
        }

        loop {
            match self.operator.try_recv() {
                Ok(command) => {
                    if !self.handle_operator(command, on_notice) {
                        return false;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.operator_closed = true;
                    return self.running.load(Ordering::SeqCst);
                }
            }
        }

        match self.operator.recv_timeout(self.poll_interval) {
            Ok(command) => self.deferred.push_back(command),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => self.operator_closed = true,
        }
        self.running.load(Ordering::SeqCst)
    }

    /// Start, loop until stopped or told to quit, then shut down.
    pub fn run<F: FnMut(Notice)>(mut self, mut on_notice: F) -> Result<StationSummary, StationError> {
        self.start()?;
        tracing::info!(
            destinations = self.engine.registry().count(),
            "Station ready"
        );
        while self.running.load(Ordering::SeqCst) {
            if !self.step(&mut on_notice) {
                break;
            }
        }
        Ok(self.shutdown())
    }

    /// Extinguish everything, stop the reading thread and join it.
    pub fn shutdown(mut self) -> StationSummary {
        let commands = self.engine.shutdown();
        self.send(&commands);

        self.running.store(false, Ordering::SeqCst);
        let reader = match self.reader.take().map(JoinHandle::join) {
            Some(Ok(stats)) => stats,
            Some(Err(_)) => {
                tracing::error!("Reading thread panicked");
                ReaderStats::default()
            }
            None => ReaderStats::default(),
        };

        let summary = StationSummary {
            engine: self.engine.stats(),
            reader,
            commands_sent: self.encoder.commands_sent(),
            commands_failed: self.encoder.commands_failed(),
            discarded_at_startup: self.discarded_at_startup,
        };
        tracing::info!(
            sessions_started = summary.engine.sessions_started,
            sessions_completed = summary.engine.sessions_completed,
            sessions_cancelled = summary.engine.sessions_cancelled,
            records_written = summary.engine.records_written,
            messages_discarded = summary.engine.messages_discarded,
            commands_sent = summary.commands_sent,
            "Station stopped"
        );
        summary
    }

    fn send(&self, commands: &[Command]) {
        if !commands.is_empty() {
            self.encoder.send_all(commands);
        }
    }

    fn handle_operator<F: FnMut(Notice)>(&mut self, command: OperatorCommand, on_notice: &mut F) -> bool {
        let result = match command {
            OperatorCommand::StartSession { sku, lot } => self.engine.start_session(&sku, &lot),
            OperatorCommand::Assign {
                destination,
                order,
                pieces,
            } => self.engine.assign(destination, order, pieces),
            OperatorCommand::Finalize(n) => self.engine.finalize(n),
            OperatorCommand::Confirm(n) => self.engine.confirm(n),
            OperatorCommand::Adjust(n, delta) => self.engine.adjust(n, delta),
            OperatorCommand::Accept => self.engine.accept(),
            OperatorCommand::Reject => self.engine.reject(),
            OperatorCommand::Substitute(subs) => self.engine.substitute(&subs),
            OperatorCommand::CancelSession => self.engine.cancel_session(),
            OperatorCommand::ClearDisplays => Ok(self.engine.clear_displays()),
            OperatorCommand::DisplayCompleted => Ok(self.engine.display_completed()),
            OperatorCommand::LoadManifest(path) => Manifest::from_file(&path)
                .map(|m| self.engine.load_manifest(m))
                .map_err(StationError::from),
            OperatorCommand::Status => {
                on_notice(Notice::Status(self.engine.status()));
                Ok(Vec::new())
            }
            OperatorCommand::Help => {
                on_notice(Notice::Help);
                Ok(Vec::new())
            }
            OperatorCommand::Quit => {
                tracing::info!("Operator requested exit");
                return false;
            }
        };

        match result {
            Ok(commands) => self.send(&commands),
            Err(e) => {
                tracing::warn!(error = %e, "Operator command failed");
                on_notice(Notice::Rejected(e.to_string()));
            }
        }
        true
    }
}

impl Drop for Station {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backorder::{MemoryBackorderSink, ReasonCode};
    use crate::manifest::OrderLine;
    use crate::transport::MemoryTransport;
    use crossbeam::channel::{unbounded, Sender};

    fn config() -> StationConfig {
        let mut config = StationConfig::default();
        config.serial.startup_settle_ms = 0;
        config.serial.timeout_ms = 1;
        config.station.poll_interval_ms = 1;
        config
    }

    fn station(
        lines: Vec<OrderLine>,
    ) -> (Station, MemoryTransport, MemoryBackorderSink, Sender<OperatorCommand>) {
        let transport = MemoryTransport::new(Duration::from_millis(1));
        let sink = MemoryBackorderSink::new();
        let (tx, rx) = unbounded();
        let mut station = Station::new(
            &config(),
            Box::new(transport.reader()),
            Box::new(transport.writer()),
            Box::new(sink.clone()),
            rx,
        );
        station.load_manifest(Manifest::from_lines(lines).expect("manifest"));
        (station, transport, sink, tx)
    }

    fn wait_queued(station: &Station, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while station.queue().len() < n && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_device_messages_before_operator_commands() {
        let (mut station, transport, sink, tx) = station(vec![OrderLine::new("A1", "L1", 10, 1)]);
        station.start().expect("start");
        let mut ignore = |_: Notice| {};

        tx.send(OperatorCommand::StartSession {
            sku: "A1".into(),
            lot: "L1".into(),
        })
        .expect("send");
        assert!(station.step(&mut ignore));
        assert_eq!(transport.take_sent(), vec!["APAGAR_TODO", "ENCENDER_1_1"]);

        // Both are waiting when the iteration begins; the device wins.
        transport.inject(b"+1\n");
        wait_queued(&station, 1);
        tx.send(OperatorCommand::Confirm(1)).expect("send");
        assert!(station.step(&mut ignore));

        assert_eq!(transport.take_sent(), vec!["ACTUALIZAR_1_1", "APAGAR_DESTINO_1"]);
        assert_eq!(sink.records()[0].reason, ReasonCode::Ok);

        let summary = station.shutdown();
        assert_eq!(summary.engine.records_written, 1);
        assert_eq!(transport.sent().last().map(String::as_str), Some("APAGAR_TODO"));
    }

    #[test]
    fn test_notices_and_quit() {
        let (mut station, _transport, _sink, tx) = station(vec![OrderLine::new("A1", "L1", 10, 1)]);
        let mut notices = Vec::new();

        tx.send(OperatorCommand::Status).expect("send");
        tx.send(OperatorCommand::Accept).expect("send");
        tx.send(OperatorCommand::Quit).expect("send");
        tx.send(OperatorCommand::Help).expect("send");

        let mut collect = |n: Notice| notices.push(n);
        assert!(!station.step(&mut collect));
        drop(collect);

        assert_eq!(notices.len(), 2);
        assert!(matches!(&notices[0], Notice::Status(s) if s.manifest_lines == 1));
        assert!(matches!(&notices[1], Notice::Rejected(_)));
    }

    #[test]
    fn test_run_stops_on_stop_handle() {
        let (station, transport, _sink, _tx) = station(vec![OrderLine::new("A1", "L1", 10, 1)]);
        let stop = station.stop_handle();

        let handle = thread::spawn(move || station.run(|_| {}));
        thread::sleep(Duration::from_millis(20));
        stop.stop();

        let summary = handle
            .join()
            .expect("station thread panicked")
            .expect("run");
        assert!(!stop.is_running());
        assert_eq!(summary.engine.sessions_started, 0);
        assert_eq!(transport.sent(), vec!["APAGAR_TODO"]);
    }

    #[test]
    fn test_load_manifest_command() {
        let (mut station, _transport, _sink, tx) = station(vec![OrderLine::new("A1", "L1", 10, 1)]);
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("next.csv");
        std::fs::write(&path, "sku,lot,order,pieces\nB1,L2,4,2\nB1,L2,5,1\n").expect("write");

        tx.send(OperatorCommand::LoadManifest(path)).expect("send");
        tx.send(OperatorCommand::LoadManifest(dir.path().join("missing.csv")))
            .expect("send");

        let mut rejected = 0;
        let mut count = |n: Notice| {
            if matches!(n, Notice::Rejected(_)) {
                rejected += 1;
            }
        };
        assert!(station.step(&mut count));
        drop(count);

        assert_eq!(rejected, 1);
        assert_eq!(station.engine().status().manifest_lines, 2);
    }
}

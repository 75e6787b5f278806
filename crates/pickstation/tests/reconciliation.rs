// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::too_many_lines)] // Scenario tests

//! End-to-end reconciliation scenarios.
//!
//! The device side is played through `MemoryTransport`: bytes are injected
//! into the read half and the host's commands are read back from the write
//! half. Operator commands go through the same channel the console uses.

use crossbeam::channel::{unbounded, Sender};
use pickstation::{
    BackorderFormat, FileBackorderSink, Manifest, MemoryBackorderSink, MemoryTransport, Notice,
    OperatorCommand, OrderLine, ReasonCode, Station, StationConfig, CSV_HEADER,
};
use std::thread;
use std::time::{Duration, Instant};

struct Rig {
    station: Station,
    device: MemoryTransport,
    records: MemoryBackorderSink,
    operator: Sender<OperatorCommand>,
}

fn config() -> StationConfig {
    let mut config = StationConfig::default();
    config.serial.startup_settle_ms = 0;
    config.serial.timeout_ms = 1;
    config.station.poll_interval_ms = 1;
    config
}

fn rig(lines: Vec<OrderLine>) -> Rig {
    let device = MemoryTransport::new(Duration::from_millis(1));
    let records = MemoryBackorderSink::new();
    let (operator, rx) = unbounded();
    let mut station = Station::new(
        &config(),
        Box::new(device.reader()),
        Box::new(device.writer()),
        Box::new(records.clone()),
        rx,
    );
    station.load_manifest(Manifest::from_lines(lines).expect("manifest"));
    station.start().expect("start");
    Rig {
        station,
        device,
        records,
        operator,
    }
}

impl Rig {
    /// Device sends `lines`; wait until the reader queued them, then run one
    /// iteration.
    fn device_says(&mut self, lines: &[&str]) -> Vec<String> {
        for line in lines {
            self.device.inject(format!("{line}\n").as_bytes());
        }
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.station.queue().len() < lines.len() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        self.step();
        self.device.take_sent()
    }

    fn operator_says(&mut self, line: &str) -> Vec<String> {
        let command = OperatorCommand::parse(line)
            .expect("operator command parses")
            .expect("not blank");
        self.operator.send(command).expect("station alive");
        self.step();
        self.device.take_sent()
    }

    fn step(&mut self) {
        let mut ignore = |_: Notice| {};
        assert!(self.station.step(&mut ignore));
    }
}

fn scenario_manifest() -> Vec<OrderLine> {
    vec![
        OrderLine::new("A1", "L1", 10, 3),
        OrderLine::new("A1", "L1", 11, 5),
    ]
}

#[test]
fn test_direct_confirmation_scenario() {
    let mut rig = rig(vec![OrderLine::new("A1", "L1", 10, 3)]);

    let sent = rig.operator_says("scan A1 L1");
    assert_eq!(sent, vec!["APAGAR_TODO", "ENCENDER_1_3"]);

    let sent = rig.device_says(&["+1", "+1", "+1"]);
    assert_eq!(sent, vec!["ACTUALIZAR_1_1", "ACTUALIZAR_1_2", "ACTUALIZAR_1_3"]);

    let sent = rig.device_says(&["boton_1"]);
    assert_eq!(sent, vec!["APAGAR_DESTINO_1"]);

    let records = rig.records.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].to_csv_row(), "A1,L1,L1,10,1,3,3,ok");

    let manifest = rig.station.engine().manifest().expect("manifest");
    assert!(manifest.lines()[0].already_fulfilled);

    // A closed line is not offered again.
    rig.operator_says("scan A1 L1");
    assert!(!rig.station.engine().session_active());
}

#[test]
fn test_mismatch_reject_scenario() {
    let mut rig = rig(vec![OrderLine::new("A1", "L1", 10, 3)]);
    rig.operator_says("scan A1 L1");

    rig.device_says(&["+1"]);
    let sent = rig.device_says(&["boton_1"]);
    assert!(sent.is_empty());
    assert!(rig.records.is_empty());
    assert_eq!(rig.station.engine().status().pending, vec![1]);

    let sent = rig.operator_says("reject");
    assert!(sent.is_empty());
    let slot = rig.station.engine().status().destinations[0].clone();
    assert_eq!(slot.confirmed_pieces, 1);
    assert_eq!(slot.state.to_string(), "assigned");
    assert!(rig.records.is_empty());

    // Further adjustment then a matching confirmation closes it.
    let sent = rig.device_says(&["+1", "+1", "boton_1"]);
    assert_eq!(sent, vec!["ACTUALIZAR_1_2", "ACTUALIZAR_1_3", "APAGAR_DESTINO_1"]);
    assert_eq!(rig.records.records()[0].reason, ReasonCode::Ok);
}

#[test]
fn test_cancel_scenario() {
    let mut rig = rig(scenario_manifest());
    rig.operator_says("scan A1 L1");

    rig.device_says(&["+1", "+1", "+1", "boton_1", "+2"]);
    let sent = rig.operator_says("cancel");
    assert_eq!(sent, vec!["APAGAR_DESTINO_2"]);

    let records = rig.records.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].reason, ReasonCode::Cancelled);
    assert_eq!(records[1].destination, 2);
    assert_eq!(records[1].required_pieces, 5);
    assert_eq!(records[1].confirmed_pieces, 0);

    let manifest = rig.station.engine().manifest().expect("manifest");
    assert!(!manifest.lines()[1].already_fulfilled);

    // The cancelled line is eligible for the next session.
    let sent = rig.operator_says("scan A1 L1");
    assert_eq!(sent, vec!["APAGAR_TODO", "ENCENDER_1_5"]);
}

#[test]
fn test_substitution_records_sum_to_total() {
    let mut rig = rig(scenario_manifest());
    rig.operator_says("scan A1 L1");

    rig.device_says(&["+2", "+2", "boton_2"]);
    rig.operator_says("sub L9:5");
    assert!(rig.records.is_empty(), "over-allocation must be refused");

    let sent = rig.operator_says("sub L9:2");
    assert_eq!(sent, vec!["APAGAR_DESTINO_2"]);

    let records = rig.records.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].lot_confirmed, "L1");
    assert_eq!(records[0].reason, ReasonCode::Short);
    assert_eq!(records[1].lot_confirmed, "L9");
    assert_eq!(records[1].reason, ReasonCode::Substituted);
    let total: u32 = records.iter().map(|r| r.confirmed_pieces).sum();
    assert_eq!(total, 4);
}

#[test]
fn test_malformed_input_does_not_disturb_other_destinations() {
    let mut rig = rig(scenario_manifest());
    rig.operator_says("scan A1 L1");

    let sent = rig.device_says(&["+1", "boton_x", "+7", "-", "READY", "boton_3", "+2"]);
    assert_eq!(sent, vec!["ACTUALIZAR_1_1", "ACTUALIZAR_2_1"]);

    let stats = rig.station.engine().stats();
    assert_eq!(stats.messages_discarded, 3);
    assert_eq!(stats.info_messages, 2);
}

#[test]
fn test_write_failures_do_not_block_reconciliation() {
    let mut rig = rig(vec![OrderLine::new("A1", "L1", 10, 1)]);
    rig.operator_says("scan A1 L1");

    rig.device.set_fail_writes(true);
    let sent = rig.device_says(&["+1", "boton_1"]);
    assert!(sent.is_empty());
    assert_eq!(rig.records.records()[0].reason, ReasonCode::Ok);
    rig.device.set_fail_writes(false);

    let summary = rig.station.shutdown();
    assert_eq!(summary.commands_failed, 2);
    assert_eq!(summary.engine.sessions_completed, 1);
}

#[test]
fn test_file_sink_receives_records() {
    let dir = tempfile::tempdir().expect("tempdir");
    let sink = FileBackorderSink::create(dir.path(), BackorderFormat::Csv).expect("sink");
    let path = sink.path().to_path_buf();

    let device = MemoryTransport::new(Duration::from_millis(1));
    let (operator, rx) = unbounded();
    let mut station = Station::new(
        &config(),
        Box::new(device.reader()),
        Box::new(device.writer()),
        Box::new(sink),
        rx,
    );
    station.load_manifest(Manifest::from_lines(scenario_manifest()).expect("manifest"));

    operator
        .send(OperatorCommand::StartSession {
            sku: "A1".into(),
            lot: "L1".into(),
        })
        .expect("send");
    operator.send(OperatorCommand::Quit).expect("send");

    let summary = station.run(|_| {}).expect("run");
    assert_eq!(summary.engine.sessions_cancelled, 1);

    let content = std::fs::read_to_string(&path).expect("read");
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines[0], CSV_HEADER);
    assert_eq!(lines[1], "A1,L1,L1,10,1,3,0,cancelled");
    assert_eq!(lines[2], "A1,L1,L1,11,2,5,0,cancelled");
    assert_eq!(device.sent().last().map(String::as_str), Some("APAGAR_TODO"));
}

#[test]
fn test_oversized_substitution_leaves_destination_under_review() {
    let mut rig = rig(vec![OrderLine::new("A1", "L1", 10, 5)]);
    rig.operator_says("scan A1 L1");
    rig.device_says(&["+1", "boton_1"]);

    let sent = rig.operator_says("sub L7:4294967295 L8:1");
    assert!(sent.is_empty());
    assert!(rig.records.is_empty());
    assert_eq!(rig.station.engine().status().pending, vec![1]);

    let sent = rig.operator_says("sub L7:4");
    assert_eq!(sent, vec!["APAGAR_DESTINO_1"]);
    let total: u32 = rig.records.records().iter().map(|r| r.confirmed_pieces).sum();
    assert_eq!(total, 5);
}

#[test]
fn test_operator_assign_and_finalize() {
    let mut rig = rig(vec![OrderLine::new("B2", "L4", 12345, 50)]);

    let sent = rig.operator_says("i 2 12345 50");
    assert_eq!(sent, vec!["ENCENDER_2_50"]);

    let sent = rig.device_says(&["+2", "+2"]);
    assert_eq!(sent, vec!["ACTUALIZAR_2_1", "ACTUALIZAR_2_2"]);

    let sent = rig.operator_says("f 2");
    assert_eq!(sent, vec!["APAGAR_DESTINO_2"]);

    let records = rig.records.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].to_csv_row(), "B2,L4,L4,12345,2,50,2,short");
    assert!(rig.station.engine().registry().active().is_empty());

    // Nothing left to finalize.
    assert!(rig.operator_says("f 2").is_empty());
    assert_eq!(rig.records.len(), 1);
}

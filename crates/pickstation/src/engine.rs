// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reconciliation engine.
//!
//! Owns the destination registry, the manifest, the active session, the
//! pending confirmation queue and the backorder sink. Every operation
//! mutates that state and returns the device commands it produced; the
//! caller writes them once the engine has returned, so no device write
//! ever happens while registry state is borrowed.
//!
//! A session covers one scanned sku/lot:
//!
//! ```text
//! start_session(A1, L1)  -> APAGAR_TODO, ENCENDER_1_3, ENCENDER_2_5
//! "+1"                   -> ACTUALIZAR_1_1
//! "boton_1" (1 != 3)     -> (queued for review)
//! substitute L7:2        -> APAGAR_DESTINO_1  + records (L1 ok 1, L7 substituted 2)
//! cancel_session()       -> APAGAR_DESTINO_2  + record  (cancelled)
//! ```
//!
//! Outside a session the operator can bind an order to one destination
//! directly (`assign`) and force any open destination closed (`finalize`).
//! Manual assignments are matched to an open manifest line by order id
//! when one exists; records for unmatched ones carry an empty sku and lot.

use crate::backorder::{BackorderRecord, BackorderSink, ReasonCode};
use crate::config::StationSettings;
use crate::error::StationError;
use crate::manifest::{Manifest, ManifestError};
use crate::protocol::{Command, Delta, DeviceEvent};
use crate::registry::{ClosedDestination, Destination, DestinationId, DestinationState, Registry};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// How order lines are placed on destinations at session start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AllocationStrategy {
    /// Lowest idle destination, in manifest order.
    #[default]
    FirstAvailable,
    /// Destination number equals the order id; other orders are skipped.
    OrderId,
}

/// Whether lines closed in an earlier session are offered again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetryPolicy {
    #[default]
    SkipFulfilled,
    AlwaysRetry,
}

/// Confirmed quantity written on `cancelled` records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CancelSnapshot {
    #[default]
    Zero,
    Progress,
}

/// Quantity taken from another lot while resolving a short confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substitute {
    pub lot: String,
    pub pieces: u32,
}

/// Engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub sessions_started: u64,
    pub sessions_completed: u64,
    pub sessions_cancelled: u64,
    pub destinations_closed: u64,
    pub records_written: u64,
    pub sink_failures: u64,
    pub messages_discarded: u64,
    pub info_messages: u64,
}

/// Point-in-time view for the status command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub session: Option<(String, String)>,
    pub destinations: Vec<Destination>,
    pub pending: Vec<u16>,
    pub manifest_lines: usize,
}

#[derive(Debug)]
struct Session {
    sku: String,
    lot: String,
    /// Destination to manifest line index.
    assignments: BTreeMap<DestinationId, usize>,
}

/// The reconciliation state machine.
pub struct Engine {
    registry: Registry,
    manifest: Option<Manifest>,
    session: Option<Session>,
    pending: VecDeque<DestinationId>,
    /// Operator assignments, with the manifest line they matched.
    manual: BTreeMap<DestinationId, Option<usize>>,
    sink: Box<dyn BackorderSink>,
    allocation: AllocationStrategy,
    retry_policy: RetryPolicy,
    cancel_snapshot: CancelSnapshot,
    announce_completion: bool,
    announce_orders: bool,
    stats: EngineStats,
}

impl Engine {
    pub fn new(settings: &StationSettings, sink: Box<dyn BackorderSink>) -> Self {
        Self {
            registry: Registry::new(settings.destinations, settings.adjust_policy),
            manifest: None,
            session: None,
            pending: VecDeque::new(),
            manual: BTreeMap::new(),
            sink,
            allocation: settings.allocation,
            retry_policy: settings.retry_policy,
            cancel_snapshot: settings.cancel_snapshot,
            announce_completion: settings.announce_completion,
            announce_orders: settings.announce_orders,
            stats: EngineStats::default(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn manifest(&self) -> Option<&Manifest> {
        self.manifest.as_ref()
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn session_active(&self) -> bool {
        self.session.is_some()
    }

    /// Destinations waiting for operator review, oldest first.
    pub fn pending(&self) -> Vec<DestinationId> {
        self.pending.iter().copied().collect()
    }

    pub fn status(&self) -> StatusReport {
        StatusReport {
            session: self
                .session
                .as_ref()
                .map(|s| (s.sku.clone(), s.lot.clone())),
            destinations: self.registry.snapshot(),
            pending: self.pending.iter().map(|d| d.get()).collect(),
            manifest_lines: self.manifest.as_ref().map_or(0, Manifest::len),
        }
    }

    /// Replace the manifest. An active session is cancelled first and every
    /// destination returns to `Idle`.
    pub fn load_manifest(&mut self, manifest: Manifest) -> Vec<Command> {
        let commands = self.cancel_open();
        self.registry.reset_all();
        self.pending.clear();
        tracing::info!(lines = manifest.len(), "Manifest installed");
        self.manifest = Some(manifest);
        commands
    }

    // -----------------------------------------------------------------------
    // Session start
    // -----------------------------------------------------------------------

    /// Assign every open order line for `sku`/`lot` to a destination.
    pub fn start_session(&mut self, sku: &str, lot: &str) -> Result<Vec<Command>, StationError> {
        if let Some(session) = &self.session {
            return Err(StationError::SessionActive {
                sku: session.sku.clone(),
                lot: session.lot.clone(),
            });
        }
        let manifest = self
            .manifest
            .as_ref()
            .ok_or(StationError::Manifest(ManifestError::Empty))?;

        let candidates: Vec<usize> = manifest
            .matching(sku, lot)
            .into_iter()
            .filter(|&i| {
                manifest.line(i).is_some_and(|l| {
                    l.pieces > 0
                        && (self.retry_policy == RetryPolicy::AlwaysRetry || !l.already_fulfilled)
                })
            })
            .collect();

        let mut assignments = BTreeMap::new();
        let mut lights = Vec::new();

        for index in candidates {
            let Some(line) = manifest.line(index) else {
                continue;
            };
            let slot = match self.allocation {
                AllocationStrategy::FirstAvailable => self.registry.first_idle(),
                AllocationStrategy::OrderId => self
                    .registry
                    .id(i64::from(line.order))
                    .ok()
                    .filter(|&d| self.registry.is_idle(d)),
            };
            let Some(destination) = slot else {
                tracing::warn!(
                    order = line.order,
                    sku = %line.sku,
                    "No destination available for order, left for a later session"
                );
                continue;
            };

            self.registry.assign(destination, line.order, line.pieces)?;
            assignments.insert(destination, index);

            if self.announce_orders {
                lights.push(Command::AssignOrder {
                    destination,
                    order: line.order,
                    pieces: line.pieces,
                });
            }
            lights.push(Command::Illuminate {
                destination,
                pieces: line.pieces,
            });
            tracing::info!(
                destination = destination.get(),
                order = line.order,
                pieces = line.pieces,
                "Order assigned"
            );
        }

        if assignments.is_empty() {
            return Err(StationError::NothingToAssign {
                sku: sku.to_string(),
                lot: lot.to_string(),
            });
        }

        tracing::info!(sku, lot, destinations = assignments.len(), "Session started");
        self.session = Some(Session {
            sku: sku.to_string(),
            lot: lot.to_string(),
            assignments,
        });
        self.stats.sessions_started += 1;

        let mut commands = Vec::with_capacity(lights.len() + 1);
        commands.push(Command::ExtinguishAll);
        commands.extend(lights);
        Ok(commands)
    }

    /// Bind `order` to destination `raw` by hand.
    pub fn assign(&mut self, raw: i64, order: u32, pieces: u32) -> Result<Vec<Command>, StationError> {
        let destination = self.registry.id(raw)?;
        if order == 0 {
            return Err(StationError::parse(
                format!("assign {raw} {order} {pieces}"),
                "order id must be positive",
            ));
        }
        self.registry.assign(destination, order, pieces)?;

        let line = self.open_line_for_order(order);
        self.manual.insert(destination, line);
        tracing::info!(
            destination = destination.get(),
            order,
            pieces,
            manifest_line = ?line,
            "Order assigned by operator"
        );

        let mut commands = Vec::with_capacity(2);
        if self.announce_orders {
            commands.push(Command::AssignOrder {
                destination,
                order,
                pieces,
            });
        }
        commands.push(Command::Illuminate {
            destination,
            pieces,
        });
        Ok(commands)
    }

    /// Close destination `raw` with whatever count it shows, without review.
    pub fn finalize(&mut self, raw: i64) -> Result<Vec<Command>, StationError> {
        let destination = self.registry.id(raw)?;
        let closed = self.registry.close(destination)?;
        tracing::info!(
            destination = destination.get(),
            confirmed = closed.confirmed_pieces,
            required = closed.required_pieces,
            "Destination finalized by operator"
        );
        let records = self.closure_records(&closed, &[], u64::from(closed.confirmed_pieces));
        Ok(self.finish_closure(closed, records))
    }

    // -----------------------------------------------------------------------
    // Device and operator events
    // -----------------------------------------------------------------------

    /// Handle one framed device line. Recoverable errors are logged and the
    /// message is discarded.
    pub fn handle_line(&mut self, line: &str) -> Vec<Command> {
        let result = DeviceEvent::parse(line).and_then(|event| self.handle_event(event));
        match result {
            Ok(commands) => commands,
            Err(e) => {
                self.stats.messages_discarded += 1;
                tracing::warn!(message = %line, error = %e, "Device message discarded");
                Vec::new()
            }
        }
    }

    pub fn handle_event(&mut self, event: DeviceEvent) -> Result<Vec<Command>, StationError> {
        match event {
            DeviceEvent::Confirm(n) => self.confirm(i64::from(n)),
            DeviceEvent::Adjust(n, delta) => self.adjust(i64::from(n), delta),
            DeviceEvent::Info(text) => {
                self.stats.info_messages += 1;
                tracing::debug!(message = %text, "Device info");
                Ok(Vec::new())
            }
        }
    }

    /// Step the confirmed count of destination `raw`.
    pub fn adjust(&mut self, raw: i64, delta: Delta) -> Result<Vec<Command>, StationError> {
        let destination = self.registry.id(raw)?;
        let value = self
            .registry
            .adjust(destination, delta)
            .ok_or(StationError::NotAssigned(destination.get()))?;
        tracing::debug!(destination = destination.get(), value, "Count adjusted");
        Ok(vec![Command::UpdateDisplay { destination, value }])
    }

    /// Confirmation button (or operator confirm) on destination `raw`.
    pub fn confirm(&mut self, raw: i64) -> Result<Vec<Command>, StationError> {
        let destination = self.registry.id(raw)?;
        let slot = self.registry.get(destination);
        if !slot.state.is_active() {
            return Err(StationError::NotAssigned(destination.get()));
        }

        if slot.confirmed_pieces == slot.required_pieces {
            let closed = self.registry.close(destination)?;
            let records = self.closure_records(&closed, &[], u64::from(closed.confirmed_pieces));
            return Ok(self.finish_closure(closed, records));
        }

        tracing::info!(
            destination = destination.get(),
            confirmed = slot.confirmed_pieces,
            required = slot.required_pieces,
            "Quantity mismatch, waiting for operator review"
        );
        if slot.state == DestinationState::Assigned {
            self.registry.begin_confirm(destination)?;
        }
        if !self.pending.contains(&destination) {
            self.pending.push_back(destination);
        }
        Ok(Vec::new())
    }

    /// Accept the short count at the head of the pending queue.
    pub fn accept(&mut self) -> Result<Vec<Command>, StationError> {
        self.resolve_head(&[])
    }

    /// Complete the head of the pending queue with quantities from other
    /// lots. The total may not exceed the required quantity.
    pub fn substitute(&mut self, substitutes: &[Substitute]) -> Result<Vec<Command>, StationError> {
        self.resolve_head(substitutes)
    }

    /// Send the head of the pending queue back for further adjustment.
    pub fn reject(&mut self) -> Result<Vec<Command>, StationError> {
        let destination = self
            .pending
            .pop_front()
            .ok_or(StationError::NoPendingConfirmation)?;
        self.registry.reject(destination)?;
        tracing::info!(
            destination = destination.get(),
            confirmed = self.registry.get(destination).confirmed_pieces,
            "Confirmation rejected"
        );
        Ok(Vec::new())
    }

    /// Cancel the active session. Open destinations are extinguished and
    /// recorded as `cancelled`; their lines stay eligible for retry.
    pub fn cancel_session(&mut self) -> Result<Vec<Command>, StationError> {
        let session = self.session.take().ok_or(StationError::NoSession)?;
        self.pending.retain(|d| !session.assignments.contains_key(d));

        let commands: Vec<Command> = session
            .assignments
            .iter()
            .filter_map(|(&destination, &index)| self.cancel_destination(destination, Some(index)))
            .collect();

        self.stats.sessions_cancelled += 1;
        tracing::info!(
            sku = %session.sku,
            lot = %session.lot,
            open = commands.len(),
            "Session cancelled"
        );
        Ok(commands)
    }

    /// Blank every display. Open destinations are cancelled first.
    pub fn clear_displays(&mut self) -> Vec<Command> {
        let mut commands = self.cancel_open();
        self.registry.reset_all();
        self.pending.clear();
        commands.push(Command::ClearAll);
        commands
    }

    pub fn display_completed(&self) -> Vec<Command> {
        vec![Command::DisplayAllCompleted]
    }

    /// Commands to send before the process exits.
    pub fn shutdown(&mut self) -> Vec<Command> {
        let mut commands = self.cancel_open();
        commands.push(Command::ExtinguishAll);
        commands
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Cancel the active session and every operator assignment.
    fn cancel_open(&mut self) -> Vec<Command> {
        let mut commands = if self.session.is_some() {
            self.cancel_session().unwrap_or_default()
        } else {
            Vec::new()
        };
        let manual = std::mem::take(&mut self.manual);
        commands.extend(
            manual
                .into_iter()
                .filter_map(|(destination, index)| self.cancel_destination(destination, index)),
        );
        self.pending.clear();
        commands
    }

    /// Close one destination as `cancelled`. The manifest line stays open.
    fn cancel_destination(&mut self, destination: DestinationId, index: Option<usize>) -> Option<Command> {
        let closed = match self.registry.close(destination) {
            Ok(closed) => closed,
            Err(e) => {
                tracing::warn!(destination = destination.get(), error = %e, "Cancel skipped");
                return None;
            }
        };
        let confirmed = match self.cancel_snapshot {
            CancelSnapshot::Zero => 0,
            CancelSnapshot::Progress => closed.confirmed_pieces,
        };
        let record = self.record_for(index, &closed, None, confirmed, ReasonCode::Cancelled);
        self.write_record(&record);
        Some(Command::Extinguish { destination })
    }

    /// First open manifest line for `order` not already on a destination.
    fn open_line_for_order(&self, order: u32) -> Option<usize> {
        let manifest = self.manifest.as_ref()?;
        let taken = |i: usize| {
            self.manual.values().any(|&m| m == Some(i))
                || self
                    .session
                    .as_ref()
                    .is_some_and(|s| s.assignments.values().any(|&a| a == i))
        };
        manifest
            .lines()
            .iter()
            .enumerate()
            .find(|(i, l)| l.order == order && !l.already_fulfilled && !taken(*i))
            .map(|(i, _)| i)
    }

    fn resolve_head(&mut self, substitutes: &[Substitute]) -> Result<Vec<Command>, StationError> {
        let destination = *self
            .pending
            .front()
            .ok_or(StationError::NoPendingConfirmation)?;
        let slot = self.registry.get(destination);

        let total = substitutes
            .iter()
            .try_fold(u64::from(slot.confirmed_pieces), |acc, s| {
                acc.checked_add(u64::from(s.pieces))
            })
            .unwrap_or(u64::MAX);
        if total > u64::from(slot.required_pieces) {
            return Err(StationError::OverAllocation {
                destination: destination.get(),
                total,
                required: slot.required_pieces,
            });
        }

        self.pending.pop_front();
        let closed = self.registry.close(destination)?;
        let records = self.closure_records(&closed, substitutes, total);
        tracing::info!(
            destination = destination.get(),
            total,
            required = closed.required_pieces,
            substitutes = substitutes.len(),
            "Confirmation accepted"
        );
        Ok(self.finish_closure(closed, records))
    }

    /// Records for an accepted closure, one per lot used. `total` is the
    /// accepted quantity, already checked against the required one.
    fn closure_records(
        &self,
        closed: &ClosedDestination,
        substitutes: &[Substitute],
        total: u64,
    ) -> Vec<BackorderRecord> {
        let index = self.line_index(closed.destination);
        let same_lot_reason = if total == u64::from(closed.required_pieces) {
            ReasonCode::Ok
        } else {
            ReasonCode::Short
        };

        let used: Vec<&Substitute> = substitutes.iter().filter(|s| s.pieces > 0).collect();
        let mut records = Vec::with_capacity(used.len() + 1);

        if closed.confirmed_pieces > 0 || used.is_empty() {
            records.push(self.record_for(index, closed, None, closed.confirmed_pieces, same_lot_reason));
        }
        for sub in used {
            let reason = match index.and_then(|i| self.line_lot(i)) {
                Some(lot) if lot == sub.lot => same_lot_reason,
                _ => ReasonCode::Substituted,
            };
            records.push(self.record_for(index, closed, Some(sub.lot.as_str()), sub.pieces, reason));
        }
        records
    }

    /// One record for `closed`. Without a manifest line the sku and
    /// required lot are empty.
    fn record_for(
        &self,
        index: Option<usize>,
        closed: &ClosedDestination,
        lot_confirmed: Option<&str>,
        confirmed_pieces: u32,
        reason: ReasonCode,
    ) -> BackorderRecord {
        let line = index.and_then(|i| self.manifest.as_ref()?.line(i));
        let (sku, lot) = line.map_or(("", ""), |l| (l.sku.as_str(), l.lot.as_str()));
        BackorderRecord {
            sku: sku.to_string(),
            lot_required: lot.to_string(),
            lot_confirmed: lot_confirmed.unwrap_or(lot).to_string(),
            order: closed.order,
            destination: closed.destination.get(),
            required_pieces: closed.required_pieces,
            confirmed_pieces,
            reason,
        }
    }

    fn line_index(&self, destination: DestinationId) -> Option<usize> {
        self.session
            .as_ref()
            .and_then(|s| s.assignments.get(&destination).copied())
            .or_else(|| self.manual.get(&destination).copied().flatten())
    }

    fn line_lot(&self, index: usize) -> Option<&str> {
        self.manifest
            .as_ref()?
            .line(index)
            .map(|l| l.lot.as_str())
    }

    /// Write records, mark the line fulfilled and end the session once its
    /// last destination has closed.
    fn finish_closure(
        &mut self,
        closed: ClosedDestination,
        records: Vec<BackorderRecord>,
    ) -> Vec<Command> {
        let destination = closed.destination;
        self.pending.retain(|&d| d != destination);
        for record in &records {
            self.write_record(record);
        }
        self.stats.destinations_closed += 1;

        let mut commands = vec![Command::Extinguish { destination }];

        let index = self
            .session
            .as_mut()
            .and_then(|s| s.assignments.remove(&destination))
            .or_else(|| self.manual.remove(&destination).flatten());
        if let (Some(index), Some(manifest)) = (index, self.manifest.as_mut()) {
            manifest.mark_fulfilled(index);
        }
        tracing::info!(
            destination = destination.get(),
            order = closed.order,
            records = records.len(),
            "Destination closed"
        );

        let finished = self
            .session
            .as_ref()
            .is_some_and(|s| s.assignments.is_empty());
        if finished {
            if let Some(session) = self.session.take() {
                self.stats.sessions_completed += 1;
                tracing::info!(sku = %session.sku, lot = %session.lot, "Session complete");
            }
            if self.announce_completion {
                commands.push(Command::DisplayAllCompleted);
            }
        }
        commands
    }

    fn write_record(&mut self, record: &BackorderRecord) {
        match self.sink.append(record) {
            Ok(()) => self.stats.records_written += 1,
            Err(e) => {
                self.stats.sink_failures += 1;
                tracing::error!(
                    sink = %self.sink.describe(),
                    order = record.order,
                    error = %e,
                    "Failed to write backorder record"
                );
            }
        }
    }
}

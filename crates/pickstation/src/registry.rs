// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Destination registry.
//!
//! One slot per physical destination (LED, display and button), indexed by a
//! validated [`DestinationId`]. Ids coming from the device or the operator
//! are checked once when the id is built; every registry call after that
//! indexes the table directly.
//!
//! ```text
//!            assign            confirm (match)
//!   Idle ------------> Assigned ---------------> Closed -> Idle
//!                        |  ^
//!      confirm (mismatch)|  | reject
//!                        v  |
//!                     Confirming ---- accept --> Closed -> Idle
//! ```

use crate::error::StationError;
use crate::protocol::Delta;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 1-based destination number, known to be within the station's range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DestinationId(u16);

impl DestinationId {
    /// Validate `raw` against a station with `count` destinations.
    pub fn new(raw: i64, count: u16) -> Result<Self, StationError> {
        if raw >= 1 && raw <= i64::from(count) {
            Ok(Self(raw as u16))
        } else {
            Err(StationError::InvalidDestination { id: raw, count })
        }
    }

    pub fn get(self) -> u16 {
        self.0
    }

    fn index(self) -> usize {
        usize::from(self.0 - 1)
    }
}

impl fmt::Display for DestinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How `+`/`-` behave at the bounds of `[0, required]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdjustPolicy {
    /// `required + 1` becomes 0, `0 - 1` becomes `required`.
    #[default]
    Wrap,
    /// Stop at 0 and at `required`.
    Clamp,
}

impl AdjustPolicy {
    /// Apply one step to `confirmed` within `[0, required]`.
    pub fn apply(self, confirmed: u32, required: u32, delta: Delta) -> u32 {
        match (self, delta) {
            (AdjustPolicy::Wrap, Delta::Increment) if confirmed >= required => 0,
            (AdjustPolicy::Wrap, Delta::Increment) => confirmed + 1,
            (AdjustPolicy::Wrap, Delta::Decrement) if confirmed == 0 => required,
            (AdjustPolicy::Wrap, Delta::Decrement) => (confirmed - 1).min(required),
            (AdjustPolicy::Clamp, Delta::Increment) => (confirmed + 1).min(required),
            (AdjustPolicy::Clamp, Delta::Decrement) => confirmed.saturating_sub(1),
        }
    }
}

/// Lifecycle state of a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationState {
    Idle,
    Assigned,
    Confirming,
    /// Transient: only observable between `close` taking its snapshot and
    /// the reset to `Idle`.
    Closed,
}

impl DestinationState {
    pub fn is_active(self) -> bool {
        matches!(self, DestinationState::Assigned | DestinationState::Confirming)
    }
}

impl fmt::Display for DestinationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DestinationState::Idle => "idle",
            DestinationState::Assigned => "assigned",
            DestinationState::Confirming => "confirming",
            DestinationState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// One physical slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Destination {
    pub id: u16,
    pub assigned_order: Option<u32>,
    pub required_pieces: u32,
    pub confirmed_pieces: u32,
    pub state: DestinationState,
}

impl Destination {
    fn idle(id: u16) -> Self {
        Self {
            id,
            assigned_order: None,
            required_pieces: 0,
            confirmed_pieces: 0,
            state: DestinationState::Idle,
        }
    }

    fn reset(&mut self) {
        *self = Self::idle(self.id);
    }
}

/// Values captured when a destination closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosedDestination {
    pub destination: DestinationId,
    pub order: u32,
    pub required_pieces: u32,
    pub confirmed_pieces: u32,
}

/// In-memory destination table.
#[derive(Debug, Clone)]
pub struct Registry {
    slots: Vec<Destination>,
    policy: AdjustPolicy,
}

impl Registry {
    pub fn new(count: u16, policy: AdjustPolicy) -> Self {
        Self {
            slots: (1..=count).map(Destination::idle).collect(),
            policy,
        }
    }

    /// Number of destinations.
    pub fn count(&self) -> u16 {
        self.slots.len() as u16
    }

    pub fn policy(&self) -> AdjustPolicy {
        self.policy
    }

    /// Validate a raw destination number against this registry.
    pub fn id(&self, raw: i64) -> Result<DestinationId, StationError> {
        DestinationId::new(raw, self.count())
    }

    pub fn get(&self, id: DestinationId) -> &Destination {
        &self.slots[id.index()]
    }

    pub fn is_idle(&self, id: DestinationId) -> bool {
        self.get(id).state == DestinationState::Idle
    }

    /// Lowest-numbered idle destination.
    pub fn first_idle(&self) -> Option<DestinationId> {
        self.slots
            .iter()
            .find(|d| d.state == DestinationState::Idle)
            .map(|d| DestinationId(d.id))
    }

    /// Destinations currently holding an assignment, in id order.
    pub fn active(&self) -> Vec<DestinationId> {
        self.slots
            .iter()
            .filter(|d| d.state.is_active())
            .map(|d| DestinationId(d.id))
            .collect()
    }

    /// Bind `order` to an idle destination. `required_pieces` must be
    /// positive.
    pub fn assign(
        &mut self,
        id: DestinationId,
        order: u32,
        required_pieces: u32,
    ) -> Result<(), StationError> {
        let slot = &mut self.slots[id.index()];
        if slot.state != DestinationState::Idle {
            return Err(StationError::DestinationBusy(id.get()));
        }
        if required_pieces == 0 {
            return Err(StationError::ZeroPieces(id.get()));
        }
        slot.assigned_order = Some(order);
        slot.required_pieces = required_pieces;
        slot.confirmed_pieces = 0;
        slot.state = DestinationState::Assigned;
        tracing::debug!(destination = id.get(), order, required_pieces, "Destination assigned");
        Ok(())
    }

    /// Step the confirmed count. Returns the new count, or `None` (logged)
    /// when the destination holds no assignment.
    pub fn adjust(&mut self, id: DestinationId, delta: Delta) -> Option<u32> {
        let policy = self.policy;
        let slot = &mut self.slots[id.index()];
        if !slot.state.is_active() {
            tracing::debug!(
                destination = id.get(),
                delta = %delta.symbol(),
                "Adjustment on unassigned destination ignored"
            );
            return None;
        }
        slot.confirmed_pieces = policy.apply(slot.confirmed_pieces, slot.required_pieces, delta);
        Some(slot.confirmed_pieces)
    }

    /// Move an assigned destination to `Confirming`.
    pub fn begin_confirm(&mut self, id: DestinationId) -> Result<(), StationError> {
        let slot = &mut self.slots[id.index()];
        if !slot.state.is_active() {
            return Err(StationError::NotAssigned(id.get()));
        }
        slot.state = DestinationState::Confirming;
        Ok(())
    }

    /// Return a `Confirming` destination to `Assigned`, keeping its count.
    pub fn reject(&mut self, id: DestinationId) -> Result<(), StationError> {
        let slot = &mut self.slots[id.index()];
        if !slot.state.is_active() {
            return Err(StationError::NotAssigned(id.get()));
        }
        slot.state = DestinationState::Assigned;
        Ok(())
    }

    /// Close a destination and reset it to `Idle`.
    pub fn close(&mut self, id: DestinationId) -> Result<ClosedDestination, StationError> {
        let slot = &mut self.slots[id.index()];
        let order = match (slot.state.is_active(), slot.assigned_order) {
            (true, Some(order)) => order,
            _ => return Err(StationError::NotAssigned(id.get())),
        };

        slot.state = DestinationState::Closed;
        let closed = ClosedDestination {
            destination: id,
            order,
            required_pieces: slot.required_pieces,
            confirmed_pieces: slot.confirmed_pieces,
        };
        slot.reset();
        Ok(closed)
    }

    /// Reset every destination to `Idle`.
    pub fn reset_all(&mut self) {
        for slot in &mut self.slots {
            slot.reset();
        }
    }

    /// Copy of the whole table for status reporting.
    pub fn snapshot(&self) -> Vec<Destination> {
        self.slots.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(count: u16) -> Registry {
        Registry::new(count, AdjustPolicy::Wrap)
    }

    #[test]
    fn test_destination_id_bounds() {
        assert!(DestinationId::new(1, 4).is_ok());
        assert!(DestinationId::new(4, 4).is_ok());
        assert!(matches!(
            DestinationId::new(0, 4),
            Err(StationError::InvalidDestination { id: 0, count: 4 })
        ));
        assert!(DestinationId::new(5, 4).is_err());
        assert!(DestinationId::new(-1, 4).is_err());
    }

    #[test]
    fn test_assign_and_busy() {
        let mut reg = registry(4);
        let d = reg.id(2).expect("valid id");
        reg.assign(d, 10, 3).expect("assign idle");
        assert_eq!(reg.get(d).state, DestinationState::Assigned);
        assert_eq!(reg.get(d).assigned_order, Some(10));
        assert!(matches!(
            reg.assign(d, 11, 1),
            Err(StationError::DestinationBusy(2))
        ));
        assert_eq!(reg.first_idle().map(DestinationId::get), Some(1));
        assert_eq!(reg.active(), vec![d]);
    }

    #[test]
    fn test_assign_zero_pieces_rejected() {
        let mut reg = registry(4);
        let d = reg.id(3).expect("valid id");
        assert!(matches!(
            reg.assign(d, 10, 0),
            Err(StationError::ZeroPieces(3))
        ));
        assert!(reg.is_idle(d));
    }

    #[test]
    fn test_wrap_boundaries() {
        let mut reg = registry(1);
        let d = reg.id(1).expect("valid id");
        reg.assign(d, 1, 2).expect("assign");
        assert_eq!(reg.adjust(d, Delta::Decrement), Some(2));
        assert_eq!(reg.adjust(d, Delta::Increment), Some(0));
        assert_eq!(reg.adjust(d, Delta::Increment), Some(1));
        assert_eq!(reg.adjust(d, Delta::Increment), Some(2));
        assert_eq!(reg.adjust(d, Delta::Increment), Some(0));
    }

    #[test]
    fn test_clamp_boundaries() {
        let mut reg = Registry::new(1, AdjustPolicy::Clamp);
        let d = reg.id(1).expect("valid id");
        reg.assign(d, 1, 2).expect("assign");
        assert_eq!(reg.adjust(d, Delta::Decrement), Some(0));
        assert_eq!(reg.adjust(d, Delta::Increment), Some(1));
        assert_eq!(reg.adjust(d, Delta::Increment), Some(2));
        assert_eq!(reg.adjust(d, Delta::Increment), Some(2));
    }

    #[test]
    fn test_random_adjustments_stay_in_range() {
        let mut rng = fastrand::Rng::with_seed(42);
        for policy in [AdjustPolicy::Wrap, AdjustPolicy::Clamp] {
            for _ in 0..50 {
                let required = rng.u32(0..12);
                let mut reg = Registry::new(1, policy);
                let d = reg.id(1).expect("valid id");
                reg.assign(d, 7, required).expect("assign");
                let mut model = 0u32;
                for _ in 0..200 {
                    let delta = if rng.bool() {
                        Delta::Increment
                    } else {
                        Delta::Decrement
                    };
                    let got = reg.adjust(d, delta).expect("assigned");
                    assert!(got <= required);
                    model = match (policy, delta) {
                        (AdjustPolicy::Wrap, Delta::Increment) => {
                            if model == required {
                                0
                            } else {
                                model + 1
                            }
                        }
                        (AdjustPolicy::Wrap, Delta::Decrement) => {
                            if model == 0 {
                                required
                            } else {
                                model - 1
                            }
                        }
                        (AdjustPolicy::Clamp, Delta::Increment) => (model + 1).min(required),
                        (AdjustPolicy::Clamp, Delta::Decrement) => model.saturating_sub(1),
                    };
                    assert_eq!(got, model);
                }
            }
        }
    }

    #[test]
    fn test_adjust_idle_is_noop() {
        let mut reg = registry(2);
        let d = reg.id(1).expect("valid id");
        assert_eq!(reg.adjust(d, Delta::Increment), None);
        assert_eq!(reg.get(d).confirmed_pieces, 0);
    }

    #[test]
    fn test_close_resets_slot() {
        let mut reg = registry(2);
        let d = reg.id(1).expect("valid id");
        assert!(matches!(reg.close(d), Err(StationError::NotAssigned(1))));

        reg.assign(d, 10, 3).expect("assign");
        reg.adjust(d, Delta::Increment);
        let closed = reg.close(d).expect("close");
        assert_eq!(closed.order, 10);
        assert_eq!(closed.required_pieces, 3);
        assert_eq!(closed.confirmed_pieces, 1);
        assert_eq!(reg.get(d), &Destination::idle(1));
    }

    #[test]
    fn test_confirm_and_reject() {
        let mut reg = registry(2);
        let d = reg.id(2).expect("valid id");
        assert!(reg.begin_confirm(d).is_err());
        reg.assign(d, 5, 4).expect("assign");
        reg.adjust(d, Delta::Increment);
        reg.begin_confirm(d).expect("confirm");
        assert_eq!(reg.get(d).state, DestinationState::Confirming);
        reg.reject(d).expect("reject");
        assert_eq!(reg.get(d).state, DestinationState::Assigned);
        assert_eq!(reg.get(d).confirmed_pieces, 1);
    }

    #[test]
    fn test_reset_all() {
        let mut reg = registry(3);
        for raw in 1..=3 {
            let d = reg.id(raw).expect("valid id");
            reg.assign(d, raw as u32, 2).expect("assign");
        }
        reg.reset_all();
        assert!(reg.active().is_empty());
        assert!(reg.snapshot().iter().all(|d| d.state == DestinationState::Idle));
    }
}

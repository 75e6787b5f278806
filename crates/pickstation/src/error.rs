// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Station error taxonomy.
//!
//! Every variant except [`StationError::Manifest`] and [`StationError::Config`]
//! is recoverable inside the reconciliation loop: the offending message or
//! command is logged and discarded, and processing continues with the next one.

use crate::config::ConfigError;
use crate::manifest::ManifestError;
use thiserror::Error;

/// Errors produced by the station host.
#[derive(Debug, Error)]
pub enum StationError {
    /// The device sent more than `limit` bytes without a line delimiter.
    #[error("framing error: {len} bytes buffered without delimiter (limit {limit})")]
    Framing { len: usize, limit: usize },

    /// A recognized message prefix carried a payload that is not a valid number.
    #[error("parse error in {message:?}: {reason}")]
    Parse { message: String, reason: String },

    /// Destination id outside the configured range `1..=count`.
    #[error("invalid destination {id} (station has {count})")]
    InvalidDestination { id: i64, count: u16 },

    /// Confirm/adjust/close on a destination that holds no assignment.
    #[error("destination {0} is not assigned")]
    NotAssigned(u16),

    /// Assign on a destination that already holds an order.
    #[error("destination {0} already holds an order")]
    DestinationBusy(u16),

    /// Assign with a required quantity of zero.
    #[error("destination {0}: an order needs at least one piece")]
    ZeroPieces(u16),

    /// Read or write failure on the device link.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An operation that needs an active session was issued without one.
    #[error("no fulfillment session is active")]
    NoSession,

    /// A session was started while another one is still open.
    #[error("a fulfillment session is already active ({sku} / {lot})")]
    SessionActive { sku: String, lot: String },

    /// No open order line matched the scanned sku and lot.
    #[error("no open order lines for sku {sku:?} lot {lot:?}")]
    NothingToAssign { sku: String, lot: String },

    /// A disambiguation was issued with an empty pending queue.
    #[error("no confirmation is waiting for operator review")]
    NoPendingConfirmation,

    /// A substitution would exceed the required quantity.
    #[error("destination {destination}: {total} pieces exceeds the required {required}")]
    OverAllocation {
        destination: u16,
        total: u64,
        required: u32,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StationError {
    /// Build a parse error for `message`.
    pub fn parse(message: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
            reason: reason.into(),
        }
    }

    /// True for errors that abort the operation that raised them but leave
    /// the station running.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Manifest(_) | Self::Config(_))
    }
}

impl From<serialport::Error> for StationError {
    fn from(e: serialport::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StationError>;

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Device line protocol.
//!
//! Text, one message per `\n`-terminated line.
//!
//! ```text
//! device -> host   boton_<N>              confirmation button on destination N
//!                  +<N> / -<N>            increment / decrement request
//!                  anything else          informational
//!
//! host -> device   ENCENDER_<N>_<p>       illuminate N, show required pieces
//!                  ACTUALIZAR_<N>_<v>     set display N      (legacy: AJUSTAR_<N>_VALOR_<v>)
//!                  APAGAR_DESTINO_<N>     extinguish N       (legacy: APAGAR_<N>)
//!                  APAGAR_TODO            extinguish all
//!                  CLEAR_ALL_DISPLAYS     blank every display
//!                  DISPLAY_ALL_COMPLETED  completion banner
//!                  ASIGNAR_DESTINO_<N>_OV_<o>_PIEZAS_<p>
//! ```

use crate::error::StationError;
use crate::registry::DestinationId;
use serde::{Deserialize, Serialize};
use std::fmt;

const CONFIRM_PREFIX: &str = "boton_";

/// Adjustment direction carried by `+N` / `-N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delta {
    Increment,
    Decrement,
}

impl Delta {
    pub fn symbol(self) -> char {
        match self {
            Delta::Increment => '+',
            Delta::Decrement => '-',
        }
    }
}

/// A parsed device message. Destination numbers are raw; range checks
/// happen when they are turned into a [`DestinationId`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Confirm(u16),
    Adjust(u16, Delta),
    Info(String),
}

impl DeviceEvent {
    /// Parse one framed line.
    pub fn parse(line: &str) -> Result<Self, StationError> {
        if let Some(rest) = line.strip_prefix(CONFIRM_PREFIX) {
            return parse_number(line, rest).map(DeviceEvent::Confirm);
        }

        let delta = match line.as_bytes().first() {
            Some(b'+') => Delta::Increment,
            Some(b'-') => Delta::Decrement,
            _ => return Ok(DeviceEvent::Info(line.to_string())),
        };

        let rest = &line[1..];
        if rest.is_empty() {
            return Ok(DeviceEvent::Info(line.to_string()));
        }
        parse_number(line, rest).map(|n| DeviceEvent::Adjust(n, delta))
    }
}

fn parse_number(line: &str, digits: &str) -> Result<u16, StationError> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(StationError::parse(line, "destination is not a number"));
    }
    digits
        .parse::<u16>()
        .map_err(|e| StationError::parse(line, e.to_string()))
}

/// Command vocabulary variant spoken by the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dialect {
    /// `ACTUALIZAR_N_V`, `APAGAR_DESTINO_N`
    #[default]
    Standard,
    /// `AJUSTAR_N_VALOR_V`, `APAGAR_N`
    Legacy,
}

/// Host-to-device command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Illuminate {
        destination: DestinationId,
        pieces: u32,
    },
    UpdateDisplay {
        destination: DestinationId,
        value: u32,
    },
    Extinguish {
        destination: DestinationId,
    },
    ExtinguishAll,
    ClearAll,
    DisplayAllCompleted,
    AssignOrder {
        destination: DestinationId,
        order: u32,
        pieces: u32,
    },
}

impl Command {
    /// Wire text for this command, without the delimiter.
    pub fn encode(&self, dialect: Dialect) -> String {
        match (self, dialect) {
            (Command::Illuminate { destination, pieces }, _) => {
                format!("ENCENDER_{destination}_{pieces}")
            }
            (Command::UpdateDisplay { destination, value }, Dialect::Standard) => {
                format!("ACTUALIZAR_{destination}_{value}")
            }
            (Command::UpdateDisplay { destination, value }, Dialect::Legacy) => {
                format!("AJUSTAR_{destination}_VALOR_{value}")
            }
            (Command::Extinguish { destination }, Dialect::Standard) => {
                format!("APAGAR_DESTINO_{destination}")
            }
            (Command::Extinguish { destination }, Dialect::Legacy) => {
                format!("APAGAR_{destination}")
            }
            (Command::ExtinguishAll, _) => "APAGAR_TODO".to_string(),
            (Command::ClearAll, _) => "CLEAR_ALL_DISPLAYS".to_string(),
            (Command::DisplayAllCompleted, _) => "DISPLAY_ALL_COMPLETED".to_string(),
            (
                Command::AssignOrder {
                    destination,
                    order,
                    pieces,
                },
                _,
            ) => format!("ASIGNAR_DESTINO_{destination}_OV_{order}_PIEZAS_{pieces}"),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode(Dialect::Standard))
    }
}

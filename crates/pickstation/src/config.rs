// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Station configuration.
//!
//! Loaded from TOML; every field has a default so an empty file is valid.
//!
//! ```toml
//! [serial]
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//!
//! [station]
//! destinations = 4
//! adjust_policy = "wrap"
//! allocation = "first-available"
//!
//! [backorder]
//! directory = "backorders"
//! format = "csv"
//! ```

use crate::backorder::BackorderFormat;
use crate::engine::{AllocationStrategy, CancelSnapshot, RetryPolicy};
use crate::protocol::Dialect;
use crate::registry::AdjustPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Largest destination count a station can be configured with.
pub const MAX_DESTINATIONS: u16 = 99;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Full station configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StationConfig {
    #[serde(default)]
    pub serial: SerialConfig,

    #[serde(default)]
    pub station: StationSettings,

    #[serde(default)]
    pub backorder: BackorderConfig,
}

/// Serial link settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Device path (`/dev/ttyUSB0`, `COM8`).
    #[serde(default = "default_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Read timeout; bounds how long the reading loop takes to notice a stop.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Pause after opening the port while the microcontroller resets.
    #[serde(default = "default_settle_ms")]
    pub startup_settle_ms: u64,
}

fn default_port() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_timeout_ms() -> u64 {
    50
}

fn default_settle_ms() -> u64 {
    2000
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms(),
            startup_settle_ms: default_settle_ms(),
        }
    }
}

impl SerialConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn startup_settle(&self) -> Duration {
        Duration::from_millis(self.startup_settle_ms)
    }
}

/// Reconciliation behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationSettings {
    /// Number of physical destinations.
    #[serde(default = "default_destinations")]
    pub destinations: u16,

    #[serde(default)]
    pub adjust_policy: AdjustPolicy,

    #[serde(default)]
    pub allocation: AllocationStrategy,

    #[serde(default)]
    pub retry_policy: RetryPolicy,

    #[serde(default)]
    pub cancel_snapshot: CancelSnapshot,

    #[serde(default)]
    pub dialect: Dialect,

    /// Send `DISPLAY_ALL_COMPLETED` when a session finishes.
    #[serde(default)]
    pub announce_completion: bool,

    /// Send `ASIGNAR_DESTINO_*` before lighting each destination.
    #[serde(default)]
    pub announce_orders: bool,

    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,

    /// Main loop wait for operator input.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_destinations() -> u16 {
    4
}

fn default_max_line_bytes() -> usize {
    crate::framer::DEFAULT_MAX_LINE
}

fn default_poll_interval_ms() -> u64 {
    20
}

impl Default for StationSettings {
    fn default() -> Self {
        Self {
            destinations: default_destinations(),
            adjust_policy: AdjustPolicy::default(),
            allocation: AllocationStrategy::default(),
            retry_policy: RetryPolicy::default(),
            cancel_snapshot: CancelSnapshot::default(),
            dialect: Dialect::default(),
            announce_completion: false,
            announce_orders: false,
            max_line_bytes: default_max_line_bytes(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl StationSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Backorder output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackorderConfig {
    #[serde(default = "default_directory")]
    pub directory: PathBuf,

    #[serde(default)]
    pub format: BackorderFormat,
}

fn default_directory() -> PathBuf {
    PathBuf::from(".")
}

impl Default for BackorderConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            format: BackorderFormat::default(),
        }
    }
}

impl StationConfig {
    /// Load and validate a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let station = &self.station;
        if station.destinations == 0 || station.destinations > MAX_DESTINATIONS {
            return Err(ConfigError::Invalid(format!(
                "destinations must be between 1 and {} (got {})",
                MAX_DESTINATIONS, station.destinations
            )));
        }
        if station.max_line_bytes < 8 {
            return Err(ConfigError::Invalid(format!(
                "max_line_bytes must be at least 8 (got {})",
                station.max_line_bytes
            )));
        }
        if station.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_ms must be positive".into(),
            ));
        }
        if self.serial.baud_rate == 0 {
            return Err(ConfigError::Invalid("baud_rate must be positive".into()));
        }
        if self.serial.timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeout_ms must be positive".into()));
        }
        if self.serial.port.trim().is_empty() {
            return Err(ConfigError::Invalid("serial port is empty".into()));
        }
        Ok(())
    }
}

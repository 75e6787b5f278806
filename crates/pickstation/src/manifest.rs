// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Order manifest loading.
//!
//! The manifest is a CSV export with a header row followed by
//! `sku,lot,order,pieces` rows:
//!
//! ```text
//! sku,lote,orden,piezas
//! A1,L1,10,3
//! A1,L1,11,5
//! B7,L4,12,1
//! ```
//!
//! Fields are trimmed. Rows with an empty field are skipped silently, rows
//! whose numbers do not parse are reported through [`Manifest::rejected`]
//! and skipped.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Manifest errors.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("manifest has no header row")]
    MissingHeader,

    #[error("line {line}: {reason}")]
    Row { line: usize, reason: String },

    #[error("manifest contains no usable order lines")]
    Empty,
}

/// One manifest row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderLine {
    pub sku: String,
    pub lot: String,
    pub order: u32,
    pub pieces: u32,
    /// Set by the engine once the line closed through a confirmation.
    pub already_fulfilled: bool,
}

impl OrderLine {
    pub fn new(sku: impl Into<String>, lot: impl Into<String>, order: u32, pieces: u32) -> Self {
        Self {
            sku: sku.into(),
            lot: lot.into(),
            order,
            pieces,
            already_fulfilled: false,
        }
    }

    pub fn matches(&self, sku: &str, lot: &str) -> bool {
        self.sku == sku && self.lot == lot
    }
}

/// Per sku/lot aggregate used by `check-manifest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LotTotal {
    pub sku: String,
    pub lot: String,
    pub orders: usize,
    pub pieces: u64,
}

/// Loaded manifest.
#[derive(Debug, Default)]
pub struct Manifest {
    lines: Vec<OrderLine>,
    rejected: Vec<ManifestError>,
}

impl Manifest {
    /// Build from already parsed lines.
    pub fn from_lines(lines: Vec<OrderLine>) -> Result<Self, ManifestError> {
        if lines.is_empty() {
            return Err(ManifestError::Empty);
        }
        Ok(Self {
            lines,
            rejected: Vec::new(),
        })
    }

    /// Load a manifest file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let manifest = Self::parse(&content)?;
        tracing::info!(
            path = %path.display(),
            lines = manifest.lines.len(),
            rejected = manifest.rejected.len(),
            "Manifest loaded"
        );
        Ok(manifest)
    }

    /// Parse manifest text.
    pub fn parse(content: &str) -> Result<Self, ManifestError> {
        let mut rows = content
            .lines()
            .enumerate()
            .map(|(i, l)| (i + 1, l))
            .filter(|(_, l)| !l.trim().is_empty());

        if rows.next().is_none() {
            return Err(ManifestError::MissingHeader);
        }

        let mut lines = Vec::new();
        let mut rejected = Vec::new();

        for (line_no, row) in rows {
            match parse_row(row) {
                Ok(Some(line)) => lines.push(line),
                Ok(None) => {
                    tracing::debug!(line = line_no, "Skipping manifest row with empty field");
                }
                Err(reason) => {
                    tracing::warn!(line = line_no, %reason, "Rejected manifest row");
                    rejected.push(ManifestError::Row {
                        line: line_no,
                        reason,
                    });
                }
            }
        }

        if lines.is_empty() {
            return Err(ManifestError::Empty);
        }
        Ok(Self { lines, rejected })
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn line(&self, index: usize) -> Option<&OrderLine> {
        self.lines.get(index)
    }

    /// Rows reported and skipped while parsing.
    pub fn rejected(&self) -> &[ManifestError] {
        &self.rejected
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Indices of lines for `sku`/`lot`, in manifest order.
    pub fn matching(&self, sku: &str, lot: &str) -> Vec<usize> {
        self.lines
            .iter()
            .enumerate()
            .filter(|(_, l)| l.matches(sku, lot))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn mark_fulfilled(&mut self, index: usize) {
        if let Some(line) = self.lines.get_mut(index) {
            line.already_fulfilled = true;
        }
    }

    /// Totals grouped by sku and lot, sorted.
    pub fn totals(&self) -> Vec<LotTotal> {
        let mut map: BTreeMap<(&str, &str), (usize, u64)> = BTreeMap::new();
        for line in &self.lines {
            let entry = map.entry((line.sku.as_str(), line.lot.as_str())).or_default();
            entry.0 += 1;
            entry.1 += u64::from(line.pieces);
        }
        map.into_iter()
            .map(|((sku, lot), (orders, pieces))| LotTotal {
                sku: sku.to_string(),
                lot: lot.to_string(),
                orders,
                pieces,
            })
            .collect()
    }
}

fn parse_row(row: &str) -> Result<Option<OrderLine>, String> {
    let mut fields = row.split(',').map(str::trim);
    let (sku, lot, order, pieces) = match (fields.next(), fields.next(), fields.next(), fields.next())
    {
        (Some(s), Some(l), Some(o), Some(p)) => (s, l, o, p),
        _ => return Ok(None),
    };
    if sku.is_empty() || lot.is_empty() || order.is_empty() || pieces.is_empty() {
        return Ok(None);
    }

    let order: u32 = order
        .parse()
        .map_err(|_| format!("order {order:?} is not a number"))?;
    if order == 0 {
        return Err("order id must be positive".to_string());
    }
    let pieces: u32 = pieces
        .parse()
        .map_err(|_| format!("pieces {pieces:?} is not a number"))?;
    if pieces == 0 {
        return Err("pieces must be positive".to_string());
    }

    Ok(Some(OrderLine::new(sku, lot, order, pieces)))
}

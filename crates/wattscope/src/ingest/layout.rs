// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Column layout of a CSV trace.

use crate::sample::Sample;
use crate::sensors::Unit;
use csv::StringRecord;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Process-wide allocator for series ids.
///
/// Clones share the counter, so ids stay unique across every reader that
/// was handed the same allocator.
#[derive(Debug, Clone, Default)]
pub struct SeriesIds(Arc<AtomicU32>);

impl SeriesIds {
    /// Create a fresh allocator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id (ids start at 1).
    pub fn next_id(&self) -> u32 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[derive(Debug, Clone)]
struct Column {
    index: usize,
    id: u32,
    unit: Unit,
    heading: String,
}

/// Energy columns selected from a trace header.
#[derive(Debug, Clone)]
pub struct TraceLayout {
    columns: Vec<Column>,
}

/// Outcome of parsing one data row.
#[derive(Debug, Default)]
pub struct ParsedRow {
    /// Samples extracted from the row.
    pub samples: Vec<Sample>,

    /// Cells that held a value but did not parse.
    pub malformed: usize,
}

impl TraceLayout {
    /// Classify header columns.
    ///
    /// Column 0 holds start timestamps and is never a series. Any other
    /// column whose label contains `(J)` or `(W)` becomes a series with a
    /// freshly allocated id; everything else is ignored.
    pub fn from_header(header: &StringRecord, ids: &SeriesIds) -> Self {
        let columns = header
            .iter()
            .enumerate()
            .skip(1)
            .filter_map(|(index, label)| {
                let unit = classify(label)?;
                Some(Column {
                    index,
                    id: ids.next_id(),
                    unit,
                    heading: label.trim().to_string(),
                })
            })
            .collect();

        Self { columns }
    }

    /// Series headings in column order.
    pub fn headings(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.heading.clone()).collect()
    }

    /// Series ids in column order.
    pub fn ids(&self) -> Vec<u32> {
        self.columns.iter().map(|c| c.id).collect()
    }

    /// Number of series columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// True if the header named no energy column.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Parse one data row.
    ///
    /// A row whose timestamps do not parse yields nothing. Empty cells are
    /// skipped silently; malformed cells are logged and counted.
    pub fn parse_row(&self, record: &StringRecord) -> ParsedRow {
        let mut row = ParsedRow::default();

        let (Some(start_ns), Some(end_ns)) = (timestamp(record, 0), timestamp(record, 1)) else {
            tracing::warn!("Skipping row with invalid timestamps: {:?}", record);
            row.malformed += 1;
            return row;
        };

        for column in &self.columns {
            let cell = record.get(column.index).unwrap_or("").trim();
            if cell.is_empty() {
                continue;
            }
            match cell.parse::<f64>() {
                Ok(value) => row.samples.push(Sample {
                    start_ns,
                    end_ns,
                    series: column.id,
                    value,
                    unit: column.unit,
                }),
                Err(e) => {
                    tracing::warn!(
                        "Invalid value {:?} for {} at {}: {}",
                        cell,
                        column.heading,
                        start_ns,
                        e
                    );
                    row.malformed += 1;
                }
            }
        }

        row
    }
}

/// Split one CSV line into fields.
pub fn parse_line(line: &str) -> Result<Option<StringRecord>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(line.as_bytes());
    reader.records().next().transpose()
}

fn classify(label: &str) -> Option<Unit> {
    if label.contains("(J)") {
        Some(Unit::Joules)
    } else if label.contains("(W)") {
        Some(Unit::Watts)
    } else {
        None
    }
}

fn timestamp(record: &StringRecord, index: usize) -> Option<i64> {
    let cell = record.get(index)?.trim();
    cell.parse::<i64>()
        .ok()
        .or_else(|| cell.parse::<f64>().ok().map(|v| v as i64))
}

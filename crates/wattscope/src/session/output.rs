// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CSV trace written for sensing sessions.
//!
//! Every sample becomes one row carrying its timestamps and a value in its
//! own column. When new series show up after the header has been written,
//! the current file is closed and writing continues in `<stem>_0001.csv`,
//! `<stem>_0002.csv`, ... with the extended header, so every file stays a
//! well-formed trace on its own.
//!
//! A [`TraceReader`](crate::ingest::TraceReader) announces its columns once,
//! so a session fed by a single reader never rotates; rotation covers
//! writers fed headings from more than one announcement.

use super::SessionError;
use crate::sample::Sample;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

const TIMESTAMP_HEADINGS: [&str; 2] = ["start (ns)", "end (ns)"];

/// Session trace writer.
pub struct TraceOutput {
    base: PathBuf,
    path: PathBuf,
    writer: Option<csv::Writer<BufWriter<File>>>,
    headings: Vec<String>,
    /// Series id -> column.
    columns: HashMap<u32, usize>,
    rotation: u32,
    rows: u64,
}

impl TraceOutput {
    /// Prepare a trace at `path`; nothing is created until headings arrive.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let base = path.into();
        Self {
            path: base.clone(),
            base,
            writer: None,
            headings: TIMESTAMP_HEADINGS.iter().map(|h| h.to_string()).collect(),
            columns: HashMap::new(),
            rotation: 0,
            rows: 0,
        }
    }

    /// File currently being written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows written across all files.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Register series columns and (re)write the header.
    pub fn add_headings(&mut self, headings: &[String], ids: &[u32]) -> Result<(), SessionError> {
        let mut added = false;
        for (heading, &id) in headings.iter().zip(ids) {
            if self.columns.contains_key(&id) {
                continue;
            }
            self.columns.insert(id, self.headings.len());
            self.headings.push(heading.clone());
            added = true;
        }
        if !added && self.writer.is_some() {
            return Ok(());
        }

        if self.writer.is_some() {
            self.close()?;
            self.rotation += 1;
            self.path = rotated_path(&self.base, self.rotation);
            tracing::info!(
                "New series discovered, continuing trace in {}",
                self.path.display()
            );
        }

        let file = File::create(&self.path).map_err(|source| SessionError::Output {
            path: self.path.clone(),
            source,
        })?;
        let mut writer = csv::Writer::from_writer(BufWriter::new(file));
        writer
            .write_record(&self.headings)
            .map_err(|source| SessionError::OutputCsv {
                path: self.path.clone(),
                source,
            })?;
        self.writer = Some(writer);
        Ok(())
    }

    /// Append one sample as a row.
    ///
    /// Samples for series without a column are skipped.
    pub fn write_sample(&mut self, sample: &Sample) -> Result<(), SessionError> {
        let Some(&column) = self.columns.get(&sample.series) else {
            return Ok(());
        };
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };

        let mut record = vec![String::new(); self.headings.len()];
        record[0] = sample.start_ns.to_string();
        record[1] = sample.end_ns.to_string();
        record[column] = sample.value.to_string();

        writer
            .write_record(&record)
            .map_err(|source| SessionError::OutputCsv {
                path: self.path.clone(),
                source,
            })?;
        self.rows += 1;
        Ok(())
    }

    /// Flush and close the current file.
    pub fn close(&mut self) -> Result<(), SessionError> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        let io_error = |path: &Path, source: std::io::Error| SessionError::Output {
            path: path.to_path_buf(),
            source,
        };

        let mut inner = writer
            .into_inner()
            .map_err(|e| io_error(&self.path, std::io::Error::new(e.error().kind(), e.to_string())))?;
        inner.flush().map_err(|e| io_error(&self.path, e))?;
        inner
            .get_ref()
            .sync_all()
            .map_err(|e| io_error(&self.path, e))?;
        tracing::debug!("Closed trace {} ({} rows)", self.path.display(), self.rows);
        Ok(())
    }
}

/// `<stem>_NNNN.<ext>` next to `base`.
/// Name of the `index`th continuation of a rotated trace.
pub(crate) fn rotated_path(base: &Path, index: u32) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match base.extension() {
        Some(ext) => format!("{}_{:04}.{}", stem, index, ext.to_string_lossy()),
        None => format!("{}_{:04}", stem, index),
    };
    base.with_file_name(name)
}

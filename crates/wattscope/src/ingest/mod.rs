// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Trace ingestion.
//!
//! A [`TraceReader`] turns a CSV trace (a replayed file, a file that is still
//! growing, or the stdout pipe of a sensor process) into a stream of
//! [`IngestEvent`]s: one `Headings` event describing the energy columns,
//! then one `Sample` event per populated cell.
//!
//! # Example
//!
//! ```ignore
//! let ids = SeriesIds::new();
//! let reader = TraceReader::open(TraceSource::file("trace.csv", false), ids).await?;
//! let (tx, mut rx) = tokio::sync::mpsc::channel(1024);
//! tokio::spawn(reader.run(tx, CancellationToken::new()));
//! while let Some(event) = rx.recv().await { /* ... */ }
//! ```

mod layout;
mod line_reader;
mod watcher;

pub use layout::{parse_line, ParsedRow, SeriesIds, TraceLayout};
pub use line_reader::LineReader;
pub use watcher::FileWatcher;

use crate::sample::Sample;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Ingestion errors.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("File watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Trace {0} ended before a header row")]
    MissingHeader(String),

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("{0} has no stdout pipe")]
    NoStdout(String),
}

/// Event handed from a reader to the session writer.
#[derive(Debug)]
pub enum IngestEvent {
    /// Series discovered in the trace header.
    Headings { headings: Vec<String>, ids: Vec<u32> },

    /// One parsed reading.
    Sample(Sample),

    /// The reader stopped on a fatal error.
    Failed(IngestError),
}

/// Where a trace comes from.
pub enum TraceSource {
    /// CSV file on disk; with `follow`, keep reading as it grows.
    File { path: PathBuf, follow: bool },

    /// Sensor process writing the trace to stdout.
    Process { program: String, args: Vec<String> },

    /// Any other byte stream.
    Stream {
        label: String,
        reader: Box<dyn AsyncRead + Send + Unpin>,
    },
}

impl TraceSource {
    /// File source.
    pub fn file(path: impl Into<PathBuf>, follow: bool) -> Self {
        Self::File {
            path: path.into(),
            follow,
        }
    }

    /// Sensor process source.
    pub fn process(program: impl Into<String>, args: Vec<String>) -> Self {
        Self::Process {
            program: program.into(),
            args,
        }
    }

    /// Human-readable origin, used in logs.
    pub fn label(&self) -> String {
        match self {
            Self::File { path, .. } => path.display().to_string(),
            Self::Process { program, .. } => program.clone(),
            Self::Stream { label, .. } => label.clone(),
        }
    }
}

impl std::fmt::Debug for TraceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File { path, follow } => f
                .debug_struct("File")
                .field("path", path)
                .field("follow", follow)
                .finish(),
            Self::Process { program, args } => f
                .debug_struct("Process")
                .field("program", program)
                .field("args", args)
                .finish(),
            Self::Stream { label, .. } => f.debug_struct("Stream").field("label", label).finish(),
        }
    }
}

/// Reader statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReaderStats {
    /// Data rows parsed
    pub rows: u64,

    /// Samples handed to the writer
    pub samples: u64,

    /// Rows or cells skipped as malformed
    pub malformed: u64,
}

enum Wait {
    Resumed,
    Closed,
    Cancelled,
}

/// Reads one trace source to completion (or cancellation).
pub struct TraceReader {
    label: String,
    lines: LineReader<Box<dyn AsyncRead + Send + Unpin>>,
    watcher: Option<FileWatcher>,
    child: Option<Child>,
    ids: SeriesIds,
    stats: ReaderStats,
}

impl TraceReader {
    /// Open a source.
    ///
    /// Fails if the file cannot be opened, the watcher cannot be created,
    /// or the process cannot be started.
    pub async fn open(source: TraceSource, ids: SeriesIds) -> Result<Self, IngestError> {
        let label = source.label();
        let (reader, watcher, child): (Box<dyn AsyncRead + Send + Unpin>, _, _) = match source {
            TraceSource::File { path, follow } => {
                let file = tokio::fs::File::open(&path).await?;
                let watcher = if follow {
                    Some(FileWatcher::new(&path)?)
                } else {
                    None
                };
                (Box::new(file), watcher, None)
            }
            TraceSource::Process { program, args } => {
                let (child, stdout) = spawn_sensor(&program, &args)?;
                (Box::new(stdout), None, Some(child))
            }
            TraceSource::Stream { reader, .. } => (reader, None, None),
        };

        Ok(Self {
            label,
            lines: LineReader::new(reader),
            watcher,
            child,
            ids,
            stats: ReaderStats::default(),
        })
    }

    /// Origin of the trace.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Read until the source closes, the writer goes away, or `cancel` fires.
    pub async fn run(
        mut self,
        events: mpsc::Sender<IngestEvent>,
        cancel: CancellationToken,
    ) -> ReaderStats {
        let layout = match self.read_header(&cancel).await {
            Ok(Some(layout)) => layout,
            Ok(None) => return self.finish(&cancel).await,
            Err(e) => {
                tracing::error!("Failed to read header of {}: {}", self.label, e);
                let _ = events.send(IngestEvent::Failed(e)).await;
                return self.finish(&cancel).await;
            }
        };

        if layout.is_empty() {
            tracing::warn!("No energy columns in {}", self.label);
        }
        tracing::info!("Reading {} series from {}", layout.len(), self.label);

        let headings = IngestEvent::Headings {
            headings: layout.headings(),
            ids: layout.ids(),
        };
        if events.send(headings).await.is_err() {
            return self.finish(&cancel).await;
        }

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = self.lines.next_line() => next,
            };

            match next {
                Ok(Some(line)) => {
                    if !self.handle_line(&layout, &line, &events).await {
                        break;
                    }
                }
                Ok(None) => match self.wait_for_growth(&cancel).await {
                    Wait::Resumed => {}
                    Wait::Cancelled => break,
                    Wait::Closed => {
                        if let Some(rest) = self.lines.finish() {
                            self.handle_line(&layout, &rest, &events).await;
                        }
                        break;
                    }
                },
                Err(e) => {
                    tracing::error!("Read error on {}: {}", self.label, e);
                    let _ = events.send(IngestEvent::Failed(e.into())).await;
                    break;
                }
            }
        }

        self.finish(&cancel).await
    }

    async fn read_header(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<TraceLayout>, IngestError> {
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                next = self.lines.next_line() => next?,
            };

            match next {
                Some(line) => {
                    if let Some(header) = parse_line(&line)? {
                        return Ok(Some(TraceLayout::from_header(&header, &self.ids)));
                    }
                }
                None => match self.wait_for_growth(cancel).await {
                    Wait::Resumed => {}
                    Wait::Cancelled => return Ok(None),
                    Wait::Closed => return Err(IngestError::MissingHeader(self.label.clone())),
                },
            }
        }
    }

    /// Returns false once the writer has gone away.
    async fn handle_line(
        &mut self,
        layout: &TraceLayout,
        line: &str,
        events: &mpsc::Sender<IngestEvent>,
    ) -> bool {
        let record = match parse_line(line) {
            Ok(Some(record)) => record,
            Ok(None) => return true,
            Err(e) => {
                tracing::warn!("Skipping unparsable line in {}: {}", self.label, e);
                self.stats.malformed += 1;
                return true;
            }
        };

        let row = layout.parse_row(&record);
        self.stats.rows += 1;
        self.stats.malformed += row.malformed as u64;

        for sample in row.samples {
            if events.send(IngestEvent::Sample(sample)).await.is_err() {
                tracing::debug!("Writer for {} closed", self.label);
                return false;
            }
            self.stats.samples += 1;
        }
        true
    }

    async fn wait_for_growth(&mut self, cancel: &CancellationToken) -> Wait {
        let Some(watcher) = self.watcher.as_mut() else {
            return Wait::Closed;
        };
        tokio::select! {
            _ = cancel.cancelled() => Wait::Cancelled,
            changed = watcher.changed() => {
                if changed {
                    Wait::Resumed
                } else {
                    tracing::warn!("Watcher for {} stopped", self.label);
                    Wait::Closed
                }
            }
        }
    }

    async fn finish(mut self, cancel: &CancellationToken) -> ReaderStats {
        if let Some(mut child) = self.child.take() {
            if cancel.is_cancelled() {
                let _ = child.start_kill();
            }
            match child.wait().await {
                Ok(status) => tracing::info!("{} exited with {}", self.label, status),
                Err(e) => tracing::warn!("Failed to reap {}: {}", self.label, e),
            }
        }

        tracing::info!(
            "Finished {}: {} rows, {} samples, {} malformed",
            self.label,
            self.stats.rows,
            self.stats.samples,
            self.stats.malformed
        );
        self.stats
    }
}

/// Resolve a sensor program: next to the running executable first, then
/// whatever `PATH` lookup finds at spawn time.
pub fn locate_program(program: &str) -> PathBuf {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.to_path_buf();
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let sibling = dir.join(format!("{}{}", program, std::env::consts::EXE_SUFFIX));
            if sibling.is_file() {
                return sibling;
            }
        }
    }

    PathBuf::from(program)
}

fn spawn_sensor(
    program: &str,
    args: &[String],
) -> Result<(Child, tokio::process::ChildStdout), IngestError> {
    let path = locate_program(program);
    tracing::info!("Starting sensor process {}", path.display());

    let mut child = Command::new(&path)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| IngestError::Spawn {
            program: path.display().to_string(),
            source,
        })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| IngestError::NoStdout(program.to_string()))?;
    Ok((child, stdout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::Unit;
    use std::io::Write;
    use std::time::Duration;

    async fn recv(rx: &mut mpsc::Receiver<IngestEvent>) -> IngestEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event in time")
            .expect("channel open")
    }

    #[tokio::test]
    async fn test_replay_static_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("trace.csv");
        std::fs::write(
            &path,
            "start (ns), end (ns), cpu (J), gpu (W)\n0, 1000, 1.0, 2.0\n1000, 2000, , 4.0\nbad, 3000, 1.0, 1.0\n",
        )
        .expect("write");

        let reader = TraceReader::open(TraceSource::file(&path, false), SeriesIds::new())
            .await
            .expect("open");
        let (tx, mut rx) = mpsc::channel(16);
        let stats = reader.run(tx, CancellationToken::new()).await;

        match recv(&mut rx).await {
            IngestEvent::Headings { headings, ids } => {
                assert_eq!(headings, vec!["cpu (J)", "gpu (W)"]);
                assert_eq!(ids, vec![1, 2]);
            }
            other => panic!("expected headings, got {:?}", other),
        }

        let mut samples = Vec::new();
        while let Some(event) = rx.recv().await {
            match event {
                IngestEvent::Sample(sample) => samples.push(sample),
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[2].unit, Unit::Watts);
        assert_eq!(samples[2].start_ns, 1000);
        assert_eq!(
            stats,
            ReaderStats {
                rows: 3,
                samples: 3,
                malformed: 1
            }
        );
    }

    #[tokio::test]
    async fn test_missing_header_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("empty.csv");
        std::fs::write(&path, "").expect("write");

        let reader = TraceReader::open(TraceSource::file(&path, false), SeriesIds::new())
            .await
            .expect("open");
        let (tx, mut rx) = mpsc::channel(4);
        reader.run(tx, CancellationToken::new()).await;

        assert!(matches!(
            recv(&mut rx).await,
            IngestEvent::Failed(IngestError::MissingHeader(_))
        ));
    }

    #[tokio::test]
    async fn test_tail_picks_up_appended_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("live.csv");
        let mut file = std::fs::File::create(&path).expect("create");
        file.write_all(b"start (ns), end (ns), cpu (J)\n0, 10, 1.0\n")
            .expect("write");
        file.sync_all().expect("sync");

        let reader = TraceReader::open(TraceSource::file(&path, true), SeriesIds::new())
            .await
            .expect("open");
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(reader.run(tx, cancel.clone()));

        assert!(matches!(recv(&mut rx).await, IngestEvent::Headings { .. }));
        assert!(matches!(recv(&mut rx).await, IngestEvent::Sample(s) if s.end_ns == 10));

        file.write_all(b"10, 20, ").expect("write");
        file.sync_all().expect("sync");
        file.write_all(b"2.0\n").expect("write");
        file.sync_all().expect("sync");

        match recv(&mut rx).await {
            IngestEvent::Sample(s) => {
                assert_eq!((s.start_ns, s.end_ns), (10, 20));
                assert_eq!(s.value, 2.0);
            }
            other => panic!("expected sample, got {:?}", other),
        }

        cancel.cancel();
        let stats = task.await.expect("join");
        assert_eq!(stats.samples, 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_source() {
        let script = "printf 'start (ns), end (ns), cpu (J)\\n0, 5, 3.0\\n5, 10, 4.0'".to_string();
        let reader = TraceReader::open(
            TraceSource::process("sh", vec!["-c".to_string(), script]),
            SeriesIds::new(),
        )
        .await
        .expect("spawn");
        let (tx, mut rx) = mpsc::channel(16);
        let stats = reader.run(tx, CancellationToken::new()).await;

        assert!(matches!(recv(&mut rx).await, IngestEvent::Headings { .. }));
        assert!(matches!(recv(&mut rx).await, IngestEvent::Sample(s) if s.value == 3.0));
        assert!(matches!(recv(&mut rx).await, IngestEvent::Sample(s) if s.value == 4.0));
        assert_eq!(stats.samples, 2);
    }

    #[tokio::test]
    async fn test_spawn_failure_reported() {
        let result = TraceReader::open(
            TraceSource::process("wattscope-definitely-missing", Vec::new()),
            SeriesIds::new(),
        )
        .await;
        assert!(matches!(result, Err(IngestError::Spawn { .. })));
    }

    #[test]
    fn test_locate_program_falls_back_to_path() {
        assert_eq!(
            locate_program("wattscope-definitely-missing"),
            PathBuf::from("wattscope-definitely-missing")
        );
        assert_eq!(locate_program("/usr/bin/env"), PathBuf::from("/usr/bin/env"));
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Benchmark runs and reloads.

use super::{random_id, BenchmarkData, BenchmarkError, BenchmarkSeries};
use crate::series::SeriesHandle;
use crate::session::{rotated_path, Session, SessionCoordinator};
use crate::sensors::unix_nanos;
use crate::store::BenchmarkStore;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Runs commands between two baselines on the active sensing session.
#[derive(Clone)]
pub struct Benchmarker {
    coordinator: SessionCoordinator,
    store: BenchmarkStore,
    running: Arc<Mutex<HashSet<String>>>,
    cancel: CancellationToken,
}

/// Clears a command's running flag when its run ends.
struct RunningGuard {
    running: Arc<Mutex<HashSet<String>>>,
    command: String,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.running.lock().remove(&self.command);
    }
}

/// Wall-clock origin plus a monotonic offset, so phase timestamps are
/// immune to clock adjustments during the run.
struct Clock {
    origin_ns: i64,
    started: Instant,
}

impl Clock {
    fn start() -> Self {
        Self {
            origin_ns: unix_nanos(),
            started: Instant::now(),
        }
    }

    fn now(&self) -> i64 {
        self.origin_ns + self.started.elapsed().as_nanos() as i64
    }
}

impl Benchmarker {
    /// Create a benchmarker; `cancel` stops every run it starts.
    pub fn new(coordinator: SessionCoordinator, cancel: CancellationToken) -> Self {
        let store = BenchmarkStore::new(coordinator.config().clone());
        Self {
            coordinator,
            store,
            running: Arc::new(Mutex::new(HashSet::new())),
            cancel,
        }
    }

    /// Result store used for finished runs.
    pub fn store(&self) -> &BenchmarkStore {
        &self.store
    }

    /// Benchmark `command` (split on whitespace) against the sensing session.
    ///
    /// The receiver gets the record after every phase change and once more
    /// with results. Only one run per command string may be active.
    pub fn run(
        &self,
        command: &str,
        notes: &str,
        baseline: Duration,
    ) -> Result<mpsc::Receiver<BenchmarkData>, BenchmarkError> {
        let argv: Vec<String> = command.split_whitespace().map(str::to_string).collect();
        if argv.is_empty() {
            return Err(BenchmarkError::EmptyCommand);
        }
        if !self.running.lock().insert(command.to_string()) {
            return Err(BenchmarkError::AlreadyRunning(command.to_string()));
        }
        let guard = RunningGuard {
            running: self.running.clone(),
            command: command.to_string(),
        };

        let (tx, rx) = mpsc::channel(8);
        let this = self.clone();
        let command = command.to_string();
        let notes = notes.to_string();
        tokio::spawn(async move {
            let _guard = guard;
            let cancel = this.cancel.child_token();
            if let Err(e) = this
                .execute(&command, &notes, &argv, baseline, &tx, &cancel)
                .await
            {
                tracing::warn!("Benchmark of {:?} did not complete: {}", command, e);
            }
        });
        Ok(rx)
    }

    async fn execute(
        &self,
        command: &str,
        notes: &str,
        argv: &[String],
        baseline: Duration,
        tx: &mpsc::Sender<BenchmarkData>,
        cancel: &CancellationToken,
    ) -> Result<(), BenchmarkError> {
        let clock = Clock::start();
        let Some(session) = self.coordinator.sensing_session(cancel.clone()).await else {
            return Ok(());
        };

        let mut data = BenchmarkData {
            session_id: session.id.clone(),
            benchmark_id: random_id(),
            command: command.to_string(),
            notes: notes.to_string(),
            pre_baseline_start: clock.now(),
            ..BenchmarkData::default()
        };
        tracing::info!(
            "Benchmark {} of {:?} on session {}: pre-baseline",
            data.benchmark_id,
            command,
            data.session_id
        );
        emit(tx, &data).await;

        if !sleep(baseline, cancel).await {
            return Ok(());
        }
        data.pre_baseline_end = clock.now();
        emit(tx, &data).await;

        tracing::info!("Benchmark {}: running {:?}", data.benchmark_id, command);
        match run_command(argv, cancel).await {
            Ok(Some(status)) if status.success() => {}
            Ok(Some(status)) => {
                let err = BenchmarkError::CommandFailed {
                    command: command.to_string(),
                    status: status.to_string(),
                };
                return Err(fail(tx, &mut data, err).await);
            }
            Ok(None) => return Ok(()),
            Err(source) => {
                let err = BenchmarkError::Spawn {
                    command: command.to_string(),
                    source,
                };
                return Err(fail(tx, &mut data, err).await);
            }
        }
        data.post_baseline_start = clock.now();
        emit(tx, &data).await;

        tracing::info!("Benchmark {}: post-baseline", data.benchmark_id);
        if !sleep(baseline, cancel).await {
            return Ok(());
        }
        data.post_baseline_end = clock.now();
        emit(tx, &data).await;

        let Some(mut updates) = self
            .coordinator
            .stream_session(cancel.clone(), &data.session_id)
        else {
            let err = BenchmarkError::MissingData(data.session_id.clone());
            return Err(fail(tx, &mut data, err).await);
        };
        let latest = updates.current();
        if !data.compute_results(&latest, &mut updates).await {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let err = BenchmarkError::MissingData(data.session_id.clone());
            return Err(fail(tx, &mut data, err).await);
        }
        emit(tx, &data).await;

        self.store.append(&data)?;
        tracing::info!("Benchmark {} complete", data.benchmark_id);
        Ok(())
    }

    /// Reload a benchmark log and recompute every result.
    ///
    /// Each referenced session is replayed from its trace, looked up next
    /// to the log first and then in the output directory. Sessions whose
    /// trace is missing are skipped. Only the first part of a rotated trace
    /// is replayed.
    pub async fn load(&self, path: impl AsRef<Path>) -> Result<Vec<BenchmarkData>, BenchmarkError> {
        let path = path.as_ref();
        let log = BenchmarkStore::load_path(path)?;

        let mut by_session: BTreeMap<String, Vec<BenchmarkData>> = BTreeMap::new();
        for benchmark in log {
            by_session
                .entry(benchmark.session_id.clone())
                .or_default()
                .push(benchmark);
        }

        let config = self.coordinator.config();
        let mut loaded = Vec::new();
        for (session_id, benchmarks) in by_session {
            let beside_log = path
                .parent()
                .map(|dir| dir.join(format!("{}{}.csv", config.file_prefix, session_id)));
            let trace = match beside_log {
                Some(candidate) if candidate.is_file() => candidate,
                _ => config.session_file(&session_id),
            };
            if !trace.is_file() {
                tracing::warn!(
                    "Trace {} for session {} not found, skipping {} benchmarks",
                    trace.display(),
                    session_id,
                    benchmarks.len()
                );
                continue;
            }

            let continuation = rotated_path(&trace, 1);
            if continuation.is_file() {
                tracing::warn!(
                    "Only {} is replayed for session {}; rows in {} and later parts are not loaded",
                    trace.display(),
                    session_id,
                    continuation.display()
                );
            }

            self.coordinator
                .replay_file_with_id(session_id.clone(), &trace)
                .await?;
            let Some(mut updates) = self
                .coordinator
                .stream_session(self.cancel.child_token(), &session_id)
            else {
                continue;
            };

            for mut benchmark in benchmarks {
                let latest = updates.current();
                if !benchmark.compute_results(&latest, &mut updates).await {
                    tracing::warn!(
                        "Benchmark {} not covered by session {}",
                        benchmark.benchmark_id,
                        session_id
                    );
                    benchmark.err = Some(BenchmarkError::MissingData(session_id.clone()).to_string());
                }
                loaded.push(benchmark);
            }
        }

        Ok(loaded)
    }

    /// Baseline-adjusted views of every series touched by `benchmarks`,
    /// ordered by benchmark start time.
    pub fn benchmark_series(&self, benchmarks: &[BenchmarkData]) -> Vec<BenchmarkSeries<SeriesHandle>> {
        let mut sorted: Vec<&BenchmarkData> = benchmarks.iter().collect();
        sorted.sort_by_key(|b| b.pre_baseline_start);

        let mut sessions: HashMap<&str, Option<Session>> = HashMap::new();
        let mut views = Vec::new();
        for benchmark in sorted {
            let session = sessions
                .entry(benchmark.session_id.as_str())
                .or_insert_with(|| {
                    self.coordinator
                        .stream_session(self.cancel.child_token(), &benchmark.session_id)
                        .map(|stream| stream.current())
                });
            let Some(session) = session else {
                tracing::warn!(
                    "Session {} of benchmark {} is not loaded",
                    benchmark.session_id,
                    benchmark.benchmark_id
                );
                continue;
            };
            views.extend(
                session
                    .data
                    .series()
                    .iter()
                    .map(|series| BenchmarkSeries::new(series.clone(), benchmark.clone())),
            );
        }
        views
    }
}

async fn emit(tx: &mpsc::Sender<BenchmarkData>, data: &BenchmarkData) {
    if tx.send(data.clone()).await.is_err() {
        tracing::debug!("No listener for benchmark {}", data.benchmark_id);
    }
}

async fn fail(
    tx: &mpsc::Sender<BenchmarkData>,
    data: &mut BenchmarkData,
    err: BenchmarkError,
) -> BenchmarkError {
    data.err = Some(err.to_string());
    emit(tx, data).await;
    err
}

/// Returns false if cancelled first.
async fn sleep(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// `Ok(None)` if cancelled while the command ran; the command is killed.
async fn run_command(
    argv: &[String],
    cancel: &CancellationToken,
) -> std::io::Result<Option<ExitStatus>> {
    let Some((program, args)) = argv.split_first() else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "empty command",
        ));
    };
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()?;

    tokio::select! {
        _ = cancel.cancelled() => {
            child.start_kill()?;
            child.wait().await?;
            Ok(None)
        }
        status = child.wait() => status.map(Some),
    }
}

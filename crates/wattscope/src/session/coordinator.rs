// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Session coordinator.
//!
//! Owns every session of the process. Each session gets exactly one reader
//! task (parsing the trace) and one writer task (the only code that mutates
//! the session's dataset). The writer republishes the session through a
//! `watch` channel after every change, so subscribers always read the
//! latest snapshot and never block the writer.

use super::{Mode, SensingSessionStream, Session, SessionError, SessionStream, TraceOutput};
use crate::config::Config;
use crate::ingest::{IngestEvent, SeriesIds, TraceReader, TraceSource};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Coordinator-wide status.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorStatus {
    /// Mode of the most recently started session.
    pub mode: Mode,

    /// Most recently started session.
    pub session_id: Option<String>,

    /// Session currently recording from sensors.
    pub sensing_id: Option<String>,

    /// Last session-fatal error.
    pub err: Option<Arc<SessionError>>,
}

struct SessionEntry {
    tx: Arc<watch::Sender<Session>>,
    cancel: CancellationToken,
}

struct Inner {
    config: Config,
    ids: SeriesIds,
    sessions: Mutex<HashMap<String, SessionEntry>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    root: CancellationToken,
    status: Arc<watch::Sender<CoordinatorStatus>>,
    last_id: Mutex<u128>,
}

/// Starts, tracks and stops sessions. Cheap to clone.
#[derive(Clone)]
pub struct SessionCoordinator {
    inner: Arc<Inner>,
}

impl SessionCoordinator {
    /// Create a coordinator.
    pub fn new(config: Config) -> Self {
        let (status, _) = watch::channel(CoordinatorStatus::default());
        Self {
            inner: Arc::new(Inner {
                config,
                ids: SeriesIds::new(),
                sessions: Mutex::new(HashMap::new()),
                tasks: Mutex::new(Vec::new()),
                root: CancellationToken::new(),
                status: Arc::new(status),
                last_id: Mutex::new(0),
            }),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Series id allocator shared by every reader.
    pub fn series_ids(&self) -> &SeriesIds {
        &self.inner.ids
    }

    /// Fresh session id: the UTC time as `YYYYMMDDhhmmss` plus nanoseconds,
    /// bumped if needed so ids never repeat within the process.
    pub fn generate_session_id(&self) -> String {
        let now = chrono::Utc::now().format("%Y%m%d%H%M%S%f").to_string();
        let mut last = self.inner.last_id.lock();
        let candidate = now.parse::<u128>().unwrap_or(0).max(*last + 1);
        *last = candidate;
        format!("{:023}", candidate)
    }

    /// Start a session reading from `source`.
    ///
    /// Returns the id and whether a new session was created; starting an id
    /// that already exists returns the existing session untouched.
    pub async fn start_session(
        &self,
        id: impl Into<String>,
        mode: Mode,
        source: TraceSource,
    ) -> Result<(String, bool), SessionError> {
        let id = id.into();
        if self.inner.root.is_cancelled() {
            return Err(SessionError::ShutDown);
        }
        if self.inner.sessions.lock().contains_key(&id) {
            tracing::debug!("Session {} already running", id);
            return Ok((id, false));
        }

        let label = source.label();
        let reader = match TraceReader::open(source, self.inner.ids.clone()).await {
            Ok(reader) => reader,
            Err(e) => {
                tracing::error!("Failed to start session {} from {}: {}", id, label, e);
                let failed = || SessionError::StartFailed {
                    id: id.clone(),
                    reason: e.to_string(),
                };
                self.inner
                    .status
                    .send_modify(|s| s.err = Some(Arc::new(failed())));
                return Err(failed());
            }
        };

        let cancel = self.inner.root.child_token();
        let (tx, _) = watch::channel(Session::new(id.clone(), mode));
        let tx = Arc::new(tx);
        {
            let mut sessions = self.inner.sessions.lock();
            if sessions.contains_key(&id) {
                return Ok((id, false));
            }
            sessions.insert(
                id.clone(),
                SessionEntry {
                    tx: tx.clone(),
                    cancel: cancel.clone(),
                },
            );
        }

        let (events_tx, events_rx) = mpsc::channel(self.inner.config.channel_capacity);
        let output = match mode {
            Mode::Sensing => Some(TraceOutput::new(self.inner.config.session_file(&id))),
            Mode::None | Mode::Replaying => None,
        };

        let reader_task = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                reader.run(events_tx, cancel).await;
            }
        });
        let writer = SessionWriter {
            tx,
            status: self.inner.status.clone(),
            output,
            cancel,
        };
        let writer_task = tokio::spawn(writer.run(events_rx));
        {
            let mut tasks = self.inner.tasks.lock();
            tasks.retain(|t| !t.is_finished());
            tasks.push(reader_task);
            tasks.push(writer_task);
        }

        self.inner.status.send_modify(|s| {
            s.mode = mode;
            s.session_id = Some(id.clone());
            if mode == Mode::Sensing {
                s.sensing_id = Some(id.clone());
            }
        });
        tracing::info!("Started {:?} session {} from {}", mode, id, label);
        Ok((id, true))
    }

    /// Replay a trace file under a fresh session id.
    pub async fn replay_file(
        &self,
        path: impl Into<PathBuf>,
        follow: bool,
    ) -> Result<String, SessionError> {
        let id = self.generate_session_id();
        let (id, _) = self
            .start_session(id, Mode::Replaying, TraceSource::file(path, follow))
            .await?;
        Ok(id)
    }

    /// Replay a trace file, following it if `follow_replays` is configured.
    pub async fn replay(&self, path: impl Into<PathBuf>) -> Result<String, SessionError> {
        self.replay_file(path, self.inner.config.follow_replays)
            .await
    }

    /// Replay a recorded trace under its original session id.
    pub async fn replay_file_with_id(
        &self,
        id: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Result<(String, bool), SessionError> {
        self.start_session(id, Mode::Replaying, TraceSource::file(path, false))
            .await
    }

    /// Launch the configured sensor program and record its output.
    pub async fn launch_sensors(&self) -> Result<String, SessionError> {
        let id = self.generate_session_id();
        let program = self.inner.config.sensor_program.clone();
        let args = vec![format!(
            "-sample-interval={}ms",
            self.inner.config.sample_interval_ms
        )];
        let (id, _) = self
            .start_session(id, Mode::Sensing, TraceSource::process(program, args))
            .await?;
        Ok(id)
    }

    /// Subscribe to a session; `None` if the id is unknown.
    pub fn stream_session(&self, cancel: CancellationToken, id: &str) -> Option<SessionStream> {
        let sessions = self.inner.sessions.lock();
        let entry = sessions.get(id)?;
        Some(SessionStream::new(id.to_string(), entry.tx.subscribe(), cancel))
    }

    /// Wait for a sensing session and return its latest snapshot.
    pub async fn sensing_session(&self, cancel: CancellationToken) -> Option<Session> {
        let mut status = self.status();
        loop {
            let sensing = status.borrow_and_update().sensing_id.clone();
            if let Some(id) = sensing {
                if let Some(stream) = self.stream_session(cancel.clone(), &id) {
                    return Some(stream.current());
                }
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                changed = status.changed() => changed.ok()?,
            }
        }
    }

    /// Follow the sensing session, re-subscribing when it changes.
    pub fn sensing_session_stream(&self, cancel: CancellationToken) -> SensingSessionStream {
        SensingSessionStream::new(self.clone(), cancel)
    }

    /// Coordinator status updates.
    pub fn status(&self) -> watch::Receiver<CoordinatorStatus> {
        self.inner.status.subscribe()
    }

    /// Stop one session; its writer flushes and publishes a final snapshot.
    pub fn cancel_session(&self, id: &str) -> bool {
        let Some(entry) = self.inner.sessions.lock().remove(id) else {
            return false;
        };
        entry.cancel.cancel();
        self.inner.status.send_if_modified(|s| {
            if s.sensing_id.as_deref() == Some(id) {
                s.sensing_id = None;
                true
            } else {
                false
            }
        });
        tracing::info!("Cancelled session {}", id);
        true
    }

    /// Ids of all known sessions.
    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.sessions.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Cancel every session and wait for all writers to flush.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down session coordinator");
        self.inner.root.cancel();

        let tasks: Vec<JoinHandle<()>> = self.inner.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!("Session task failed: {}", e);
            }
        }

        self.inner.sessions.lock().clear();
        self.inner.status.send_modify(|s| s.sensing_id = None);
    }
}

/// Single writer of one session.
struct SessionWriter {
    tx: Arc<watch::Sender<Session>>,
    status: Arc<watch::Sender<CoordinatorStatus>>,
    output: Option<TraceOutput>,
    cancel: CancellationToken,
}

impl SessionWriter {
    async fn run(mut self, mut events: mpsc::Receiver<IngestEvent>) {
        let id = self.tx.borrow().id.clone();

        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = events.recv() => event,
            };
            let Some(event) = event else {
                break;
            };

            match event {
                IngestEvent::Headings { headings, ids } => {
                    self.publish(|s| s.data.set_headings(&headings, &ids));
                    if let Some(output) = self.output.as_mut() {
                        if let Err(e) = output.add_headings(&headings, &ids) {
                            self.fail(e);
                            break;
                        }
                    }
                }
                IngestEvent::Sample(sample) => {
                    self.publish(|s| {
                        s.data.insert(&sample);
                    });
                    if let Some(output) = self.output.as_mut() {
                        if let Err(e) = output.write_sample(&sample) {
                            self.fail(e);
                            break;
                        }
                    }
                }
                IngestEvent::Failed(e) => {
                    self.fail(SessionError::Ingest(e));
                    break;
                }
            }
        }

        if let Some(mut output) = self.output.take() {
            if let Err(e) = output.close() {
                self.fail(e);
            } else {
                tracing::info!("Wrote {} rows to {}", output.rows(), output.path().display());
            }
        }

        self.publish(|s| s.closed = true);
        self.status.send_if_modified(|s| {
            if s.sensing_id.as_deref() == Some(id.as_str()) {
                s.sensing_id = None;
                true
            } else {
                false
            }
        });
        tracing::info!("Session {} closed", id);
    }

    fn publish(&self, f: impl FnOnce(&mut Session)) {
        self.tx.send_modify(|s| {
            f(s);
            s.revision += 1;
        });
    }

    /// Record a session-fatal error and stop the session's reader.
    fn fail(&self, err: SessionError) {
        tracing::error!("Session {} failed: {}", self.tx.borrow().id, err);
        let err = Arc::new(err);
        self.publish(|s| s.err = Some(err.clone()));
        self.status.send_modify(|s| s.err = Some(err));
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::DataSeries;
    use std::time::Duration;

    fn coordinator(dir: &std::path::Path) -> SessionCoordinator {
        SessionCoordinator::new(Config::builder().output_dir(dir).build())
    }

    fn write_trace(dir: &std::path::Path) -> PathBuf {
        let path = dir.join("input.csv");
        std::fs::write(
            &path,
            "start (ns), end (ns), cpu (J)\n0, 1000000000, 2\n1000000000, 2000000000, 4\n",
        )
        .expect("write");
        path
    }

    #[test]
    fn test_session_ids_are_unique_and_sortable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let coordinator = coordinator(dir.path());
        let ids: Vec<String> = (0..100).map(|_| coordinator.generate_session_id()).collect();

        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        assert_eq!(ids[0].len(), 23);
    }

    #[tokio::test]
    async fn test_replay_populates_session() {
        let dir = tempfile::tempdir().expect("tempdir");
        let coordinator = coordinator(dir.path());
        let path = write_trace(dir.path());

        let id = coordinator.replay_file(&path, false).await.expect("replay");
        let mut stream = coordinator
            .stream_session(CancellationToken::new(), &id)
            .expect("stream");
        let session = stream.closed().await.expect("closed");

        assert_eq!(session.mode, Mode::Replaying);
        assert!(session.err.is_none());
        assert!(session.data.initialized());
        assert_eq!(session.data.headings(), vec!["cpu (J)"]);
        assert_eq!(session.data.series()[0].sum(), 6.0);
        assert_eq!(session.data.domain(), (0, 2_000_000_000));

        let status = coordinator.status().borrow().clone();
        assert_eq!(status.mode, Mode::Replaying);
        assert_eq!(status.session_id.as_deref(), Some(id.as_str()));
    }

    #[tokio::test]
    async fn test_second_start_returns_existing_session() {
        let dir = tempfile::tempdir().expect("tempdir");
        let coordinator = coordinator(dir.path());
        let path = write_trace(dir.path());

        let (id, is_new) = coordinator
            .replay_file_with_id("fixed", &path)
            .await
            .expect("first");
        assert!(is_new);
        let (again, is_new) = coordinator
            .replay_file_with_id("fixed", &path)
            .await
            .expect("second");
        assert_eq!(again, id);
        assert!(!is_new);
        assert_eq!(coordinator.session_ids(), vec!["fixed".to_string()]);

        let mut stream = coordinator
            .stream_session(CancellationToken::new(), &id)
            .expect("stream");
        let session = stream.closed().await.expect("closed");
        assert_eq!(session.data.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_file_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let coordinator = coordinator(dir.path());

        let result = coordinator
            .replay_file(dir.path().join("absent.csv"), false)
            .await;
        assert!(matches!(result, Err(SessionError::StartFailed { .. })));
        assert!(coordinator.status().borrow().err.is_some());
        assert!(coordinator.session_ids().is_empty());
    }

    #[tokio::test]
    async fn test_sensing_session_writes_trace() {
        let dir = tempfile::tempdir().expect("tempdir");
        let coordinator = coordinator(dir.path());
        let input = write_trace(dir.path());

        let id = coordinator.generate_session_id();
        coordinator
            .start_session(id.clone(), Mode::Sensing, TraceSource::file(&input, true))
            .await
            .expect("start");

        let cancel = CancellationToken::new();
        let session = coordinator
            .sensing_session(cancel.clone())
            .await
            .expect("sensing");
        assert_eq!(session.id, id);

        let mut stream = coordinator.stream_session(cancel, &id).expect("stream");
        loop {
            let session = tokio::time::timeout(Duration::from_secs(5), stream.next())
                .await
                .expect("update")
                .expect("open");
            if session.data.initialized() && session.data.series()[0].len() == 2 {
                break;
            }
        }

        assert!(coordinator.cancel_session(&id));
        assert!(!coordinator.cancel_session(&id));
        let last = stream.closed().await.expect("final");
        assert!(last.err.is_none());
        assert!(coordinator.status().borrow().sensing_id.is_none());

        let written = std::fs::read_to_string(coordinator.config().session_file(&id)).expect("trace");
        assert_eq!(
            written,
            "start (ns),end (ns),cpu (J)\n0,1000000000,2\n1000000000,2000000000,4\n"
        );
    }

    #[tokio::test]
    async fn test_shutdown_stops_followers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let coordinator = coordinator(dir.path());
        let path = write_trace(dir.path());

        let id = coordinator.replay_file(&path, true).await.expect("replay");
        let mut stream = coordinator
            .stream_session(CancellationToken::new(), &id)
            .expect("stream");

        tokio::time::timeout(Duration::from_secs(5), coordinator.shutdown())
            .await
            .expect("shutdown in time");
        let last = stream.closed().await.expect("final");
        assert!(last.closed);
        assert!(coordinator.session_ids().is_empty());

        assert!(matches!(
            coordinator.replay_file(&path, false).await,
            Err(SessionError::ShutDown)
        ));
    }

    #[tokio::test]
    async fn test_output_failure_closes_sensing_session() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = write_trace(dir.path());
        let coordinator = SessionCoordinator::new(
            Config::builder()
                .output_dir(dir.path().join("missing"))
                .build(),
        );

        let (id, _) = coordinator
            .start_session("broken", Mode::Sensing, TraceSource::file(&input, true))
            .await
            .expect("start");
        let mut stream = coordinator
            .stream_session(CancellationToken::new(), &id)
            .expect("stream");

        let last = tokio::time::timeout(Duration::from_secs(5), stream.closed())
            .await
            .expect("closed in time")
            .expect("final");
        assert!(last.closed);
        assert!(matches!(
            last.err.as_deref(),
            Some(SessionError::Output { .. })
        ));

        let status = coordinator.status().borrow().clone();
        assert!(status.err.is_some());
        assert!(status.sensing_id.is_none());

        // The follower was cancelled with the writer, so shutdown has nothing to wait for.
        tokio::time::timeout(Duration::from_secs(5), coordinator.shutdown())
            .await
            .expect("reader stopped");
        assert!(!dir.path().join("missing").exists());
    }

    #[tokio::test]
    async fn test_replay_follows_when_configured() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_trace(dir.path());

        let once = coordinator(dir.path());
        let id = once.replay(&path).await.expect("replay");
        let session = tokio::time::timeout(
            Duration::from_secs(5),
            once.stream_session(CancellationToken::new(), &id)
                .expect("stream")
                .closed(),
        )
        .await
        .expect("finished replay closes")
        .expect("final");
        assert_eq!(session.data.series()[0].len(), 2);

        let following = SessionCoordinator::new(
            Config::builder()
                .output_dir(dir.path())
                .follow_replays(true)
                .build(),
        );
        let id = following.replay(&path).await.expect("replay");
        let mut stream = following
            .stream_session(CancellationToken::new(), &id)
            .expect("stream");
        loop {
            let session = tokio::time::timeout(Duration::from_secs(5), stream.next())
                .await
                .expect("update")
                .expect("open");
            assert!(!session.closed);
            if session.data.initialized() && session.data.series()[0].len() == 2 {
                break;
            }
        }

        {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&path)
                .expect("open");
            writeln!(file, "2000000000, 3000000000, 6").expect("append");
        }
        loop {
            let session = tokio::time::timeout(Duration::from_secs(5), stream.next())
                .await
                .expect("appended row")
                .expect("open");
            if session.data.series()[0].len() == 3 {
                assert_eq!(session.data.series()[0].sum(), 12.0);
                break;
            }
        }
        following.shutdown().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_passes_sample_interval() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let args_file = dir.path().join("args");
        let program = dir.path().join("fake-sensors");
        std::fs::write(
            &program,
            format!(
                "#!/bin/sh\necho \"$@\" > {}\nprintf 'start (ns), end (ns), cpu (J)\\n0, 1000000000, 3\\n'\n",
                args_file.display()
            ),
        )
        .expect("write script");
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755))
            .expect("chmod");

        let coordinator = SessionCoordinator::new(
            Config::builder()
                .output_dir(dir.path())
                .sensor_program(program.display().to_string())
                .sample_interval(Duration::from_millis(250))
                .build(),
        );
        let id = coordinator.launch_sensors().await.expect("launch");
        let session = tokio::time::timeout(
            Duration::from_secs(5),
            coordinator
                .stream_session(CancellationToken::new(), &id)
                .expect("stream")
                .closed(),
        )
        .await
        .expect("sensor exits")
        .expect("final");

        assert_eq!(session.mode, Mode::Sensing);
        assert_eq!(session.data.series()[0].sum(), 3.0);
        assert_eq!(
            std::fs::read_to_string(&args_file).expect("args").trim(),
            "-sample-interval=250ms"
        );
    }
}

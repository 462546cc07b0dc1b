// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sessions: one recording (live or replayed) and its subscribers.

mod coordinator;
mod output;

pub use coordinator::{CoordinatorStatus, SessionCoordinator};
pub use output::TraceOutput;
pub(crate) use output::rotated_path;

use crate::dataset::Dataset;
use crate::ingest::IngestError;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("Output error on {path}: {source}")]
    Output {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("CSV output error on {path}: {source}")]
    OutputCsv { path: PathBuf, source: csv::Error },

    #[error("Session {id} failed to start: {reason}")]
    StartFailed { id: String, reason: String },

    #[error("Coordinator is shut down")]
    ShutDown,
}

/// How a session gets its data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum Mode {
    #[default]
    None,
    Sensing,
    Replaying,
}

/// Snapshot of one recording.
///
/// Snapshots share series storage with the writer, so a snapshot taken
/// earlier keeps seeing samples inserted later; `revision` identifies the
/// publish the snapshot came from.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub id: String,
    pub data: Dataset,
    pub mode: Mode,
    pub err: Option<Arc<SessionError>>,

    /// Bumped on every publish.
    pub revision: u64,

    /// Set on the final publish, once the writer has stopped.
    pub closed: bool,
}

impl Session {
    /// Empty session.
    pub fn new(id: impl Into<String>, mode: Mode) -> Self {
        Self {
            id: id.into(),
            mode,
            ..Self::default()
        }
    }
}

/// Subscription to one session.
///
/// The first call to [`SessionStream::next`] yields the latest snapshot;
/// later calls wait for the next publish. Late subscribers never see
/// history, only the most recent value.
pub struct SessionStream {
    id: String,
    rx: watch::Receiver<Session>,
    cancel: CancellationToken,
    primed: bool,
}

impl SessionStream {
    pub(crate) fn new(id: String, rx: watch::Receiver<Session>, cancel: CancellationToken) -> Self {
        Self {
            id,
            rx,
            cancel,
            primed: false,
        }
    }

    /// Session id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Latest snapshot, without waiting.
    pub fn current(&self) -> Session {
        self.rx.borrow().clone()
    }

    /// Next snapshot; `None` once cancelled or the session is dropped.
    pub async fn next(&mut self) -> Option<Session> {
        if self.cancel.is_cancelled() {
            return None;
        }
        if !self.primed {
            self.primed = true;
            return Some(self.rx.borrow_and_update().clone());
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            changed = self.rx.changed() => match changed {
                Ok(()) => Some(self.rx.borrow_and_update().clone()),
                Err(_) => None,
            },
        }
    }

    /// Wait until the writer has stopped and return the final snapshot.
    pub async fn closed(&mut self) -> Option<Session> {
        loop {
            let session = self.next().await?;
            if session.closed {
                return Some(session);
            }
        }
    }
}

/// Follows whichever session is currently sensing.
///
/// When the coordinator switches to a different sensing session the stream
/// re-subscribes on its own; while no session is sensing it waits.
pub struct SensingSessionStream {
    coordinator: SessionCoordinator,
    status: watch::Receiver<CoordinatorStatus>,
    current: Option<SessionStream>,
    cancel: CancellationToken,
}

impl SensingSessionStream {
    pub(crate) fn new(coordinator: SessionCoordinator, cancel: CancellationToken) -> Self {
        let status = coordinator.status();
        Self {
            coordinator,
            status,
            current: None,
            cancel,
        }
    }

    /// Next snapshot of the active sensing session.
    pub async fn next(&mut self) -> Option<Session> {
        loop {
            let wanted = self.status.borrow_and_update().sensing_id.clone();
            let current = self.current.as_ref().map(|s| s.id().to_string());
            if wanted != current {
                self.current = wanted.and_then(|id| {
                    tracing::debug!("Following sensing session {}", id);
                    self.coordinator.stream_session(self.cancel.clone(), &id)
                });
            }

            match self.current.as_mut() {
                Some(stream) => {
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return None,
                        session = stream.next() => match session {
                            Some(session) => return Some(session),
                            None => self.current = None,
                        },
                        changed = self.status.changed() => {
                            if changed.is_err() {
                                return None;
                            }
                        }
                    }
                }
                None => {
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return None,
                        changed = self.status.changed() => {
                            if changed.is_err() {
                                return None;
                            }
                        }
                    }
                }
            }
        }
    }
}

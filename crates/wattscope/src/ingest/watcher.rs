// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Change notifications for a trace file being tailed.

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

/// Wakes the tailing loop when the watched file changes.
///
/// Notifications are coalesced: any number of change events between two
/// waits produce a single wakeup.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    changes: mpsc::Receiver<()>,
    path: PathBuf,
}

impl FileWatcher {
    /// Start watching `path`.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, notify::Error> {
        let path = path.as_ref().to_path_buf();
        let (tx, rx) = mpsc::channel(1);

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        // Full means a wakeup is already pending.
                        let _ = tx.try_send(());
                    }
                }
                Err(e) => tracing::warn!("File watch error: {}", e),
            }
        })?;

        watcher.watch(&path, RecursiveMode::NonRecursive)?;
        tracing::debug!("Watching {} for appends", path.display());

        Ok(Self {
            _watcher: watcher,
            changes: rx,
            path,
        })
    }

    /// Wait for the next change.
    ///
    /// Returns `false` if the watcher backend stopped delivering events.
    pub async fn changed(&mut self) -> bool {
        self.changes.recv().await.is_some()
    }

    /// Watched path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

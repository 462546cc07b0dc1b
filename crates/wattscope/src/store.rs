// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Benchmark result log.
//!
//! One pretty-printed JSON array per session. Updates are written to
//! `<name>.tmp` and synced first; the live file is then renamed to
//! `<name>.old`, the temp file renamed over the live name, and the backup
//! removed. On the next access a backup left behind by a crash is restored
//! when the live file is missing or unreadable. A log that fails to parse
//! with no usable backup is moved aside to `<name>.corrupt` and a fresh log
//! started.
//!
//! Appends through one store (and its clones) are serialized, so concurrent
//! benchmark runs never drop each other's results.

use crate::benchmark::BenchmarkData;
use crate::config::Config;
use parking_lot::Mutex;
use std::ffi::OsString;
use std::fs::File;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Result store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid benchmark log {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to back up {path}, log left untouched: {source}")]
    Backup {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to encode benchmark log: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Per-session benchmark logs under one directory.
#[derive(Debug, Clone)]
pub struct BenchmarkStore {
    config: Config,
    /// Held across every read-modify-write of a log.
    lock: Arc<Mutex<()>>,
}

impl BenchmarkStore {
    /// Store rooted at the configured output directory.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Log file for a session.
    pub fn path_for(&self, session_id: &str) -> PathBuf {
        self.config.benchmark_file(session_id)
    }

    /// Append one result to its session's log.
    pub fn append(&self, data: &BenchmarkData) -> Result<PathBuf, StoreError> {
        let _guard = self.lock.lock();
        let path = self.path_for(&data.session_id);

        let (mut entries, exists) = read_log(&path)?;
        entries.push(data.clone());
        let encoded = serde_json::to_vec_pretty(&entries)?;

        let tmp = with_suffix(&path, ".tmp");
        write_synced(&tmp, &encoded)?;

        let backup = with_suffix(&path, ".old");
        if exists {
            if let Err(source) = std::fs::rename(&path, &backup) {
                let _ = std::fs::remove_file(&tmp);
                return Err(StoreError::Backup { path, source });
            }
        }

        std::fs::rename(&tmp, &path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;

        if exists {
            if let Err(e) = std::fs::remove_file(&backup) {
                tracing::warn!("Failed to remove backup {}: {}", backup.display(), e);
            }
        }

        tracing::info!(
            "Saved benchmark {} ({} in log) to {}",
            data.benchmark_id,
            entries.len(),
            path.display()
        );
        Ok(path)
    }

    /// Read a session's log; a missing log is empty.
    pub fn load(&self, session_id: &str) -> Result<Vec<BenchmarkData>, StoreError> {
        let _guard = self.lock.lock();
        let path = self.path_for(session_id);
        restore_backup(&path);
        match std::fs::read(&path) {
            Ok(bytes) => decode(&path, &bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    /// Read any benchmark log file.
    pub fn load_path(path: impl AsRef<Path>) -> Result<Vec<BenchmarkData>, StoreError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        decode(path, &bytes)
    }
}

/// Current entries of a log and whether a live file holds them.
///
/// An unreadable live file is quarantined; its entries come from the
/// `.old` backup when that parses, otherwise the log starts empty.
fn read_log(path: &Path) -> Result<(Vec<BenchmarkData>, bool), StoreError> {
    restore_backup(path);

    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok((Vec::new(), false)),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let err = match decode(path, &bytes) {
        Ok(entries) => return Ok((entries, true)),
        Err(err) => err,
    };
    tracing::warn!("{}", err);

    let backup = with_suffix(path, ".old");
    let recovered = std::fs::read(&backup)
        .ok()
        .and_then(|bytes| decode(&backup, &bytes).ok());
    quarantine(path)?;

    match recovered {
        Some(entries) => {
            tracing::warn!(
                "Recovered {} benchmarks of {} from {}",
                entries.len(),
                path.display(),
                backup.display()
            );
            if let Err(e) = std::fs::remove_file(&backup) {
                tracing::warn!("Failed to remove backup {}: {}", backup.display(), e);
            }
            Ok((entries, false))
        }
        None => Ok((Vec::new(), false)),
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let io_error = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::create(path).map_err(io_error)?;
    file.write_all(bytes).map_err(io_error)?;
    file.sync_all().map_err(io_error)
}

fn decode(path: &Path, bytes: &[u8]) -> Result<Vec<BenchmarkData>, StoreError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    serde_json::from_slice(bytes).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn quarantine(path: &Path) -> Result<(), StoreError> {
    let corrupt = with_suffix(path, ".corrupt");
    tracing::warn!(
        "Moving corrupt benchmark log {} to {}",
        path.display(),
        corrupt.display()
    );
    std::fs::rename(path, &corrupt).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Put `<name>.old` back if a previous update died before the swap.
fn restore_backup(path: &Path) {
    let backup = with_suffix(path, ".old");
    if path.exists() || !backup.exists() {
        return;
    }
    match std::fs::rename(&backup, path) {
        Ok(()) => tracing::warn!("Restored benchmark log {} from backup", path.display()),
        Err(e) => tracing::warn!("Failed to restore {}: {}", backup.display(), e),
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &Path) -> BenchmarkStore {
        BenchmarkStore::new(Config::builder().output_dir(dir).build())
    }

    fn result(id: &str) -> BenchmarkData {
        BenchmarkData {
            session_id: "20260101000000000000001".into(),
            benchmark_id: id.into(),
            command: "make".into(),
            pre_baseline_start: 1,
            pre_baseline_end: 2,
            post_baseline_start: 3,
            post_baseline_end: 4,
            ..BenchmarkData::default()
        }
    }

    #[test]
    fn test_append_accumulates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(dir.path());

        let path = store.append(&result("a")).expect("first");
        store.append(&result("b")).expect("second");

        assert_eq!(
            path,
            dir.path()
                .join("wattscope-20260101000000000000001-benchmarks.json")
        );
        assert!(!with_suffix(&path, ".old").exists());

        let loaded = store.load("20260101000000000000001").expect("load");
        let ids: Vec<&str> = loaded.iter().map(|b| b.benchmark_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(BenchmarkStore::load_path(&path).expect("load path"), loaded);
    }

    #[test]
    fn test_corrupt_log_is_quarantined() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(dir.path());
        let path = store.path_for("20260101000000000000001");
        std::fs::write(&path, "[{ this is not json").expect("write garbage");

        store.append(&result("fresh")).expect("append");

        let corrupt = with_suffix(&path, ".corrupt");
        assert_eq!(
            std::fs::read_to_string(&corrupt).expect("corrupt kept"),
            "[{ this is not json"
        );
        let loaded = BenchmarkStore::load_path(&path).expect("load");
        assert_eq!(loaded, vec![result("fresh")]);
    }

    #[test]
    fn test_backup_restored_after_crash() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(dir.path());
        let path = store.append(&result("a")).expect("append");

        // Crash between backup and write.
        std::fs::rename(&path, with_suffix(&path, ".old")).expect("simulate");

        let loaded = store.load("20260101000000000000001").expect("load");
        assert_eq!(loaded, vec![result("a")]);
        assert!(path.exists());

        store.append(&result("b")).expect("append");
        assert_eq!(
            store.load("20260101000000000000001").expect("load").len(),
            2
        );
    }

    #[test]
    fn test_missing_log_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(dir.path());
        assert!(store.load("nope").expect("load").is_empty());
        assert!(matches!(
            BenchmarkStore::load_path(dir.path().join("nope.json")),
            Err(StoreError::Io { .. })
        ));
    }

    #[test]
    fn test_load_path_rejects_garbage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("log.json");
        std::fs::write(&path, "{}").expect("write");
        assert!(matches!(
            BenchmarkStore::load_path(&path),
            Err(StoreError::Json { .. })
        ));
    }

    #[test]
    fn test_concurrent_appends_all_survive() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(dir.path());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..10 {
                        store
                            .append(&result(&format!("t{}-{}", t, i)))
                            .expect("append");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread");
        }

        let loaded = store.load("20260101000000000000001").expect("load");
        assert_eq!(loaded.len(), 80);
        let mut ids: Vec<String> = loaded.into_iter().map(|b| b.benchmark_id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 80);
    }

    #[test]
    fn test_torn_write_recovers_from_backup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(dir.path());
        store.append(&result("a")).expect("append");
        let path = store.append(&result("b")).expect("append");

        // Crash halfway through writing the new contents.
        let backup = with_suffix(&path, ".old");
        std::fs::rename(&path, &backup).expect("backup");
        std::fs::write(&path, "[\n  {\n    \"session_id\": \"2026").expect("torn");

        store.append(&result("c")).expect("append");

        let ids: Vec<String> = store
            .load("20260101000000000000001")
            .expect("load")
            .into_iter()
            .map(|b| b.benchmark_id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(!backup.exists());
        assert!(with_suffix(&path, ".corrupt").exists());
        assert!(!with_suffix(&path, ".tmp").exists());
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Baseline-corrected benchmarking.
//!
//! A benchmark run measures a quiet baseline, runs a command, then measures
//! a second baseline. The energy attributed to the command is what the
//! sensors recorded while it ran, minus the average of the two baselines.

mod analyzer;
mod runner;
mod series;

pub use analyzer::{ResultSet, Section, SessionUpdates, Stat};
pub use runner::Benchmarker;
pub use series::BenchmarkSeries;

use crate::session::SessionError;
use crate::store::StoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Benchmark errors.
#[derive(Debug, Error)]
pub enum BenchmarkError {
    #[error("Empty command")]
    EmptyCommand,

    #[error("A benchmark of {0:?} is already running")]
    AlreadyRunning(String),

    #[error("Failed to start {command:?}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("{command:?} exited with {status}")]
    CommandFailed { command: String, status: String },

    #[error("Session {0} ended before its data covered the benchmark")]
    MissingData(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Progress of a benchmark run, derived from which timestamps are set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NotStarted,
    RunningPreBaseline,
    RunningCommand,
    RunningPostBaseline,
    Done,
    Error,
}

/// One benchmark run.
///
/// Timestamps are Unix nanoseconds; zero means "not reached yet".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkData {
    pub session_id: String,
    pub benchmark_id: String,
    pub command: String,
    pub notes: String,
    pub pre_baseline_start: i64,
    pub pre_baseline_end: i64,
    pub post_baseline_start: i64,
    pub post_baseline_end: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,

    /// Computed once the post-baseline ends; never persisted.
    #[serde(skip)]
    pub results: Option<ResultSet>,
}

impl BenchmarkData {
    /// Current phase.
    pub fn phase(&self) -> Phase {
        if self.err.is_some() {
            Phase::Error
        } else if self.pre_baseline_start == 0 {
            Phase::NotStarted
        } else if self.pre_baseline_end == 0 {
            Phase::RunningPreBaseline
        } else if self.post_baseline_start == 0 {
            Phase::RunningCommand
        } else if self.post_baseline_end == 0 {
            Phase::RunningPostBaseline
        } else {
            Phase::Done
        }
    }

    /// Command runtime in nanoseconds.
    pub fn run_duration_ns(&self) -> i64 {
        self.post_baseline_start - self.pre_baseline_end
    }
}

/// Short random id distinguishing benchmarks of one session.
pub fn random_id() -> String {
    (0..6).map(|_| fastrand::alphanumeric()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_progression() {
        let mut data = BenchmarkData::default();
        assert_eq!(data.phase(), Phase::NotStarted);

        data.pre_baseline_start = 10;
        assert_eq!(data.phase(), Phase::RunningPreBaseline);
        data.pre_baseline_end = 20;
        assert_eq!(data.phase(), Phase::RunningCommand);
        data.post_baseline_start = 50;
        assert_eq!(data.phase(), Phase::RunningPostBaseline);
        data.post_baseline_end = 60;
        assert_eq!(data.phase(), Phase::Done);
        assert_eq!(data.run_duration_ns(), 30);

        data.err = Some("boom".to_string());
        assert_eq!(data.phase(), Phase::Error);
    }

    #[test]
    fn test_results_not_serialized() {
        let data = BenchmarkData {
            session_id: "s".into(),
            benchmark_id: "b".into(),
            command: "sleep 1".into(),
            results: Some(ResultSet::default()),
            ..BenchmarkData::default()
        };

        let json = serde_json::to_string(&data).expect("serialize");
        assert!(!json.contains("results"));
        assert!(!json.contains("err"));

        let back: BenchmarkData = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.command, "sleep 1");
        assert!(back.results.is_none());
    }

    #[test]
    fn test_random_ids() {
        let a = random_id();
        assert_eq!(a.len(), 6);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Benchmark statistics.

use super::BenchmarkData;
use crate::sensors::NANOS_PER_SEC;
use crate::series::DataSeries;
use crate::session::{SensingSessionStream, Session, SessionStream};
use std::future::Future;
use std::time::Duration;

/// Row group of a [`ResultSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    PreBaseline = 0,
    Run = 1,
    PostBaseline = 2,
    /// Run window with the baseline subtracted.
    Adjusted = 3,
}

/// Column of a [`ResultSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stat {
    Sum = 0,
    Min = 1,
    Max = 2,
    Mean = 3,
}

/// Statistics of one benchmark.
///
/// `stats` is a row-major grid of `rows x cols`: one row per section and
/// series (`section * series.len() + series_index`), one column per
/// [`Stat`]. Sums are Joules, the other columns Watts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub stats: Vec<f64>,
    pub series: Vec<String>,
    pub rows: usize,
    pub cols: usize,

    /// Baseline-corrected energy per series.
    pub summary_joules: Vec<f64>,

    /// Baseline-corrected mean power per series.
    pub summary_watts: Vec<f64>,

    /// Command runtime.
    pub summary_duration: Duration,
}

impl ResultSet {
    pub const SECTIONS: usize = 4;
    pub const COLS: usize = 4;

    /// One cell of the grid.
    pub fn get(&self, section: Section, series: usize, stat: Stat) -> f64 {
        let row = section as usize * self.series.len() + series;
        self.stats[row * self.cols + stat as usize]
    }
}

/// Source of session snapshots to retry against.
pub trait SessionUpdates: Send {
    /// Wait for the next snapshot; `None` once no more will come.
    fn next_session(&mut self) -> impl Future<Output = Option<Session>> + Send;
}

impl SessionUpdates for SessionStream {
    fn next_session(&mut self) -> impl Future<Output = Option<Session>> + Send {
        self.next()
    }
}

impl SessionUpdates for SensingSessionStream {
    fn next_session(&mut self) -> impl Future<Output = Option<Session>> + Send {
        self.next()
    }
}

impl BenchmarkData {
    /// Compute results from the data currently in `session`.
    ///
    /// Returns false if any series lacks data for one of the windows; the
    /// caller retries once more data has arrived.
    pub fn attempt_compute_results(&mut self, session: &Session) -> bool {
        let series = session.data.series();
        if series.is_empty() {
            return false;
        }

        let count = series.len();
        let cols = ResultSet::COLS;
        let rows = ResultSet::SECTIONS * count;
        let mut stats = vec![0.0; rows * cols];
        let mut baselines = vec![0.0; count];

        let windows = [
            (Section::PreBaseline, self.pre_baseline_start, self.pre_baseline_end),
            (Section::Run, self.pre_baseline_end, self.post_baseline_start),
            (Section::PostBaseline, self.post_baseline_start, self.post_baseline_end),
        ];

        for (section, start, end) in windows {
            for (i, s) in series.iter().enumerate() {
                let Some(rates) = s.rates_between(start, end) else {
                    tracing::trace!(
                        "Benchmark {}: no data yet for {} in {:?}",
                        self.benchmark_id,
                        s.name(),
                        section
                    );
                    return false;
                };

                let mut cells = vec![(section, rates)];
                match section {
                    Section::PreBaseline | Section::PostBaseline => baselines[i] += rates.mean * 0.5,
                    Section::Run => cells.push((Section::Adjusted, rates)),
                    Section::Adjusted => {}
                }
                for (section, rates) in cells {
                    let offset = (section as usize * count + i) * cols;
                    stats[offset + Stat::Sum as usize] = rates.sum;
                    stats[offset + Stat::Min as usize] = rates.min;
                    stats[offset + Stat::Max as usize] = rates.max;
                    stats[offset + Stat::Mean as usize] = rates.mean;
                }
            }
        }

        let run_secs = self.run_duration_ns() as f64 / NANOS_PER_SEC;
        let mut summary_joules = Vec::with_capacity(count);
        let mut summary_watts = Vec::with_capacity(count);
        for (i, baseline) in baselines.into_iter().enumerate() {
            let offset = (Section::Adjusted as usize * count + i) * cols;
            stats[offset + Stat::Sum as usize] -= baseline * run_secs;
            stats[offset + Stat::Min as usize] -= baseline;
            stats[offset + Stat::Max as usize] -= baseline;
            stats[offset + Stat::Mean as usize] -= baseline;
            summary_joules.push(stats[offset + Stat::Sum as usize]);
            summary_watts.push(stats[offset + Stat::Mean as usize]);
        }

        self.results = Some(ResultSet {
            stats,
            series: session.data.headings(),
            rows,
            cols,
            summary_joules,
            summary_watts,
            summary_duration: Duration::from_nanos(self.run_duration_ns().max(0) as u64),
        });
        true
    }

    /// Compute results, retrying on every update from `updates` until the
    /// data covers all windows.
    ///
    /// Returns false if the updates end (cancellation, or the session closed
    /// without ever covering the benchmark).
    pub async fn compute_results<U: SessionUpdates>(
        &mut self,
        latest: &Session,
        updates: &mut U,
    ) -> bool {
        if self.attempt_compute_results(latest) {
            return true;
        }
        if latest.closed {
            return false;
        }

        while let Some(session) = updates.next_session().await {
            if self.attempt_compute_results(&session) {
                return true;
            }
            if session.closed {
                return false;
            }
        }
        false
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Baseline-adjusted view of a series for one benchmark.

use super::BenchmarkData;
use crate::sensors::NANOS_PER_SEC;
use crate::series::{DataSeries, RateStats};

/// A series seen through one benchmark: time zero is the start of the
/// pre-baseline and the baseline rate is subtracted from every figure, so
/// runs recorded at different times line up side by side.
#[derive(Debug, Clone)]
pub struct BenchmarkSeries<S> {
    wrapped: S,
    benchmark: BenchmarkData,
    baseline_rate: f64,
    adjusted_sum: f64,
}

impl<S: DataSeries> BenchmarkSeries<S> {
    /// Wrap `series` for `benchmark`.
    ///
    /// Windows without data contribute zero to the baseline.
    pub fn new(series: S, benchmark: BenchmarkData) -> Self {
        let mean = |a, b| series.rates_between(a, b).map_or(0.0, |r| r.mean);
        let pre = mean(benchmark.pre_baseline_start, benchmark.pre_baseline_end);
        let post = mean(benchmark.post_baseline_start, benchmark.post_baseline_end);
        let baseline_rate = (pre + post) / 2.0;

        let total = series
            .rates_between(benchmark.pre_baseline_start, benchmark.post_baseline_end)
            .map_or(0.0, |r| r.sum);
        let span = (benchmark.post_baseline_end - benchmark.pre_baseline_start) as f64;
        let adjusted_sum = total - span * baseline_rate / NANOS_PER_SEC;

        Self {
            wrapped: series,
            benchmark,
            baseline_rate,
            adjusted_sum,
        }
    }

    /// Average of the pre- and post-baseline rates (W).
    pub fn baseline_rate(&self) -> f64 {
        self.baseline_rate
    }

    /// Benchmark this view belongs to.
    pub fn benchmark(&self) -> &BenchmarkData {
        &self.benchmark
    }
}

impl<S: DataSeries> DataSeries for BenchmarkSeries<S> {
    fn name(&self) -> String {
        format!("{} {}", self.benchmark.benchmark_id, self.wrapped.name())
    }

    fn initialized(&self) -> bool {
        self.wrapped.initialized()
    }

    fn domain(&self) -> (i64, i64) {
        (
            0,
            self.benchmark.post_baseline_end - self.benchmark.pre_baseline_start,
        )
    }

    fn rates_between(&self, a: i64, b: i64) -> Option<RateStats> {
        if a <= 0 && b <= 0 {
            return None;
        }
        let a = a + self.benchmark.pre_baseline_start;
        let b = b + self.benchmark.pre_baseline_start;
        let rates = self.wrapped.rates_between(a, b)?;

        let window_secs = (b - a).abs() as f64 / NANOS_PER_SEC;
        Some(RateStats {
            max: rates.max - self.baseline_rate,
            mean: rates.mean - self.baseline_rate,
            min: rates.min - self.baseline_rate,
            sum: rates.sum - self.baseline_rate * window_secs,
        })
    }

    fn sum(&self) -> f64 {
        self.adjusted_sum
    }

    fn rate_range(&self) -> (f64, f64) {
        let (min, max) = self.wrapped.rate_range();
        (min - self.baseline_rate, max - self.baseline_rate)
    }
}

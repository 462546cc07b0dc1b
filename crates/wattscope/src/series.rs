// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-sensor interval store.
//!
//! A [`Series`] keeps the samples of one sensor as three parallel arrays
//! (start, end, energy quantity). Intervals are appended in time order and
//! never overlap, so range queries are two binary searches plus a walk over
//! the samples in between.
//!
//! # Query semantics
//!
//! `rates_between(a, b)` covers the half-open window `[a, b)`:
//!
//! - samples partially inside the window contribute the covered fraction of
//!   their energy
//! - `mean` is energy divided by the covered time (the window length when the
//!   data is contiguous)
//! - `max`/`min` are the instantaneous rates of the contributing samples
//! - a window wholly inside a gap, before the data, or extending past the last
//!   stored end yields `None`
//!
//! ```text
//!   [0,1000)=1J      [2000,3000)=3J      [4000,5000)=5J
//!   |====|    gap    |=========|   gap   |====|
//!     [500 ... 1500)                      -> 1e6 W (only [500,1000) covered)
//!           [1000, 2000)                  -> None
//! ```

use crate::sample::Sample;
use crate::sensors::NANOS_PER_SEC;
use parking_lot::RwLock;
use std::sync::Arc;

/// Statistics over a query window.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RateStats {
    /// Highest instantaneous rate (W) among contributing samples.
    pub max: f64,
    /// Energy over covered time (W).
    pub mean: f64,
    /// Lowest instantaneous rate (W) among contributing samples.
    pub min: f64,
    /// Energy within the window (J).
    pub sum: f64,
}

/// Read surface shared by stored series and derived views.
pub trait DataSeries: Send + Sync {
    /// Display name (the trace column label).
    fn name(&self) -> String;

    /// True once at least one sample has been inserted.
    fn initialized(&self) -> bool;

    /// Earliest start and latest end seen, in nanoseconds.
    fn domain(&self) -> (i64, i64);

    /// Rate statistics over `[a, b)`, or `None` if the window is not covered.
    fn rates_between(&self, a: i64, b: i64) -> Option<RateStats>;

    /// Total energy stored (J).
    fn sum(&self) -> f64;

    /// All-time `(min, max)` instantaneous rate (W).
    fn rate_range(&self) -> (f64, f64);
}

/// Append-only interval store for one sensor.
#[derive(Debug, Clone, Default)]
pub struct Series {
    name: String,
    start_ns: Vec<i64>,
    end_ns: Vec<i64>,
    /// Energy quantity per sample, in Joules.
    values: Vec<f64>,
    rate_min: f64,
    rate_max: f64,
    domain_min: i64,
    domain_max: i64,
    sum: f64,
    initialized: bool,
}

impl Series {
    /// Create an empty series.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Series name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of stored samples.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if no sample has been stored.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True once at least one sample has been stored.
    pub fn initialized(&self) -> bool {
        self.initialized
    }

    /// `(earliest start, latest end)` in nanoseconds.
    pub fn domain(&self) -> (i64, i64) {
        (self.domain_min, self.domain_max)
    }

    /// All-time `(min, max)` instantaneous rate.
    pub fn rate_range(&self) -> (f64, f64) {
        (self.rate_min, self.rate_max)
    }

    /// Total stored energy (J).
    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Append a sample.
    ///
    /// Returns `false` without touching the series if the sample starts
    /// before the end of the last stored sample, has an empty interval, or
    /// carries a unit with no energy quantity.
    pub fn insert(&mut self, sample: &Sample) -> bool {
        if let Some(&last_end) = self.end_ns.last() {
            if last_end > sample.start_ns {
                return false;
            }
        }
        if sample.end_ns <= sample.start_ns {
            return false;
        }
        let (Some(quantity), Some(rate)) = (sample.quantity(), sample.rate()) else {
            return false;
        };

        if self.initialized {
            self.domain_min = self.domain_min.min(sample.start_ns);
            self.domain_max = self.domain_max.max(sample.end_ns);
            self.rate_max = self.rate_max.max(rate);
            self.rate_min = self.rate_min.min(rate);
        } else {
            self.domain_min = sample.start_ns;
            self.domain_max = sample.end_ns;
            self.rate_max = rate;
            self.rate_min = rate;
            self.initialized = true;
        }

        self.start_ns.push(sample.start_ns);
        self.end_ns.push(sample.end_ns);
        self.values.push(quantity);
        self.sum += quantity;
        true
    }

    /// Rate statistics over the half-open window `[a, b)`.
    ///
    /// The bounds are swapped if `b < a`.
    pub fn rates_between(&self, a: i64, b: i64) -> Option<RateStats> {
        let len = self.end_ns.len();
        if len == 0 {
            return None;
        }
        let (a, b) = if b < a { (b, a) } else { (a, b) };

        // First sample ending after each bound.
        let index_a = self.end_ns.partition_point(|&end| end <= a);
        if index_a == len {
            return None;
        }
        let mut index_b = self.end_ns.partition_point(|&end| end <= b);
        if index_b == len {
            if b > self.end_ns[len - 1] {
                return None;
            }
            // b sits exactly on the final end
            index_b -= 1;
        }

        if index_a == index_b {
            return self.single_sample_rates(index_a, a, b);
        }

        let mut total = 0.0;
        let mut covered_ns = 0i64;
        let mut extrema: Option<(f64, f64)> = None;
        for i in index_a..=index_b {
            let start = self.start_ns[i];
            let end = self.end_ns[i];
            let covered = end.min(b) - start.max(a);
            if covered <= 0 {
                continue;
            }
            let interval = (end - start) as f64;
            let mut quantity = self.values[i];
            if covered < end - start {
                quantity *= covered as f64 / interval;
            }
            let rate = self.values[i] / (interval / NANOS_PER_SEC);

            total += quantity;
            covered_ns += covered;
            extrema = Some(match extrema {
                Some((max, min)) => (max.max(rate), min.min(rate)),
                None => (rate, rate),
            });
        }

        let (max, min) = extrema?;
        Some(RateStats {
            max,
            mean: total / (covered_ns as f64 / NANOS_PER_SEC),
            min,
            sum: total,
        })
    }

    fn single_sample_rates(&self, index: usize, a: i64, b: i64) -> Option<RateStats> {
        let start = self.start_ns[index];
        let end = self.end_ns[index];
        let covered = end.min(b) - start.max(a);
        if covered < 0 || (covered == 0 && a < b) {
            return None;
        }
        let value = self.values[index];
        let interval = (end - start) as f64;
        let rate = value / (interval / NANOS_PER_SEC);
        Some(RateStats {
            max: rate,
            mean: rate,
            min: rate,
            sum: value * (covered as f64 / interval),
        })
    }
}

/// Shared, lock-protected handle to a [`Series`].
///
/// Cloning the handle is cheap; session snapshots hold handles so queries run
/// concurrently with the writer appending samples.
#[derive(Debug, Clone, Default)]
pub struct SeriesHandle {
    inner: Arc<RwLock<Series>>,
}

impl SeriesHandle {
    /// Wrap a new empty series.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Series::new(name))),
        }
    }

    /// Append a sample (see [`Series::insert`]).
    pub fn insert(&self, sample: &Sample) -> bool {
        self.inner.write().insert(sample)
    }

    /// Number of stored samples.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// True if no sample has been stored.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

impl DataSeries for SeriesHandle {
    fn name(&self) -> String {
        self.inner.read().name().to_string()
    }

    fn initialized(&self) -> bool {
        self.inner.read().initialized()
    }

    fn domain(&self) -> (i64, i64) {
        self.inner.read().domain()
    }

    fn rates_between(&self, a: i64, b: i64) -> Option<RateStats> {
        self.inner.read().rates_between(a, b)
    }

    fn sum(&self) -> f64 {
        self.inner.read().sum()
    }

    fn rate_range(&self) -> (f64, f64) {
        self.inner.read().rate_range()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::Unit;

    fn joules(start_ns: i64, end_ns: i64, value: f64) -> Sample {
        Sample {
            start_ns,
            end_ns,
            series: 0,
            value,
            unit: Unit::Joules,
        }
    }

    #[test]
    fn test_half_windows_conserve_energy() {
        let mut s = Series::new("cpu (J)");
        let interval = 1000i64;
        let sample_count = 10i64;
        let mut expected_sum = 0.0;
        for i in 0..sample_count {
            let inserted = s.insert(&joules(i * interval, (i + 1) * interval, i as f64));
            assert!(inserted, "non-overlapping sample {} rejected", i);
            expected_sum += i as f64;
        }

        let half = interval / 2;
        let mut sum = 0.0;
        for i in 0..sample_count * 2 {
            let stats = s
                .rates_between(i * half, (i + 1) * half)
                .unwrap_or_else(|| panic!("window {} should be covered", i));
            assert_eq!(stats.min, stats.mean, "window {}", i);
            assert_eq!(stats.mean, stats.max, "window {}", i);
            sum += stats.mean * (half as f64 / NANOS_PER_SEC);
        }
        assert_eq!(sum, expected_sum);
        assert_eq!(s.sum(), 45.0);
    }

    #[test]
    fn test_overlapping_insert_rejected() {
        let mut s = Series::new("cpu (J)");
        assert!(s.insert(&joules(0, 1000, 1.0)));
        assert!(s.insert(&joules(1000, 2000, 2.0)));

        let before = s.clone();
        assert!(!s.insert(&joules(1500, 2500, 3.0)));
        assert!(!s.insert(&joules(0, 500, 3.0)));
        assert_eq!(s.len(), before.len());
        assert_eq!(s.sum(), before.sum());
        assert_eq!(s.domain(), before.domain());
        assert_eq!(s.rate_range(), before.rate_range());
    }

    #[test]
    fn test_empty_and_non_energy_samples_rejected() {
        let mut s = Series::new("rail");
        assert!(!s.insert(&joules(100, 100, 1.0)));
        let volts = Sample {
            unit: Unit::Volts,
            ..joules(0, 1000, 12.0)
        };
        assert!(!s.insert(&volts));
        assert!(!s.initialized());
        assert!(s.is_empty());
    }

    #[test]
    fn test_watts_stored_as_energy() {
        let mut s = Series::new("gpu (W)");
        let watts = Sample {
            unit: Unit::Watts,
            ..joules(0, 2_000_000_000, 10.0)
        };
        assert!(s.insert(&watts));
        assert_eq!(s.sum(), 20.0);
        assert_eq!(s.rate_range(), (10.0, 10.0));
    }

    #[test]
    fn test_single_sample_query() {
        let mut s = Series::new("cpu (J)");
        s.insert(&joules(0, 1_000_000_000, 4.0));
        s.insert(&joules(1_000_000_000, 2_000_000_000, 8.0));

        let stats = s.rates_between(250_000_000, 750_000_000).expect("covered");
        assert_eq!(stats.max, 4.0);
        assert_eq!(stats.mean, 4.0);
        assert_eq!(stats.min, 4.0);
        assert_eq!(stats.sum, 2.0);
    }

    #[test]
    fn test_reversed_bounds_are_swapped() {
        let mut s = Series::new("cpu (J)");
        s.insert(&joules(0, 1_000_000_000, 4.0));
        s.insert(&joules(1_000_000_000, 2_000_000_000, 8.0));

        let forward = s.rates_between(500_000_000, 1_500_000_000);
        let reverse = s.rates_between(1_500_000_000, 500_000_000);
        assert_eq!(forward, reverse);
        let stats = forward.expect("covered");
        assert_eq!(stats.sum, 6.0);
        assert_eq!(stats.mean, 6.0);
        assert_eq!(stats.max, 8.0);
        assert_eq!(stats.min, 4.0);
    }

    #[test]
    fn test_out_of_range_queries() {
        let mut s = Series::new("cpu (J)");
        assert_eq!(s.rates_between(0, 10), None);

        s.insert(&joules(1000, 2000, 1.0));
        s.insert(&joules(2000, 3000, 1.0));
        assert_eq!(s.rates_between(0, 500), None);
        assert_eq!(s.rates_between(3000, 4000), None);
        assert_eq!(s.rates_between(5000, 6000), None);
        // Extends past the stored data: not available yet.
        assert_eq!(s.rates_between(2500, 3500), None);
        // Ends exactly on the final boundary.
        let stats = s.rates_between(2500, 3000).expect("covered");
        assert_eq!(stats.sum, 0.5);
    }

    #[test]
    fn test_gap_semantics() {
        struct Expectation {
            start: i64,
            end: i64,
            stats: Option<(f64, f64, f64)>,
        }

        let mut s = Series::new("cpu (J)");
        s.insert(&joules(0, 1000, 1.0));
        s.insert(&joules(2000, 3000, 3.0));
        s.insert(&joules(4000, 5000, 5.0));

        let cases = [
            Expectation {
                start: 500,
                end: 1500,
                stats: Some((1e6, 1e6, 1e6)),
            },
            Expectation {
                start: 1000,
                end: 2000,
                stats: None,
            },
            Expectation {
                start: 1500,
                end: 2500,
                stats: Some((3e6, 3e6, 3e6)),
            },
            Expectation {
                start: 500,
                end: 4500,
                stats: Some((5e6, 3e6, 1e6)),
            },
        ];

        for (i, case) in cases.iter().enumerate() {
            let got = s
                .rates_between(case.start, case.end)
                .map(|r| (r.max, r.mean, r.min));
            assert_eq!(got, case.stats, "case {}", i);
        }
    }

    #[test]
    fn test_handle_shares_storage() {
        let handle = SeriesHandle::new("cpu (J)");
        let snapshot = handle.clone();
        assert!(!snapshot.initialized());

        handle.insert(&joules(0, 1000, 1.0));
        assert!(snapshot.initialized());
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.domain(), (0, 1000));
        assert_eq!(snapshot.name(), "cpu (J)");
    }
}

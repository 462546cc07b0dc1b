// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Collection of series belonging to one recording.

use crate::sample::Sample;
use crate::series::{DataSeries, SeriesHandle};
use std::collections::HashMap;

/// Ordered set of series plus the mapping from reader-assigned series ids
/// to local slots.
///
/// Cloning a dataset clones the series handles, not the samples: the clone
/// keeps observing inserts made through the original.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    series: Vec<SeriesHandle>,
    /// Reader series id -> index in `series`.
    mapping: HashMap<u32, usize>,
    domain: Option<(i64, i64)>,
}

impl Dataset {
    /// Create an empty dataset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register headings for newly discovered series.
    ///
    /// May be called repeatedly as sensors appear; ids that are already
    /// registered are ignored.
    pub fn set_headings(&mut self, headings: &[String], ids: &[u32]) {
        for (heading, &id) in headings.iter().zip(ids) {
            if self.mapping.contains_key(&id) {
                tracing::debug!("Series {} already registered as {}", id, heading);
                continue;
            }
            self.mapping.insert(id, self.series.len());
            self.series.push(SeriesHandle::new(heading.clone()));
        }
    }

    /// Route a sample to its series.
    ///
    /// Samples for unregistered ids are logged and dropped. Returns whether
    /// the sample was stored.
    pub fn insert(&mut self, sample: &Sample) -> bool {
        let Some(&index) = self.mapping.get(&sample.series) else {
            tracing::warn!(
                "Dropping sample for unregistered series {} at {}",
                sample.series,
                sample.start_ns
            );
            return false;
        };

        if !self.series[index].insert(sample) {
            tracing::trace!(
                "Series {} rejected overlapping sample [{}, {})",
                sample.series,
                sample.start_ns,
                sample.end_ns
            );
            return false;
        }

        self.domain = Some(match self.domain {
            Some((min, max)) => (min.min(sample.start_ns), max.max(sample.end_ns)),
            None => (sample.start_ns, sample.end_ns),
        });
        true
    }

    /// True once headings are registered and every series holds data.
    pub fn initialized(&self) -> bool {
        !self.series.is_empty() && self.series.iter().all(|s| s.initialized())
    }

    /// Combined `(earliest start, latest end)` over all stored samples.
    pub fn domain(&self) -> (i64, i64) {
        self.domain.unwrap_or((0, 0))
    }

    /// Series names in local order.
    pub fn headings(&self) -> Vec<String> {
        self.series.iter().map(|s| s.name()).collect()
    }

    /// Series handles in local order.
    pub fn series(&self) -> &[SeriesHandle] {
        &self.series
    }

    /// Local slot of a reader series id.
    pub fn local_index(&self, id: u32) -> Option<usize> {
        self.mapping.get(&id).copied()
    }

    /// Number of series.
    pub fn len(&self) -> usize {
        self.series.len()
    }

    /// True if no series is registered.
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::Unit;

    fn sample(series: u32, start_ns: i64, end_ns: i64) -> Sample {
        Sample {
            start_ns,
            end_ns,
            series,
            value: 1.0,
            unit: Unit::Joules,
        }
    }

    #[test]
    fn test_headings_map_external_ids() {
        let mut ds = Dataset::new();
        ds.set_headings(&["a (J)".into(), "b (W)".into()], &[7, 9]);

        assert_eq!(ds.headings(), vec!["a (J)", "b (W)"]);
        assert_eq!(ds.local_index(7), Some(0));
        assert_eq!(ds.local_index(9), Some(1));
        assert_eq!(ds.local_index(8), None);
    }

    #[test]
    fn test_headings_extend_mid_stream() {
        let mut ds = Dataset::new();
        ds.set_headings(&["a (J)".into()], &[1]);
        assert!(ds.insert(&sample(1, 0, 100)));

        ds.set_headings(&["b (J)".into()], &[2]);
        ds.set_headings(&["a again (J)".into()], &[1]);
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.series()[0].len(), 1);
        assert!(!ds.initialized());

        assert!(ds.insert(&sample(2, 100, 200)));
        assert!(ds.initialized());
        assert_eq!(ds.domain(), (0, 200));
    }

    #[test]
    fn test_unmapped_sample_dropped() {
        let mut ds = Dataset::new();
        ds.set_headings(&["a (J)".into()], &[1]);
        assert!(!ds.insert(&sample(42, 0, 100)));
        assert!(!ds.initialized());
        assert_eq!(ds.domain(), (0, 0));
    }

    #[test]
    fn test_clone_observes_inserts() {
        let mut ds = Dataset::new();
        ds.set_headings(&["a (J)".into()], &[1]);
        let snapshot = ds.clone();

        ds.insert(&sample(1, 0, 100));
        assert!(snapshot.initialized());
        assert_eq!(snapshot.series()[0].sum(), 1.0);
    }
}

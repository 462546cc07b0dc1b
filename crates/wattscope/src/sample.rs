// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Interval samples.

use crate::sensors::{Unit, NANOS_PER_SEC};
use serde::{Deserialize, Serialize};

/// One sensor reading spanning `[start_ns, end_ns)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Interval start (Unix nanoseconds).
    pub start_ns: i64,

    /// Interval end (Unix nanoseconds, exclusive).
    pub end_ns: i64,

    /// Series identifier assigned by the ingestion reader.
    pub series: u32,

    /// Reading, interpreted according to `unit`.
    pub value: f64,

    /// Joules (energy over the interval) or Watts (average power).
    pub unit: Unit,
}

impl Sample {
    /// Interval length in nanoseconds.
    pub fn duration_ns(&self) -> i64 {
        self.end_ns - self.start_ns
    }

    /// Interval length in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.duration_ns() as f64 / NANOS_PER_SEC
    }

    /// Energy consumed over the interval, in Joules.
    ///
    /// `None` for units that carry no energy.
    pub fn quantity(&self) -> Option<f64> {
        match self.unit {
            Unit::Joules => Some(self.value),
            Unit::Watts => Some((self.value * self.duration_ns() as f64) / NANOS_PER_SEC),
            Unit::Amps | Unit::Volts => None,
        }
    }

    /// Average power over the interval, in Watts.
    pub fn rate(&self) -> Option<f64> {
        match self.unit {
            Unit::Joules => Some(self.value / self.duration_secs()),
            Unit::Watts => Some(self.value),
            Unit::Amps | Unit::Volts => None,
        }
    }
}

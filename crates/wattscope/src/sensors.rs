// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sensor capability and trace sampling.
//!
//! Platform backends (RAPL, hwmon, NVML, ADLX) live outside this crate; each
//! one is a type implementing [`Sensor`]. The [`TraceSampler`] polls a set of
//! sensors on a fixed interval and writes the CSV trace format understood by
//! [`crate::ingest`].
//!
//! ```text
//! sample start (ns),sample end (ns),package-0 (J),gpu (W),integrated gpu (J)
//! 1700000000000000000,1700000000100000000,1.25,30,3
//! ```

use crate::config::Config;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Nanoseconds per second.
pub const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// Measurement unit reported by a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Unit {
    /// Energy accumulated over the sample interval.
    #[default]
    Joules,
    /// Average power over the sample interval.
    Watts,
    Amps,
    Volts,
}

impl Unit {
    /// Symbol used in trace column labels.
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Joules => "J",
            Self::Watts => "W",
            Self::Amps => "A",
            Self::Volts => "V",
        }
    }

    /// True for units that can be converted into an energy quantity.
    pub fn is_energy(&self) -> bool {
        matches!(self, Self::Joules | Self::Watts)
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Sensor errors.
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Sensor {name} unavailable: {reason}")]
    Unavailable { name: String, reason: String },

    #[error("No sensors to sample")]
    NoSensors,
}

/// A source of readings, implemented once per platform backend.
pub trait Sensor: Send {
    /// Human-readable sensor name, used as the trace column label.
    fn name(&self) -> &str;

    /// Unit of the values returned by [`Sensor::read`].
    fn unit(&self) -> Unit;

    /// Read the value accumulated (or averaged) since the previous read.
    fn read(&mut self) -> Result<f64, SensorError>;
}

/// Sampler statistics.
#[derive(Debug, Clone, Default)]
pub struct SamplerStats {
    /// Rows written to the trace.
    pub rows_written: u64,
    /// Samples dropped because reading the sensors took too long.
    pub rows_dropped: u64,
}

/// Polls sensors and writes CSV trace rows.
pub struct TraceSampler<W: Write> {
    sensors: Vec<Box<dyn Sensor>>,
    writer: csv::Writer<W>,
    readings: Vec<f64>,
    interval: Duration,
    stats: SamplerStats,
}

impl<W: Write> TraceSampler<W> {
    /// Create a sampler writing to `output`.
    pub fn new(
        sensors: Vec<Box<dyn Sensor>>,
        output: W,
        interval: Duration,
    ) -> Result<Self, SensorError> {
        if sensors.is_empty() {
            return Err(SensorError::NoSensors);
        }
        let readings = vec![0.0; sensors.len()];
        Ok(Self {
            sensors,
            writer: csv::Writer::from_writer(output),
            readings,
            interval,
            stats: SamplerStats::default(),
        })
    }

    /// Create a sampler using the configured sample interval.
    pub fn from_config(
        sensors: Vec<Box<dyn Sensor>>,
        output: W,
        config: &Config,
    ) -> Result<Self, SensorError> {
        Self::new(sensors, output, config.sample_interval())
    }

    /// Column labels for the configured sensors.
    pub fn headings(&self) -> Vec<String> {
        let mut headings = vec!["sample start (ns)".to_string(), "sample end (ns)".to_string()];
        for sensor in &self.sensors {
            headings.push(format!("{} ({})", sensor.name(), sensor.unit()));
            if sensor.unit() == Unit::Watts {
                headings.push(format!("integrated {} ({})", sensor.name(), Unit::Joules));
            }
        }
        headings
    }

    /// Write the header row.
    pub fn write_header(&mut self) -> Result<(), SensorError> {
        let headings = self.headings();
        self.writer.write_record(&headings)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Read every sensor once and discard the values.
    ///
    /// Incremental sensors report the delta since the previous read, so the
    /// first real sample needs a reference point.
    pub fn prime(&mut self) -> Result<(), SensorError> {
        for sensor in &mut self.sensors {
            sensor.read()?;
        }
        Ok(())
    }

    /// Read all sensors and write one row covering `[start_ns, end_ns)`.
    ///
    /// `interval_start` is the monotonic time the interval began; a row whose
    /// reads finish two intervals or more after it is dropped. Returns whether
    /// the row was written.
    pub fn record(
        &mut self,
        start_ns: i64,
        end_ns: i64,
        interval_start: Instant,
    ) -> Result<bool, SensorError> {
        for (slot, sensor) in self.readings.iter_mut().zip(self.sensors.iter_mut()) {
            *slot = sensor.read()?;
        }
        let read_elapsed = interval_start.elapsed();

        if read_elapsed >= self.interval * 2 {
            tracing::warn!(
                "Dropping sample with read duration {:?} >= 2x interval {:?}",
                read_elapsed,
                self.interval
            );
            self.stats.rows_dropped += 1;
            return Ok(false);
        }

        let interval_secs = (end_ns - start_ns) as f64 / NANOS_PER_SEC;
        let mut row = vec![start_ns.to_string(), end_ns.to_string()];
        for (value, sensor) in self.readings.iter().zip(self.sensors.iter()) {
            row.push(value.to_string());
            if sensor.unit() == Unit::Watts {
                row.push((value * interval_secs).to_string());
            }
        }
        self.writer.write_record(&row)?;
        self.writer.flush()?;
        self.stats.rows_written += 1;
        Ok(true)
    }

    /// Sample until `cancel` fires, then flush and return the statistics.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<SamplerStats, SensorError> {
        self.write_header()?;
        self.prime()?;

        let mut ticker = tokio::time::interval(self.interval);
        ticker.tick().await;
        let mut last_read = Instant::now();
        let mut last_read_ns = unix_nanos();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                tick = ticker.tick() => {
                    let tick_ns = last_read_ns
                        + tick.into_std().saturating_duration_since(last_read).as_nanos() as i64;
                    self.record(last_read_ns, tick_ns, last_read)?;
                    last_read = tick.into_std();
                    last_read_ns = tick_ns;
                }
            }
        }

        self.writer.flush()?;
        tracing::info!(
            "Sampler stopped: {} rows written, {} dropped",
            self.stats.rows_written,
            self.stats.rows_dropped
        );
        Ok(self.stats)
    }

    /// Get current statistics.
    pub fn stats(&self) -> &SamplerStats {
        &self.stats
    }

    /// Flush and return the underlying writer.
    pub fn into_inner(self) -> Result<W, SensorError> {
        self.writer
            .into_inner()
            .map_err(|e| SensorError::Io(std::io::Error::new(e.error().kind(), e.to_string())))
    }
}

/// Current wall-clock time in Unix nanoseconds.
pub fn unix_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

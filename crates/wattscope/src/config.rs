// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid configuration in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding session traces and benchmark logs
    pub output_dir: PathBuf,

    /// Prefix for every file written to `output_dir`
    pub file_prefix: String,

    /// Capacity of the reader -> writer event queue
    pub channel_capacity: usize,

    /// Sensor executable launched for live sessions
    pub sensor_program: String,

    /// Default duration of each benchmark baseline, in milliseconds
    pub baseline_ms: u64,

    /// Interval between sensor reads, in milliseconds
    pub sample_interval_ms: u64,

    /// Keep tailing replayed files after reaching their end, unless the
    /// caller asks explicitly
    pub follow_replays: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            file_prefix: "wattscope-".to_string(),
            channel_capacity: 1024,
            sensor_program: "wattscope-sensors".to_string(),
            baseline_ms: 5_000,
            sample_interval_ms: 100,
            follow_replays: false,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load a configuration file; missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&data).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Trace file recorded for a session.
    pub fn session_file(&self, session_id: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}{}.csv", self.file_prefix, session_id))
    }

    /// Benchmark log for a session.
    pub fn benchmark_file(&self, session_id: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}{}-benchmarks.json", self.file_prefix, session_id))
    }

    /// Default baseline duration.
    pub fn baseline(&self) -> Duration {
        Duration::from_millis(self.baseline_ms)
    }

    /// Sensor sampling interval.
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

/// Config builder for fluent API
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    output_dir: Option<PathBuf>,
    file_prefix: Option<String>,
    channel_capacity: Option<usize>,
    sensor_program: Option<String>,
    baseline_ms: Option<u64>,
    sample_interval_ms: Option<u64>,
    follow_replays: Option<bool>,
}

impl ConfigBuilder {
    /// Set the output directory
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Set the file prefix
    pub fn file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.file_prefix = Some(prefix.into());
        self
    }

    /// Set the event queue capacity
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = Some(capacity);
        self
    }

    /// Set the sensor executable
    pub fn sensor_program(mut self, program: impl Into<String>) -> Self {
        self.sensor_program = Some(program.into());
        self
    }

    /// Set the default baseline duration
    pub fn baseline(mut self, baseline: Duration) -> Self {
        self.baseline_ms = Some(baseline.as_millis() as u64);
        self
    }

    /// Set the sensor sampling interval
    pub fn sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval_ms = Some(interval.as_millis() as u64);
        self
    }

    /// Keep tailing replayed files (default: true)
    pub fn follow_replays(mut self, follow: bool) -> Self {
        self.follow_replays = Some(follow);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Config {
        let defaults = Config::default();

        Config {
            output_dir: self.output_dir.unwrap_or(defaults.output_dir),
            file_prefix: self.file_prefix.unwrap_or(defaults.file_prefix),
            channel_capacity: self
                .channel_capacity
                .unwrap_or(defaults.channel_capacity)
                .max(1),
            sensor_program: self.sensor_program.unwrap_or(defaults.sensor_program),
            baseline_ms: self.baseline_ms.unwrap_or(defaults.baseline_ms),
            sample_interval_ms: self
                .sample_interval_ms
                .unwrap_or(defaults.sample_interval_ms),
            follow_replays: self.follow_replays.unwrap_or(defaults.follow_replays),
        }
    }
}

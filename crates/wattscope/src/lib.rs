// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! wattscope
//!
//! Storage and query engine for interval-sampled energy telemetry.
//!
//! # Features
//!
//! - **Interval store** -- Append-only per-sensor series answering
//!   min/mean/max/sum queries over arbitrary windows, prorating partially
//!   covered samples
//! - **Live ingestion** -- CSV traces from sensor processes, replayed files, or
//!   files still being written
//! - **Sessions** -- One writer per recording, snapshots fanned out to any
//!   number of subscribers, sensing sessions persisted to CSV
//! - **Benchmarks** -- Baseline-corrected energy of a command, with a durable
//!   JSON result log
//!
//! # Architecture
//!
//! ```text
//! TraceReader --IngestEvent--> SessionWriter --watch--> SessionStream
//!                                   |                        |
//!                              Dataset/Series           Benchmarker --> BenchmarkStore
//! ```
//!
//! # Example
//!
//! ```ignore
//! use wattscope::{Config, DataSeries, SessionCoordinator};
//! use tokio_util::sync::CancellationToken;
//!
//! let coordinator = SessionCoordinator::new(Config::default());
//! let id = coordinator.replay_file("trace.csv", false).await?;
//! let mut stream = coordinator.stream_session(CancellationToken::new(), &id).unwrap();
//! let session = stream.closed().await.unwrap();
//! let (start, end) = session.data.domain();
//! for series in session.data.series() {
//!     println!("{}: {:?}", series.name(), series.rates_between(start, end));
//! }
//! ```

pub mod benchmark;
pub mod config;
pub mod dataset;
pub mod ingest;
pub mod sample;
pub mod sensors;
pub mod series;
pub mod session;
pub mod store;

pub use benchmark::{
    BenchmarkData, BenchmarkError, BenchmarkSeries, Benchmarker, Phase, ResultSet, Section, Stat,
};
pub use config::{Config, ConfigBuilder, ConfigError};
pub use dataset::Dataset;
pub use ingest::{IngestError, IngestEvent, TraceReader, TraceSource};
pub use sample::Sample;
pub use sensors::{Sensor, SensorError, TraceSampler, Unit};
pub use series::{DataSeries, RateStats, Series, SeriesHandle};
pub use session::{
    CoordinatorStatus, Mode, SensingSessionStream, Session, SessionCoordinator, SessionError,
    SessionStream,
};
pub use store::{BenchmarkStore, StoreError};

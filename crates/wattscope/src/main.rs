// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! wattscope - Record, replay and benchmark energy traces.
//!
//! # Usage
//!
//! ```bash
//! # Replay a trace and print per-series totals
//! wattscope replay wattscope-20260101120000000000000.csv
//!
//! # Tail a trace that is still being written
//! wattscope replay live.csv --follow
//!
//! # Query a window (Unix nanoseconds)
//! wattscope query trace.csv --from 1700000000000000000 --to 1700000010000000000
//!
//! # Record from the sensor program until Ctrl+C
//! wattscope sense
//!
//! # Benchmark a command with 5 s baselines
//! wattscope bench --baseline-ms 5000 -- make -j8
//!
//! # Recompute results from a benchmark log
//! wattscope results wattscope-20260101120000000000000-benchmarks.json
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use wattscope::{
    BenchmarkData, Benchmarker, Config, DataSeries, Phase, Section, Session, SessionCoordinator,
    Stat,
};

#[derive(Parser, Debug)]
#[command(name = "wattscope")]
#[command(about = "Energy telemetry recorder and benchmark analyzer")]
#[command(version)]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for session traces and benchmark logs
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Sensor program launched for live sessions
    #[arg(long)]
    sensor_program: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a trace file
    Replay {
        /// Trace file (CSV)
        file: PathBuf,

        /// Keep reading as the file grows (until Ctrl+C); defaults to
        /// `follow_replays` from the configuration
        #[arg(short, long)]
        follow: bool,
    },
    /// Print rate statistics of a trace over a window
    Query {
        /// Trace file (CSV)
        file: PathBuf,

        /// Window start (Unix ns, default: start of data)
        #[arg(long)]
        from: Option<i64>,

        /// Window end (Unix ns, default: end of data)
        #[arg(long)]
        to: Option<i64>,
    },
    /// Record from the sensor program until Ctrl+C
    Sense,
    /// Benchmark a command against a live sensing session
    Bench {
        /// Notes stored with the result
        #[arg(short, long, default_value = "")]
        notes: String,

        /// Baseline duration before and after the command (ms)
        #[arg(long)]
        baseline_ms: Option<u64>,

        /// Command and arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Recompute and print the results of a benchmark log
    Results {
        /// Benchmark log (JSON)
        log: PathBuf,
    },
}

fn load_config(args: &Args) -> Result<Config> {
    let base = match &args.config {
        Some(path) => Config::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };

    let mut builder = Config::builder()
        .output_dir(args.output_dir.clone().unwrap_or(base.output_dir))
        .file_prefix(base.file_prefix)
        .channel_capacity(base.channel_capacity)
        .sensor_program(args.sensor_program.clone().unwrap_or(base.sensor_program))
        .baseline(Duration::from_millis(base.baseline_ms))
        .sample_interval(Duration::from_millis(base.sample_interval_ms))
        .follow_replays(base.follow_replays);
    if let Commands::Bench {
        baseline_ms: Some(ms),
        ..
    } = &args.command
    {
        builder = builder.baseline(Duration::from_millis(*ms));
    }
    Ok(builder.build())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = args.log_level.parse().unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_target(false)
        .init();

    let config = load_config(&args)?;
    info!("Output directory: {}", config.output_dir.display());

    let coordinator = SessionCoordinator::new(config.clone());
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, shutting down...");
                cancel.cancel();
            }
        });
    }

    let result = match args.command {
        Commands::Replay { file, follow } => replay(&coordinator, file, follow, &cancel).await,
        Commands::Query { file, from, to } => query(&coordinator, file, from, to, &cancel).await,
        Commands::Sense => sense(&coordinator, &cancel).await,
        Commands::Bench { notes, command, .. } => {
            bench(&coordinator, &command.join(" "), &notes, config.baseline(), &cancel).await
        }
        Commands::Results { log } => results(&coordinator, log, &cancel).await,
    };

    coordinator.shutdown().await;
    result
}

async fn replay(
    coordinator: &SessionCoordinator,
    file: PathBuf,
    follow: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let id = if follow {
        coordinator.replay_file(&file, true).await?
    } else {
        coordinator.replay(&file).await?
    };
    let mut stream = coordinator
        .stream_session(cancel.clone(), &id)
        .context("session vanished")?;

    let mut last = stream.current();
    while let Some(session) = stream.next().await {
        last = session;
        if last.closed {
            break;
        }
    }
    print_session(&last);
    Ok(())
}

async fn query(
    coordinator: &SessionCoordinator,
    file: PathBuf,
    from: Option<i64>,
    to: Option<i64>,
    cancel: &CancellationToken,
) -> Result<()> {
    let id = coordinator.replay_file(&file, false).await?;
    let session = coordinator
        .stream_session(cancel.clone(), &id)
        .context("session vanished")?
        .closed()
        .await
        .context("interrupted")?;

    let (start, end) = session.data.domain();
    let (a, b) = (from.unwrap_or(start), to.unwrap_or(end));
    println!("window [{}, {}) ns", a, b);
    for series in session.data.series() {
        match series.rates_between(a, b) {
            Some(r) => println!(
                "  {:<32} sum {:>12.3} J  min {:>9.3} W  mean {:>9.3} W  max {:>9.3} W",
                series.name(),
                r.sum,
                r.min,
                r.mean,
                r.max
            ),
            None => println!("  {:<32} no data", series.name()),
        }
    }
    Ok(())
}

async fn sense(coordinator: &SessionCoordinator, cancel: &CancellationToken) -> Result<()> {
    let id = coordinator.launch_sensors().await?;
    info!("Recording to {}", coordinator.config().session_file(&id).display());

    let mut stream = coordinator
        .stream_session(cancel.clone(), &id)
        .context("session vanished")?;
    let mut last = stream.current();
    while let Some(session) = stream.next().await {
        last = session;
        if last.closed {
            break;
        }
    }
    print_session(&last);
    Ok(())
}

async fn bench(
    coordinator: &SessionCoordinator,
    command: &str,
    notes: &str,
    baseline: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let session_id = coordinator.launch_sensors().await?;
    info!("Sensing session {}", session_id);

    let benchmarker = Benchmarker::new(coordinator.clone(), cancel.clone());
    let mut updates = benchmarker.run(command, notes, baseline)?;

    let mut last: Option<BenchmarkData> = None;
    while let Some(data) = updates.recv().await {
        info!("Benchmark {}: {:?}", data.benchmark_id, data.phase());
        last = Some(data);
    }

    let data = last.context("benchmark did not start")?;
    if data.phase() == Phase::Error {
        anyhow::bail!(
            "benchmark failed: {}",
            data.err.as_deref().unwrap_or("unknown error")
        );
    }
    print_benchmark(&data);
    info!(
        "Results saved to {}",
        benchmarker.store().path_for(&data.session_id).display()
    );
    Ok(())
}

async fn results(
    coordinator: &SessionCoordinator,
    log: PathBuf,
    cancel: &CancellationToken,
) -> Result<()> {
    let benchmarker = Benchmarker::new(coordinator.clone(), cancel.clone());
    let loaded = benchmarker.load(&log).await?;
    if loaded.is_empty() {
        println!("No benchmarks could be loaded from {}", log.display());
    }
    for data in &loaded {
        print_benchmark(data);
    }
    Ok(())
}

fn print_session(session: &Session) {
    println!("session {} ({:?})", session.id, session.mode);
    if let Some(err) = &session.err {
        println!("  error: {}", err);
    }
    let (start, end) = session.data.domain();
    println!(
        "  {:.3} s of data",
        (end - start) as f64 / wattscope::sensors::NANOS_PER_SEC
    );
    for series in session.data.series() {
        let (min, max) = series.rate_range();
        println!(
            "  {:<32} {:>12.3} J  [{:.3} W .. {:.3} W]",
            series.name(),
            series.sum(),
            min,
            max
        );
    }
}

fn print_benchmark(data: &BenchmarkData) {
    println!(
        "benchmark {} of {:?} (session {})",
        data.benchmark_id, data.command, data.session_id
    );
    if !data.notes.is_empty() {
        println!("  notes: {}", data.notes);
    }
    if let Some(err) = &data.err {
        println!("  error: {}", err);
    }
    let Some(results) = &data.results else {
        return;
    };
    println!("  runtime {:.3} s", results.summary_duration.as_secs_f64());
    for (i, name) in results.series.iter().enumerate() {
        println!(
            "  {:<32} {:>12.3} J  {:>9.3} W  (baseline {:.3} W)",
            name,
            results.summary_joules[i],
            results.summary_watts[i],
            results.get(Section::PreBaseline, i, Stat::Mean) * 0.5
                + results.get(Section::PostBaseline, i, Stat::Mean) * 0.5
        );
    }
}

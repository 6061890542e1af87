// SPDX-License-Identifier: MIT
//
// HWRNG Pool
// Copyright (c) 2025 Valer Bocan, PhD, CSSLP
// Email: valer.bocan@upt.ro
//
// Department of Computer and Information Technology
// Politehnica University of Timisoara
//
// https://github.com/yourusername/hwrng-pool

//! HWRNG Simulator - exercises the entropy driver against a simulated generator
//!
//! A timer task plays the role of the hardware: every tick it advances the
//! simulated generator, which raises the "value ready" interrupt and runs the
//! driver's handler. Blocking consumers run on dedicated threads, and a
//! privileged consumer polls the ISR pool on its own schedule.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐     tick      ┌──────────────┐     get       ┌──────────────┐
//! │    Timer     │ ─────────────>│    Driver    │ ─────────────>│  Consumers   │
//! │  (generator) │  (interrupt)  │   (pools)    │  (thr / isr)  │              │
//! └──────────────┘               └──────────────┘               └──────────────┘
//! ```

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use hwrng_core::{
    driver::EntropyDriver,
    metrics::Metrics,
    sim::{ByteSource, SimulatedRng},
    DriverConfig,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

type Driver = EntropyDriver<Arc<SimulatedRng>>;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ReportFormat {
    Prometheus,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "hwrng-sim")]
#[command(about = "HWRNG Simulator - Drives the entropy pool driver with a simulated generator", long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// YAML configuration file (defaults to HWRNG_* environment variables)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of blocking consumer threads
    #[arg(long, default_value_t = 2)]
    consumers: usize,

    /// Bytes per blocking request
    #[arg(long, default_value_t = 32)]
    request_len: usize,

    /// Generation period of the simulated hardware, in microseconds
    #[arg(long, default_value_t = 1000)]
    tick_us: u64,

    /// Interval between privileged requests, in milliseconds (0 disables)
    #[arg(long, default_value_t = 50)]
    isr_interval_ms: u64,

    /// Bytes per privileged request
    #[arg(long, default_value_t = 4)]
    isr_request_len: usize,

    /// Fall back to busy-wait polling when the ISR pool runs short
    #[arg(long)]
    busy_wait_fallback: bool,

    /// Seed for the simulated generator (random if omitted)
    #[arg(long)]
    seed: Option<u64>,

    /// Stop after this many seconds instead of waiting for a signal
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Interval between metrics log lines, in seconds
    #[arg(long, default_value_t = 5)]
    report_interval_secs: u64,

    /// Format of the final metrics report
    #[arg(long, value_enum, default_value_t = ReportFormat::Prometheus)]
    report_format: ReportFormat,
}

/// Main simulator application state
struct Simulator {
    args: Args,
    rng: Arc<SimulatedRng>,
    driver: Arc<Driver>,
    metrics: Metrics,
    shutdown: Arc<AtomicBool>,
}

impl Simulator {
    fn new(args: Args, config: DriverConfig) -> Result<Self> {
        let source = match args.seed {
            Some(seed) => ByteSource::seeded(seed),
            None => ByteSource::os(),
        };
        let rng = Arc::new(SimulatedRng::new(source));

        let driver = EntropyDriver::from_config(Arc::clone(&rng), &config)
            .context("Failed to start entropy driver")?;
        let metrics = driver.metrics().clone();

        Ok(Self {
            args,
            rng,
            driver,
            metrics,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Main run loop
    async fn run(self: Arc<Self>) -> Result<()> {
        info!("Blocking consumers: {}", self.args.consumers);
        info!("Request size: {} bytes", self.args.request_len);
        info!("Generation period: {} us", self.args.tick_us);

        // Spawn interrupt source
        let irq_handle = {
            let simulator = Arc::clone(&self);
            tokio::spawn(async move { simulator.interrupt_loop().await })
        };

        // Spawn blocking consumers
        let consumer_handles: Vec<JoinHandle<()>> = (0..self.args.consumers)
            .map(|id| {
                let simulator = Arc::clone(&self);
                tokio::task::spawn_blocking(move || simulator.blocking_consumer(id))
            })
            .collect();

        // Spawn privileged consumer
        let isr_handle = (self.args.isr_interval_ms > 0).then(|| {
            let simulator = Arc::clone(&self);
            tokio::spawn(async move { simulator.privileged_loop().await })
        });

        // Spawn metrics reporter
        let report_handle = {
            let simulator = Arc::clone(&self);
            tokio::spawn(async move { simulator.report_loop().await })
        };

        match self.args.duration_secs {
            Some(secs) => {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(secs)) => {
                        info!("Run duration of {} seconds elapsed", secs);
                    }
                    result = Self::wait_for_shutdown() => result?,
                }
            }
            None => Self::wait_for_shutdown().await?,
        }

        info!("Shutting down, letting consumers finish their current request...");
        self.shutdown.store(true, Ordering::Release);

        if let Some(handle) = isr_handle {
            handle.abort();
        }

        // generator keeps ticking until every blocking request has returned
        for handle in consumer_handles {
            if let Err(e) = handle.await {
                error!("Consumer task failed: {}", e);
            }
        }

        irq_handle.abort();
        report_handle.abort();

        self.print_report()?;
        info!("Simulator shut down gracefully");
        Ok(())
    }

    /// Interrupt loop: advance the simulated generator once per tick
    async fn interrupt_loop(self: Arc<Self>) {
        let mut ticker = interval(Duration::from_micros(self.args.tick_us.max(1)));
        loop {
            ticker.tick().await;
            self.rng.tick();
        }
    }

    /// Blocking consumer: repeatedly request entropy until shutdown
    fn blocking_consumer(&self, id: usize) {
        let mut buf = vec![0u8; self.args.request_len];
        while !self.shutdown.load(Ordering::Acquire) {
            self.driver.get_entropy(&mut buf);
            debug!(consumer = id, bytes = %hex::encode(&buf), "Blocking request served");
        }
    }

    /// Privileged consumer: best-effort reads with optional busy-wait fallback
    async fn privileged_loop(self: Arc<Self>) {
        let mut ticker = interval(Duration::from_millis(self.args.isr_interval_ms));
        let mut buf = vec![0u8; self.args.isr_request_len];

        loop {
            ticker.tick().await;

            let owed = self.driver.get_entropy_nonblocking(&mut buf);
            if owed == 0 {
                debug!(bytes = %hex::encode(&buf), "Privileged request served from pool");
                continue;
            }

            if self.args.busy_wait_fallback {
                // busy-wait spins, so keep it off the async workers
                let filled = buf.len() - owed;
                let driver = Arc::clone(&self.driver);
                let mut rest = buf[filled..].to_vec();
                let polled = tokio::task::spawn_blocking(move || {
                    driver.get_entropy_busy_wait(&mut rest);
                    rest
                })
                .await;

                match polled {
                    Ok(rest) => {
                        buf[filled..].copy_from_slice(&rest);
                        debug!(owed, bytes = %hex::encode(&buf), "Privileged request completed by busy-wait");
                    }
                    Err(e) => error!("Busy-wait task failed: {}", e),
                }
            } else {
                warn!(owed, "ISR pool ran short");
            }
        }
    }

    /// Report loop: periodically log driver metrics
    async fn report_loop(self: Arc<Self>) {
        let mut ticker = interval(Duration::from_secs(self.args.report_interval_secs.max(1)));
        loop {
            ticker.tick().await;
            let snapshot = self.metrics.snapshot();
            info!(
                produced = snapshot.bytes_produced,
                dropped = snapshot.bytes_dropped,
                starts = snapshot.generator_starts,
                stops = snapshot.generator_stops,
                served = self.metrics.bytes_served(),
                waits = snapshot.blocking_waits,
                state = ?self.driver.generator_state(),
                "Driver status"
            );
        }
    }

    fn print_report(&self) -> Result<()> {
        match self.args.report_format {
            ReportFormat::Prometheus => print!("{}", self.metrics.prometheus_format()),
            ReportFormat::Json => {
                let json = serde_json::to_string_pretty(&self.metrics.snapshot())
                    .context("Failed to serialize metrics")?;
                println!("{}", json);
            }
        }
        Ok(())
    }

    /// Wait for shutdown signal (SIGINT or SIGTERM)
    async fn wait_for_shutdown() -> Result<()> {
        #[cfg(unix)]
        {
            use futures::stream::StreamExt;
            use signal_hook::consts::signal::*;
            use signal_hook_tokio::Signals;

            let mut signals =
                Signals::new([SIGINT, SIGTERM]).context("Failed to register signal handlers")?;

            if let Some(signal) = signals.next().await {
                info!("Received signal: {:?}", signal);
            }
        }

        #[cfg(windows)]
        {
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl+C")?;
            info!("Received Ctrl+C signal");
        }

        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    // Initialize tracing
    let log_level = args
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(true)
        .json()
        .init();

    info!("HWRNG Simulator v{}", hwrng_core::VERSION);

    let config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            DriverConfig::from_file(path).context("Failed to load configuration file")?
        }
        None => {
            info!("Loading configuration from environment variables");
            DriverConfig::from_env().context("Failed to load configuration from environment")?
        }
    };
    info!(
        isr_pool = config.isr_pool_len,
        isr_threshold = config.isr_threshold,
        thr_pool = config.thr_pool_len,
        thr_threshold = config.thr_threshold,
        bias_correction = config.bias_correction,
        "Driver configuration"
    );

    // Create and run simulator
    let simulator = Arc::new(Simulator::new(args, config)?);
    simulator.run().await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simulator(extra: &[&str]) -> Arc<Simulator> {
        let argv = ["hwrng-sim", "--seed", "7", "--tick-us", "100"]
            .iter()
            .chain(extra)
            .copied();
        let args = Args::try_parse_from(argv).unwrap();
        Arc::new(Simulator::new(args, DriverConfig::default()).unwrap())
    }

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["hwrng-sim"]).unwrap();
        assert_eq!(args.consumers, 2);
        assert_eq!(args.request_len, 32);
        assert!(!args.busy_wait_fallback);
        assert!(matches!(args.report_format, ReportFormat::Prometheus));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_interrupt_loop_serves_blocking_request() {
        let simulator = simulator(&[]);
        let irq = tokio::spawn(Arc::clone(&simulator).interrupt_loop());

        let driver = Arc::clone(&simulator.driver);
        let buf = tokio::task::spawn_blocking(move || {
            let mut buf = vec![0u8; 64];
            driver.get_entropy(&mut buf);
            buf
        })
        .await
        .unwrap();
        irq.abort();

        assert_eq!(buf.len(), 64);
        assert_eq!(simulator.metrics.snapshot().blocking_requests, 1);
        assert!(simulator.metrics.bytes_served() >= 64);
    }

    #[tokio::test]
    async fn test_consumer_exits_after_shutdown() {
        let simulator = simulator(&[]);
        simulator.shutdown.store(true, Ordering::Release);
        simulator.blocking_consumer(0);
        assert_eq!(simulator.metrics.bytes_served(), 0);
    }

    #[tokio::test]
    async fn test_busy_wait_fallback_completes_requests() {
        // nothing ticks the pools, so every request falls back
        let simulator = simulator(&[
            "--busy-wait-fallback",
            "--isr-interval-ms",
            "1",
            "--isr-request-len",
            "32",
        ]);
        let privileged = tokio::spawn(Arc::clone(&simulator).privileged_loop());

        tokio::time::sleep(Duration::from_millis(50)).await;
        privileged.abort();

        let snapshot = simulator.metrics.snapshot();
        assert!(snapshot.busy_wait_requests > 0);
        assert!(snapshot.bytes_served_busy_wait >= 32);
    }

    #[test]
    fn test_json_report() {
        let simulator = simulator(&["--report-format", "json"]);
        assert!(simulator.print_report().is_ok());
    }
}

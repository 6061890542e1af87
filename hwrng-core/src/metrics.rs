// SPDX-License-Identifier: MIT
//
// HWRNG Pool: Buffered Hardware Entropy Driver
// Copyright (c) 2025 Valer Bocan, PhD, CSSLP
// Email: valer.bocan@upt.ro
//
// Department of Computer and Information Technology
// Politehnica University of Timisoara
//
// https://github.com/yourusername/hwrng-pool

//! Metrics collection and reporting
//!
//! Every counter is a relaxed atomic so the interrupt handler can record
//! without locking or allocating. Latency samples are only recorded from
//! thread context.

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

const MAX_LATENCY_SAMPLES: usize = 10_000;

/// Driver metrics collector
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    start_time: Instant,

    // Producer side
    bytes_produced: AtomicU64,
    bytes_dropped: AtomicU64,
    spurious_interrupts: AtomicU64,
    generator_starts: AtomicU64,
    generator_stops: AtomicU64,

    // Consumer side
    blocking_requests: AtomicU64,
    blocking_waits: AtomicU64,
    bytes_served_blocking: AtomicU64,
    nonblocking_requests: AtomicU64,
    bytes_served_nonblocking: AtomicU64,
    busy_wait_requests: AtomicU64,
    bytes_served_busy_wait: AtomicU64,

    // Blocking request latency (microseconds)
    request_latencies: RwLock<Vec<u64>>,
}

/// Point-in-time copy of all counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_seconds: u64,
    pub bytes_produced: u64,
    pub bytes_dropped: u64,
    pub spurious_interrupts: u64,
    pub generator_starts: u64,
    pub generator_stops: u64,
    pub blocking_requests: u64,
    pub blocking_waits: u64,
    pub bytes_served_blocking: u64,
    pub nonblocking_requests: u64,
    pub bytes_served_nonblocking: u64,
    pub busy_wait_requests: u64,
    pub bytes_served_busy_wait: u64,
    pub latency_p50_micros: Option<u64>,
    pub latency_p99_micros: Option<u64>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                start_time: Instant::now(),
                bytes_produced: AtomicU64::new(0),
                bytes_dropped: AtomicU64::new(0),
                spurious_interrupts: AtomicU64::new(0),
                generator_starts: AtomicU64::new(0),
                generator_stops: AtomicU64::new(0),
                blocking_requests: AtomicU64::new(0),
                blocking_waits: AtomicU64::new(0),
                bytes_served_blocking: AtomicU64::new(0),
                nonblocking_requests: AtomicU64::new(0),
                bytes_served_nonblocking: AtomicU64::new(0),
                busy_wait_requests: AtomicU64::new(0),
                bytes_served_busy_wait: AtomicU64::new(0),
                request_latencies: RwLock::new(Vec::with_capacity(MAX_LATENCY_SAMPLES)),
            }),
        }
    }

    // Producer metrics
    pub fn record_byte_produced(&self) {
        self.inner.bytes_produced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_byte_dropped(&self) {
        self.inner.bytes_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_spurious_interrupt(&self) {
        self.inner.spurious_interrupts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_generator_start(&self) {
        self.inner.generator_starts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_generator_stop(&self) {
        self.inner.generator_stops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_produced(&self) -> u64 {
        self.inner.bytes_produced.load(Ordering::Relaxed)
    }

    pub fn bytes_dropped(&self) -> u64 {
        self.inner.bytes_dropped.load(Ordering::Relaxed)
    }

    pub fn generator_starts(&self) -> u64 {
        self.inner.generator_starts.load(Ordering::Relaxed)
    }

    pub fn generator_stops(&self) -> u64 {
        self.inner.generator_stops.load(Ordering::Relaxed)
    }

    // Consumer metrics
    pub fn record_blocking_request(&self, bytes: usize, latency_micros: u64) {
        self.inner.blocking_requests.fetch_add(1, Ordering::Relaxed);
        self.inner
            .bytes_served_blocking
            .fetch_add(bytes as u64, Ordering::Relaxed);

        let mut latencies = self.inner.request_latencies.write();
        latencies.push(latency_micros);
        if latencies.len() > MAX_LATENCY_SAMPLES {
            latencies.drain(0..MAX_LATENCY_SAMPLES / 2);
        }
    }

    pub fn record_blocking_wait(&self) {
        self.inner.blocking_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_nonblocking_request(&self, bytes: usize) {
        self.inner.nonblocking_requests.fetch_add(1, Ordering::Relaxed);
        self.inner
            .bytes_served_nonblocking
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_busy_wait_request(&self, bytes: usize) {
        self.inner.busy_wait_requests.fetch_add(1, Ordering::Relaxed);
        self.inner
            .bytes_served_busy_wait
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn blocking_waits(&self) -> u64 {
        self.inner.blocking_waits.load(Ordering::Relaxed)
    }

    pub fn bytes_served(&self) -> u64 {
        self.inner.bytes_served_blocking.load(Ordering::Relaxed)
            + self.inner.bytes_served_nonblocking.load(Ordering::Relaxed)
            + self.inner.bytes_served_busy_wait.load(Ordering::Relaxed)
    }

    // Derived metrics
    pub fn uptime_seconds(&self) -> u64 {
        self.inner.start_time.elapsed().as_secs()
    }

    pub fn latency_percentile(&self, percentile: f64) -> Option<u64> {
        let latencies = self.inner.request_latencies.read();
        if latencies.is_empty() {
            return None;
        }

        let mut sorted = latencies.clone();
        sorted.sort_unstable();
        let index = ((sorted.len() as f64 * percentile).ceil() as usize).min(sorted.len() - 1);
        Some(sorted[index])
    }

    pub fn latency_p50(&self) -> Option<u64> {
        self.latency_percentile(0.50)
    }

    pub fn latency_p99(&self) -> Option<u64> {
        self.latency_percentile(0.99)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        let inner = &self.inner;

        MetricsSnapshot {
            uptime_seconds: self.uptime_seconds(),
            bytes_produced: load(&inner.bytes_produced),
            bytes_dropped: load(&inner.bytes_dropped),
            spurious_interrupts: load(&inner.spurious_interrupts),
            generator_starts: load(&inner.generator_starts),
            generator_stops: load(&inner.generator_stops),
            blocking_requests: load(&inner.blocking_requests),
            blocking_waits: load(&inner.blocking_waits),
            bytes_served_blocking: load(&inner.bytes_served_blocking),
            nonblocking_requests: load(&inner.nonblocking_requests),
            bytes_served_nonblocking: load(&inner.bytes_served_nonblocking),
            busy_wait_requests: load(&inner.busy_wait_requests),
            bytes_served_busy_wait: load(&inner.bytes_served_busy_wait),
            latency_p50_micros: self.latency_p50(),
            latency_p99_micros: self.latency_p99(),
        }
    }

    /// Generate Prometheus-compatible metrics output
    pub fn prometheus_format(&self) -> String {
        let snapshot = self.snapshot();
        let mut output = String::new();

        let counters = [
            ("bytes_produced", "Bytes read from the generator", snapshot.bytes_produced),
            ("bytes_dropped", "Bytes refused by every pool", snapshot.bytes_dropped),
            ("spurious_interrupts", "Interrupts with no ready value", snapshot.spurious_interrupts),
            ("generator_starts", "START tasks issued", snapshot.generator_starts),
            ("generator_stops", "STOP tasks issued", snapshot.generator_stops),
            ("blocking_requests", "Completed blocking requests", snapshot.blocking_requests),
            ("blocking_waits", "Times a blocking caller slept", snapshot.blocking_waits),
            ("bytes_served_blocking", "Bytes served to blocking callers", snapshot.bytes_served_blocking),
            ("bytes_served_nonblocking", "Bytes served to non-blocking callers", snapshot.bytes_served_nonblocking),
            ("bytes_served_busy_wait", "Bytes served by busy-wait polling", snapshot.bytes_served_busy_wait),
        ];

        for (name, help, value) in counters {
            output.push_str(&format!("# HELP hwrng_{} {}\n", name, help));
            output.push_str(&format!("# TYPE hwrng_{} counter\n", name));
            output.push_str(&format!("hwrng_{} {}\n", name, value));
        }

        output.push_str("# HELP hwrng_uptime_seconds Driver uptime in seconds\n");
        output.push_str("# TYPE hwrng_uptime_seconds gauge\n");
        output.push_str(&format!("hwrng_uptime_seconds {}\n", snapshot.uptime_seconds));

        if let Some(p50) = snapshot.latency_p50_micros {
            output.push_str("# HELP hwrng_latency_p50_microseconds Blocking request latency 50th percentile\n");
            output.push_str("# TYPE hwrng_latency_p50_microseconds gauge\n");
            output.push_str(&format!("hwrng_latency_p50_microseconds {}\n", p50));
        }

        if let Some(p99) = snapshot.latency_p99_micros {
            output.push_str("# HELP hwrng_latency_p99_microseconds Blocking request latency 99th percentile\n");
            output.push_str("# TYPE hwrng_latency_p99_microseconds gauge\n");
            output.push_str(&format!("hwrng_latency_p99_microseconds {}\n", p99));
        }

        output
    }
}

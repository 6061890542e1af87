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

//! HWRNG Core Library
//!
//! This crate buffers randomness from a slow, byte-at-a-time hardware random
//! number generator. The generator pays a large latency penalty for the first
//! byte after every start, so the driver keeps small pools topped up and only
//! restarts generation once a pool drops below its threshold.
//!
//! # Architecture
//!
//! The library is organized into modules representing core concerns:
//! - `pool`: Fixed-capacity FIFO byte ring with a replenish watermark
//! - `hal`: Peripheral abstraction the platform implements
//! - `producer`: Start/stop control and byte readout
//! - `driver`: Interrupt handler and the blocking, non-blocking and busy-wait APIs
//! - `sync`: Counting signal between the interrupt and waiting threads
//! - `sim`: In-memory generator for tests and the simulator binary
//! - `config`: Configuration management with validation
//! - `metrics`: Counters and Prometheus output
//! - `error`: Unified error types
//!
//! # Consumers
//!
//! 1. **Blocking**: [`EntropyDriver::get_entropy`] waits until the request is satisfied
//! 2. **Non-blocking**: [`EntropyDriver::get_entropy_nonblocking`] takes what is buffered
//! 3. **Busy-wait**: [`EntropyDriver::get_entropy_busy_wait`] polls the hardware directly

pub mod config;
pub mod driver;
pub mod error;
pub mod hal;
pub mod metrics;
pub mod pool;
pub mod producer;
pub mod sim;
pub mod sync;

pub use config::{BusyWaitExit, DriverConfig};
pub use driver::{EntropyDriver, EntropyDriverBuilder, IsrOutcome, IsrRequest, PoolId};
pub use error::{Error, Result};
pub use hal::RngPeripheral;
pub use pool::{ConsumerClass, EntropyPool};
pub use producer::GeneratorState;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Largest unit a blocking request is split into (8-bit pool indices)
pub const MAX_CHUNK: usize = u8::MAX as usize;

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

//! Entropy driver: interrupt-fed pools and the consumer APIs
//!
//! # Flow
//!
//! ```text
//! ┌──────────────┐  VALRDY irq  ┌──────────────┐   get    ┌──────────────┐
//! │  Generator   │ ────────────>│  Pool list   │ ────────>│  Consumers   │
//! │ (peripheral) │              │ (priority)   │          │ (thr / isr)  │
//! └──────────────┘              └──────────────┘          └──────────────┘
//!        ^                             │
//!        └──── START below threshold ──┘
//!              STOP when no pool has room
//! ```
//!
//! Each generated byte goes to exactly one pool: the first one in
//! registration order with a free slot. Privileged pools are registered
//! first by [`EntropyDriver::from_config`], so interrupt-context callers are
//! always served before blocking ones.

use crate::config::{BusyWaitExit, DriverConfig};
use crate::hal::RngPeripheral;
use crate::metrics::Metrics;
use crate::pool::{ConsumerClass, EntropyPool};
use crate::producer::{GeneratorState, Producer};
use crate::sync::Signal;
use crate::{Error, Result, MAX_CHUNK};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tracing::{debug, info, trace};

/// Handle to a registered pool, in registration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolId(usize);

impl PoolId {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

/// How an interrupt-context request should be served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsrRequest {
    /// Take what the privileged pool holds
    NonBlocking,
    /// Poll the generator directly until the buffer is full
    BusyWait,
}

/// Result of [`EntropyDriver::get_entropy_isr`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsrOutcome {
    /// Bytes still owed after a non-blocking read
    Owed(usize),
    /// Bytes written by busy-wait polling
    Delivered(usize),
}

struct PoolSlot {
    pool: EntropyPool,
    consumer: Mutex<()>,
    data_ready: Signal,
}

impl PoolSlot {
    fn new(pool: EntropyPool) -> Self {
        Self {
            pool,
            consumer: Mutex::new(()),
            data_ready: Signal::default(),
        }
    }

    fn notify_waiters(&self) {
        if self.pool.class() == ConsumerClass::Blocking {
            self.data_ready.give();
        }
    }
}

/// Nesting state shared by every [`ExclusiveAccess`] guard on one generator
#[derive(Debug, Default)]
pub struct ExclusiveState {
    depth: AtomicUsize,
    irq_was_enabled: AtomicBool,
}

impl ExclusiveState {
    /// Number of guards currently held
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }
}

/// Masks the generator interrupt and restores the prior state on drop
///
/// Holding this guard gives the caller sole ownership of the generator's
/// ready event: the interrupt handler cannot run until it is released.
/// Guards sharing one [`ExclusiveState`] nest, whether on one thread or
/// several: the first records the line's state and the last restores it.
pub struct ExclusiveAccess<'a, P: RngPeripheral> {
    peripheral: &'a P,
    state: &'a ExclusiveState,
    outermost: bool,
}

impl<'a, P: RngPeripheral> ExclusiveAccess<'a, P> {
    pub fn acquire(peripheral: &'a P, state: &'a ExclusiveState) -> Self {
        let outermost = peripheral.interrupt_free(|| {
            let outermost = state.depth.fetch_add(1, Ordering::AcqRel) == 0;
            if outermost {
                state
                    .irq_was_enabled
                    .store(peripheral.is_interrupt_enabled(), Ordering::Release);
                peripheral.disable_interrupt();
            }
            outermost
        });

        Self {
            peripheral,
            state,
            outermost,
        }
    }

    /// True if this guard masked the line itself
    pub fn is_outermost(&self) -> bool {
        self.outermost
    }

    /// Interrupt-enable state in force before the first guard was taken
    pub fn irq_was_enabled(&self) -> bool {
        self.state.irq_was_enabled.load(Ordering::Acquire)
    }

    /// Run `f` masked, passing whether no other guard is held
    ///
    /// Other holders can only join after `f` returns.
    pub fn with_sole_holder<R>(&self, f: impl FnOnce(bool) -> R) -> R {
        self.peripheral
            .interrupt_free(|| f(self.state.depth.load(Ordering::Acquire) == 1))
    }
}

impl<P: RngPeripheral> Drop for ExclusiveAccess<'_, P> {
    fn drop(&mut self) {
        self.peripheral.interrupt_free(|| {
            let last = self.state.depth.fetch_sub(1, Ordering::AcqRel) == 1;
            if last && self.state.irq_was_enabled.load(Ordering::Acquire) {
                self.peripheral.enable_interrupt();
            }
        });
    }
}

/// Builder registering the pools fed by one generator
pub struct EntropyDriverBuilder<P> {
    peripheral: P,
    pools: Vec<(ConsumerClass, usize, usize)>,
    bias_correction: bool,
    irq_priority: u8,
    busy_wait_exit: BusyWaitExit,
    metrics: Metrics,
}

impl<P: RngPeripheral> EntropyDriverBuilder<P> {
    /// Register a pool holding `usable` bytes
    ///
    /// Pools are offered each byte in registration order.
    pub fn pool(mut self, class: ConsumerClass, usable: usize, threshold: usize) -> Self {
        self.pools.push((class, usable, threshold));
        self
    }

    pub fn bias_correction(mut self, enabled: bool) -> Self {
        self.bias_correction = enabled;
        self
    }

    pub fn irq_priority(mut self, priority: u8) -> Self {
        self.irq_priority = priority;
        self
    }

    pub fn busy_wait_exit(mut self, exit: BusyWaitExit) -> Self {
        self.busy_wait_exit = exit;
        self
    }

    /// Share an existing metrics collector
    pub fn metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Allocate the pools, hook the interrupt and start generating
    ///
    /// Every threshold must be at least 1: a pool that never asks for more
    /// would leave its blocking callers waiting on a stopped generator.
    pub fn build(self) -> Result<Arc<EntropyDriver<P>>> {
        let pools = self
            .pools
            .iter()
            .map(|&(class, usable, threshold)| {
                if threshold == 0 {
                    return Err(Error::InvalidPool {
                        capacity: usable + 1,
                        threshold,
                    });
                }
                EntropyPool::with_usable(class, usable, threshold).map(PoolSlot::new)
            })
            .collect::<Result<Vec<_>>>()?;

        let first_of = |class: ConsumerClass| {
            pools
                .iter()
                .position(|slot| slot.pool.class() == class)
                .ok_or_else(|| Error::Config(format!("At least one {:?} pool is required", class)))
        };
        let privileged = first_of(ConsumerClass::Privileged)?;
        let blocking = first_of(ConsumerClass::Blocking)?;

        let driver = Arc::new(EntropyDriver {
            producer: Producer::new(self.peripheral, self.metrics.clone()),
            pools,
            privileged,
            blocking,
            busy_wait_exit: self.busy_wait_exit,
            exclusive: ExclusiveState::default(),
            metrics: self.metrics,
        });

        let peripheral = driver.producer.peripheral();
        peripheral.set_bias_correction(self.bias_correction);
        driver.producer.clear_ready_event();

        let handle: Weak<EntropyDriver<P>> = Arc::downgrade(&driver);
        peripheral.connect_irq(
            self.irq_priority,
            Box::new(move || {
                if let Some(driver) = handle.upgrade() {
                    driver.on_value_ready();
                }
            }),
        );

        driver.producer.start();
        peripheral.enable_interrupt();

        info!(
            pools = driver.pools.len(),
            bias_correction = self.bias_correction,
            irq_priority = self.irq_priority,
            "Entropy driver started"
        );

        Ok(driver)
    }
}

/// Buffered entropy driver for one generator
pub struct EntropyDriver<P: RngPeripheral> {
    producer: Producer<P>,
    pools: Vec<PoolSlot>,
    privileged: usize,
    blocking: usize,
    busy_wait_exit: BusyWaitExit,
    exclusive: ExclusiveState,
    metrics: Metrics,
}

impl<P: RngPeripheral> EntropyDriver<P> {
    pub fn builder(peripheral: P) -> EntropyDriverBuilder<P> {
        EntropyDriverBuilder {
            peripheral,
            pools: Vec::new(),
            bias_correction: true,
            irq_priority: 0,
            busy_wait_exit: BusyWaitExit::default(),
            metrics: Metrics::new(),
        }
    }

    /// Start a driver with one ISR pool followed by one thread pool
    pub fn from_config(peripheral: P, config: &DriverConfig) -> Result<Arc<Self>> {
        config.validate()?;

        Self::builder(peripheral)
            .pool(ConsumerClass::Privileged, config.isr_pool_len, config.isr_threshold)
            .pool(ConsumerClass::Blocking, config.thr_pool_len, config.thr_threshold)
            .bias_correction(config.bias_correction)
            .irq_priority(config.irq_priority)
            .busy_wait_exit(config.busy_wait_exit)
            .build()
    }

    /// "Value ready" interrupt handler
    ///
    /// Never blocks or allocates. A byte refused by every pool is the
    /// expected result of a value completing after STOP, not corruption.
    pub fn on_value_ready(&self) {
        let Some(byte) = self.producer.read_ready_byte() else {
            self.metrics.record_spurious_interrupt();
            return;
        };
        self.metrics.record_byte_produced();

        let stored = self.pools.iter().any(|slot| {
            let accepted = slot.pool.put(byte).is_ok();
            slot.notify_waiters();
            accepted
        });

        if !stored {
            self.metrics.record_byte_dropped();
        }

        if self.pools.iter().all(|slot| slot.pool.is_full()) {
            self.producer.stop();
        }
    }

    /// Fill `buf` from the default thread pool, waiting as long as needed
    pub fn get_entropy(&self, buf: &mut [u8]) {
        self.fill_blocking(&self.pools[self.blocking], buf);
    }

    /// Fill `buf` from a specific blocking pool
    pub fn get_entropy_from(&self, id: PoolId, buf: &mut [u8]) -> Result<()> {
        let slot = self.slot(id, ConsumerClass::Blocking)?;
        self.fill_blocking(slot, buf);
        Ok(())
    }

    /// Take what the ISR pool holds without waiting
    ///
    /// Returns the number of bytes still owed; the filled bytes are at the
    /// front of `buf`. Callers must not race each other on this pool.
    pub fn get_entropy_nonblocking(&self, buf: &mut [u8]) -> usize {
        let owed = self.pools[self.privileged].pool.get(buf, &self.producer);
        self.metrics.record_nonblocking_request(buf.len() - owed);
        owed
    }

    /// Poll the generator directly, bypassing every pool
    ///
    /// Masks the generator interrupt for the duration and restores its
    /// previous state on return. Always delivers `buf.len()` bytes.
    /// Callers may nest or overlap; only the last one to finish applies
    /// [`BusyWaitExit::Stop`] and unmasks the line.
    pub fn get_entropy_busy_wait(&self, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }

        {
            let exclusive = self.exclusive_access();

            if exclusive.is_outermost() {
                self.producer.clear_ready_event();
            }
            self.producer.start();

            for byte in buf.iter_mut() {
                *byte = self.poll_byte();
            }

            if self.busy_wait_exit == BusyWaitExit::Stop {
                exclusive.with_sole_holder(|sole| {
                    if sole && !self.any_pool_low() {
                        self.producer.stop();
                    }
                });
            }

            debug!(
                bytes = buf.len(),
                irq_was_enabled = exclusive.irq_was_enabled(),
                outermost = exclusive.is_outermost(),
                "Busy-wait entropy request served"
            );
        }

        self.metrics.record_busy_wait_request(buf.len());
        buf.len()
    }

    /// Mask the interrupt handler out of the generator
    ///
    /// For callers polling the peripheral themselves. Nests with the
    /// busy-wait path.
    pub fn exclusive_access(&self) -> ExclusiveAccess<'_, P> {
        ExclusiveAccess::acquire(self.producer.peripheral(), &self.exclusive)
    }

    /// Interrupt-context entry point
    pub fn get_entropy_isr(&self, buf: &mut [u8], request: IsrRequest) -> IsrOutcome {
        match request {
            IsrRequest::NonBlocking => IsrOutcome::Owed(self.get_entropy_nonblocking(buf)),
            IsrRequest::BusyWait => IsrOutcome::Delivered(self.get_entropy_busy_wait(buf)),
        }
    }

    pub fn generator_state(&self) -> GeneratorState {
        self.producer.state()
    }

    pub fn pool(&self, id: PoolId) -> Option<&EntropyPool> {
        self.pools.get(id.0).map(|slot| &slot.pool)
    }

    /// Ids of the pools serving `class`, in priority order
    pub fn pools_of(&self, class: ConsumerClass) -> impl Iterator<Item = PoolId> + '_ {
        self.pools
            .iter()
            .enumerate()
            .filter(move |(_, slot)| slot.pool.class() == class)
            .map(|(index, _)| PoolId(index))
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn peripheral(&self) -> &P {
        self.producer.peripheral()
    }

    fn fill_blocking(&self, slot: &PoolSlot, buf: &mut [u8]) {
        let started = Instant::now();

        for chunk in buf.chunks_mut(MAX_CHUNK) {
            let mut filled = 0;
            loop {
                let result = {
                    let _consumer = slot.consumer.lock();
                    self.drain(&slot.pool, &mut chunk[filled..])
                };

                match result {
                    Err(Error::InsufficientData { unsatisfied }) => {
                        filled = chunk.len() - unsatisfied;
                        self.metrics.record_blocking_wait();
                        trace!(unsatisfied, "Waiting for entropy");
                        slot.data_ready.take();
                    }
                    _ => {
                        // the count saturates at one, so pass it on to the
                        // next sleeper while bytes are left
                        if !slot.pool.is_empty() {
                            slot.data_ready.give();
                        }
                        break;
                    }
                }
            }
        }

        self.metrics
            .record_blocking_request(buf.len(), started.elapsed().as_micros() as u64);
    }

    fn drain(&self, pool: &EntropyPool, out: &mut [u8]) -> Result<()> {
        match pool.get(out, &self.producer) {
            0 => Ok(()),
            unsatisfied => Err(Error::InsufficientData { unsatisfied }),
        }
    }

    fn poll_byte(&self) -> u8 {
        let peripheral = self.producer.peripheral();
        loop {
            while !peripheral.value_ready() {
                peripheral.wait_for_event();
            }

            let byte = self.producer.read_ready_byte();
            peripheral.clear_pending_interrupt();

            if let Some(byte) = byte {
                return byte;
            }
        }
    }

    fn any_pool_low(&self) -> bool {
        self.pools
            .iter()
            .any(|slot| slot.pool.len() < slot.pool.threshold())
    }

    fn slot(&self, id: PoolId, expected: ConsumerClass) -> Result<&PoolSlot> {
        let slot = self.pools.get(id.0).ok_or(Error::UnknownPool(id.0))?;
        let actual = slot.pool.class();
        if actual != expected {
            return Err(Error::WrongClass {
                id: id.0,
                expected,
                actual,
            });
        }
        Ok(slot)
    }
}

impl<P: RngPeripheral> Drop for EntropyDriver<P> {
    fn drop(&mut self) {
        let peripheral = self.producer.peripheral();
        peripheral.disable_interrupt();
        peripheral.stop();
    }
}

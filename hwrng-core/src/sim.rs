//! In-memory generator implementing [`RngPeripheral`]
//!
//! Used by the tests and by the `hwrng-sim` binary. One call to
//! [`SimulatedRng::tick`] stands for one generation period: while the
//! generator runs it latches a new value and raises the interrupt, or marks
//! it pending if the line is masked. Interrupt delivery holds the same lock
//! as [`RngPeripheral::interrupt_free`], so the handler runs atomically with
//! respect to masked sections, as it would on a single core.

use crate::hal::{IrqHandler, RngPeripheral};
use crossbeam::utils::Backoff;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Where simulated values come from
#[derive(Debug)]
pub enum ByteSource {
    /// Wrapping counter, for tests that need to trace every byte
    Counter(u8),
    Seeded(StdRng),
}

impl ByteSource {
    pub fn counter(start: u8) -> Self {
        Self::Counter(start)
    }

    pub fn seeded(seed: u64) -> Self {
        Self::Seeded(StdRng::seed_from_u64(seed))
    }

    /// Seeded from the operating system
    pub fn os() -> Self {
        Self::Seeded(StdRng::from_entropy())
    }

    fn next_byte(&mut self) -> u8 {
        match self {
            Self::Counter(next) => {
                let byte = *next;
                *next = next.wrapping_add(1);
                byte
            }
            Self::Seeded(rng) => rng.gen(),
        }
    }
}

/// Simulated byte-at-a-time generator
pub struct SimulatedRng {
    irq_lock: ReentrantMutex<()>,
    source: Mutex<ByteSource>,
    handler: RwLock<Option<IrqHandler>>,
    running: AtomicBool,
    value_ready: AtomicBool,
    value: AtomicU8,
    irq_enabled: AtomicBool,
    irq_pending: AtomicBool,
    bias_correction: AtomicBool,
    irq_priority: AtomicU8,
    starts: AtomicUsize,
    stops: AtomicUsize,
    generated: AtomicUsize,
}

impl SimulatedRng {
    pub fn new(source: ByteSource) -> Self {
        Self {
            irq_lock: ReentrantMutex::new(()),
            source: Mutex::new(source),
            handler: RwLock::new(None),
            running: AtomicBool::new(false),
            value_ready: AtomicBool::new(false),
            value: AtomicU8::new(0),
            irq_enabled: AtomicBool::new(false),
            irq_pending: AtomicBool::new(false),
            bias_correction: AtomicBool::new(false),
            irq_priority: AtomicU8::new(0),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            generated: AtomicUsize::new(0),
        }
    }

    /// Advance one generation period
    ///
    /// Returns false if the generator is stopped.
    pub fn tick(&self) -> bool {
        let _masked = self.irq_lock.lock();
        if !self.running.load(Ordering::Acquire) {
            return false;
        }

        let byte = self.source.lock().next_byte();
        self.latch(byte);
        true
    }

    /// Latch a value whether or not the generator runs
    ///
    /// Models a byte completing just as STOP is issued.
    pub fn inject(&self, byte: u8) {
        let _masked = self.irq_lock.lock();
        self.latch(byte);
    }

    /// Raise the interrupt without a value, as a spurious wakeup would
    pub fn fire_interrupt(&self) {
        let _masked = self.irq_lock.lock();
        self.raise();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_interrupt_pending(&self) -> bool {
        self.irq_pending.load(Ordering::Acquire)
    }

    pub fn bias_correction(&self) -> bool {
        self.bias_correction.load(Ordering::Relaxed)
    }

    pub fn irq_priority(&self) -> u8 {
        self.irq_priority.load(Ordering::Relaxed)
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::Relaxed)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::Relaxed)
    }

    /// Values generated so far, injected ones included
    pub fn generated(&self) -> usize {
        self.generated.load(Ordering::Relaxed)
    }

    fn latch(&self, byte: u8) {
        self.value.store(byte, Ordering::Release);
        self.value_ready.store(true, Ordering::Release);
        self.generated.fetch_add(1, Ordering::Relaxed);
        self.raise();
    }

    fn raise(&self) {
        if self.irq_enabled.load(Ordering::Acquire) {
            self.dispatch();
        } else {
            self.irq_pending.store(true, Ordering::Release);
        }
    }

    fn dispatch(&self) {
        self.irq_pending.store(false, Ordering::Release);
        if let Some(handler) = self.handler.read().as_ref() {
            handler();
        }
    }
}

impl RngPeripheral for SimulatedRng {
    fn start(&self) {
        let _masked = self.irq_lock.lock();
        self.running.store(true, Ordering::Release);
        self.starts.fetch_add(1, Ordering::Relaxed);
    }

    fn stop(&self) {
        let _masked = self.irq_lock.lock();
        self.running.store(false, Ordering::Release);
        self.stops.fetch_add(1, Ordering::Relaxed);
    }

    fn value_ready(&self) -> bool {
        self.value_ready.load(Ordering::Acquire)
    }

    fn read_value(&self) -> u8 {
        self.value.load(Ordering::Acquire)
    }

    fn clear_value_ready(&self) {
        self.value_ready.store(false, Ordering::Release);
    }

    fn set_bias_correction(&self, enabled: bool) {
        self.bias_correction.store(enabled, Ordering::Relaxed);
    }

    fn enable_interrupt(&self) {
        let _masked = self.irq_lock.lock();
        self.irq_enabled.store(true, Ordering::Release);
        if self.irq_pending.load(Ordering::Acquire) {
            self.dispatch();
        }
    }

    fn disable_interrupt(&self) {
        let _masked = self.irq_lock.lock();
        self.irq_enabled.store(false, Ordering::Release);
    }

    fn is_interrupt_enabled(&self) -> bool {
        self.irq_enabled.load(Ordering::Acquire)
    }

    fn clear_pending_interrupt(&self) {
        self.irq_pending.store(false, Ordering::Release);
    }

    /// One generation period passes while the core sleeps
    fn wait_for_event(&self) {
        if !self.tick() {
            std::hint::spin_loop();
        }
    }

    fn interrupt_free<R>(&self, f: impl FnOnce() -> R) -> R {
        let _masked = self.irq_lock.lock();
        f()
    }

    fn connect_irq(&self, priority: u8, handler: IrqHandler) {
        self.irq_priority.store(priority, Ordering::Relaxed);
        *self.handler.write() = Some(handler);
    }
}

/// Background thread ticking a simulated generator until dropped
pub struct Ticker {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    /// Tick as fast as possible, backing off while the generator is stopped
    pub fn spawn(rng: Arc<SimulatedRng>) -> Self {
        Self::spawn_with_period(rng, Duration::ZERO)
    }

    pub fn spawn_with_period(rng: Arc<SimulatedRng>, period: Duration) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = {
            let shutdown = Arc::clone(&shutdown);
            thread::spawn(move || {
                let backoff = Backoff::new();
                while !shutdown.load(Ordering::Acquire) {
                    if rng.tick() {
                        backoff.reset();
                        if period.is_zero() {
                            thread::yield_now();
                        } else {
                            thread::sleep(period);
                        }
                    } else if backoff.is_completed() {
                        thread::sleep(Duration::from_micros(50));
                    } else {
                        backoff.snooze();
                    }
                }
            })
        };

        Self {
            shutdown,
            handle: Some(handle),
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stopped_generator_is_idle() {
        let rng = SimulatedRng::new(ByteSource::counter(0));
        assert!(!rng.tick());
        assert!(!rng.value_ready());
        assert_eq!(rng.generated(), 0);
    }

    #[test]
    fn test_masked_interrupt_latches_pending() {
        let rng = SimulatedRng::new(ByteSource::counter(7));
        rng.start();
        assert!(rng.tick());
        assert!(rng.value_ready());
        assert_eq!(rng.read_value(), 7);
        assert!(rng.is_interrupt_pending());
    }

    #[test]
    fn test_enable_delivers_pending_interrupt() {
        let rng = SimulatedRng::new(ByteSource::counter(0));
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let hits = Arc::clone(&hits);
            rng.connect_irq(3, Box::new(move || {
                hits.fetch_add(1, Ordering::Relaxed);
            }));
        }

        rng.start();
        rng.tick();
        assert_eq!(hits.load(Ordering::Relaxed), 0);

        rng.enable_interrupt();
        assert_eq!(hits.load(Ordering::Relaxed), 1);
        assert!(!rng.is_interrupt_pending());

        rng.tick();
        assert_eq!(hits.load(Ordering::Relaxed), 2);
        assert_eq!(rng.irq_priority(), 3);
    }

    #[test]
    fn test_seeded_source_is_reproducible() {
        let mut a = ByteSource::seeded(99);
        let mut b = ByteSource::seeded(99);
        let xs: Vec<u8> = (0..32).map(|_| a.next_byte()).collect();
        let ys: Vec<u8> = (0..32).map(|_| b.next_byte()).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn test_counter_wraps() {
        let mut source = ByteSource::counter(255);
        assert_eq!(source.next_byte(), 255);
        assert_eq!(source.next_byte(), 0);
    }
}

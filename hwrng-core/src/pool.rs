//! Circular byte pool with FIFO semantics and a replenish watermark
//!
//! This module implements the fixed-capacity ring that sits between the
//! producer interrupt handler and the consumers. One slot is always left
//! unused so that `first == last` unambiguously means "empty".
//!
//! The ring is single-producer/single-consumer: only the interrupt handler
//! appends, and only one consumer at a time drains. Indices and storage are
//! atomics, so the two sides can run concurrently without a lock.

use crate::{Error, Result};
use std::ops::Range;
use std::sync::atomic::{AtomicU8, Ordering};

/// Largest declared capacity addressable by the 8-bit indices
pub const MAX_CAPACITY: usize = u8::MAX as usize;

/// Class of consumer a pool is reserved for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsumerClass {
    /// Interrupt-context or best-effort callers, read without locking
    Privileged,
    /// Thread-context callers that may wait for more bytes
    Blocking,
}

/// Receives a pool's request to restart byte production
pub trait Replenish {
    fn replenish(&self);
}

/// Fixed-capacity FIFO byte ring
///
/// # Design
///
/// - `capacity` slots, `capacity - 1` usable
/// - Producer owns `last`, consumer owns `first`
/// - A drained read that leaves fewer than `threshold` bytes asks the
///   producer to start, so the first-byte latency is paid only when the
///   pool runs low
#[derive(Debug)]
pub struct EntropyPool {
    class: ConsumerClass,
    capacity: u8,
    threshold: u8,
    first: AtomicU8,
    last: AtomicU8,
    slots: Box<[AtomicU8]>,
}

impl EntropyPool {
    /// Create a pool with `capacity` slots (`capacity - 1` usable bytes)
    pub fn new(class: ConsumerClass, capacity: usize, threshold: usize) -> Result<Self> {
        if !(2..=MAX_CAPACITY).contains(&capacity) || threshold >= capacity {
            return Err(Error::InvalidPool { capacity, threshold });
        }

        Ok(Self {
            class,
            capacity: capacity as u8,
            threshold: threshold as u8,
            first: AtomicU8::new(0),
            last: AtomicU8::new(0),
            slots: (0..capacity).map(|_| AtomicU8::new(0)).collect(),
        })
    }

    /// Create a pool able to hold `usable` bytes
    pub fn with_usable(class: ConsumerClass, usable: usize, threshold: usize) -> Result<Self> {
        Self::new(class, usable + 1, threshold)
    }

    /// Append one byte
    ///
    /// On `PoolFull` nothing is stored and unread bytes are left untouched.
    pub fn put(&self, byte: u8) -> Result<()> {
        let last = self.last.load(Ordering::Relaxed);
        let next = self.advance(last, 1);

        if next == self.first.load(Ordering::Acquire) {
            return Err(Error::PoolFull);
        }

        self.slots[last as usize].store(byte, Ordering::Relaxed);
        self.last.store(next, Ordering::Release);
        Ok(())
    }

    /// Move up to `out.len()` bytes into `out`, oldest first
    ///
    /// Returns the number of bytes still owed. A partial read fills the front
    /// of `out`, so the caller retries with `&mut out[out.len() - owed..]`.
    pub fn get<R: Replenish + ?Sized>(&self, out: &mut [u8], producer: &R) -> usize {
        let first = self.first.load(Ordering::Relaxed) as usize;
        let last = self.last.load(Ordering::Acquire) as usize;
        let capacity = self.capacity as usize;

        // at most two contiguous passes: tail segment, then head segment
        let segments: [Range<usize>; 2] = if first <= last {
            [first..last, 0..0]
        } else {
            [first..capacity, 0..last]
        };
        let available = segments[0].len() + segments[1].len();

        let mut copied = 0;
        for segment in segments {
            let n = segment.len().min(out.len() - copied);
            for (dst, slot) in out[copied..copied + n].iter_mut().zip(&self.slots[segment]) {
                *dst = slot.load(Ordering::Relaxed);
            }
            copied += n;
        }

        self.first
            .store(self.advance(first as u8, copied), Ordering::Release);

        if available - copied < self.threshold as usize {
            producer.replenish();
        }

        out.len() - copied
    }

    /// Number of unread bytes
    pub fn len(&self) -> usize {
        let first = self.first.load(Ordering::Acquire) as usize;
        let last = self.last.load(Ordering::Acquire) as usize;
        let capacity = self.capacity as usize;
        (last + capacity - first) % capacity
    }

    pub fn is_empty(&self) -> bool {
        self.first.load(Ordering::Acquire) == self.last.load(Ordering::Acquire)
    }

    /// True when no usable slot remains
    pub fn is_full(&self) -> bool {
        let last = self.last.load(Ordering::Acquire);
        self.advance(last, 1) == self.first.load(Ordering::Acquire)
    }

    /// Declared slot count
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    pub fn usable_capacity(&self) -> usize {
        self.capacity as usize - 1
    }

    pub fn threshold(&self) -> usize {
        self.threshold as usize
    }

    pub fn class(&self) -> ConsumerClass {
        self.class
    }

    fn advance(&self, index: u8, by: usize) -> u8 {
        ((index as usize + by) % self.capacity as usize) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::cell::Cell;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct StartCounter(Cell<usize>);

    impl Replenish for StartCounter {
        fn replenish(&self) {
            self.0.set(self.0.get() + 1);
        }
    }

    fn pool(capacity: usize, threshold: usize) -> EntropyPool {
        EntropyPool::new(ConsumerClass::Blocking, capacity, threshold).unwrap()
    }

    #[test]
    fn test_rejects_bad_geometry() {
        assert!(EntropyPool::new(ConsumerClass::Blocking, 1, 0).is_err());
        assert!(EntropyPool::new(ConsumerClass::Blocking, 256, 0).is_err());
        assert!(EntropyPool::new(ConsumerClass::Blocking, 8, 8).is_err());
        assert!(EntropyPool::new(ConsumerClass::Blocking, 255, 254).is_ok());
    }

    #[test]
    fn test_put_get_in_order() {
        let pool = pool(8, 3);
        let starts = StartCounter::default();
        for byte in 1..=5 {
            pool.put(byte).unwrap();
        }

        let mut out = [0u8; 5];
        assert_eq!(pool.get(&mut out, &starts), 0);
        assert_eq!(out, [1, 2, 3, 4, 5]);
        assert!(pool.is_empty());
        assert_eq!(starts.0.get(), 1);
    }

    #[test]
    fn test_wraparound() {
        let pool = pool(4, 0);
        let starts = StartCounter::default();
        pool.put(b'A').unwrap();
        pool.put(b'B').unwrap();
        pool.put(b'C').unwrap();
        assert!(pool.is_full());

        let mut one = [0u8; 1];
        assert_eq!(pool.get(&mut one, &starts), 0);
        assert_eq!(one, [b'A']);

        pool.put(b'D').unwrap();

        let mut two = [0u8; 2];
        assert_eq!(pool.get(&mut two, &starts), 0);
        assert_eq!(two, [b'B', b'C']);

        assert_eq!(pool.get(&mut one, &starts), 0);
        assert_eq!(one, [b'D']);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_split_copy_across_end() {
        let pool = pool(5, 0);
        let starts = StartCounter::default();
        for byte in [10, 11, 12] {
            pool.put(byte).unwrap();
        }
        let mut out = [0u8; 3];
        pool.get(&mut out, &starts);

        // occupies slots 3, 4, 0, 1
        for byte in [20, 21, 22, 23] {
            pool.put(byte).unwrap();
        }
        assert!(pool.is_full());

        let mut out = [0u8; 4];
        assert_eq!(pool.get(&mut out, &starts), 0);
        assert_eq!(out, [20, 21, 22, 23]);
    }

    #[test]
    fn test_full_pool_keeps_contents() {
        let pool = pool(4, 0);
        let starts = StartCounter::default();
        for byte in [7, 8, 9] {
            pool.put(byte).unwrap();
        }

        assert_eq!(pool.put(99), Err(Error::PoolFull));
        assert_eq!(pool.len(), 3);

        let mut out = [0u8; 3];
        pool.get(&mut out, &starts);
        assert_eq!(out, [7, 8, 9]);
    }

    #[test]
    fn test_short_read_reports_owed() {
        let pool = pool(8, 2);
        let starts = StartCounter::default();
        pool.put(1).unwrap();
        pool.put(2).unwrap();

        let mut out = [0u8; 5];
        assert_eq!(pool.get(&mut out, &starts), 3);
        assert_eq!(&out[..2], &[1, 2]);
        assert_eq!(starts.0.get(), 1);

        pool.put(3).unwrap();
        assert_eq!(pool.get(&mut out[2..], &starts), 2);
        assert_eq!(out[2], 3);
    }

    #[test]
    fn test_no_start_above_threshold() {
        let pool = pool(8, 3);
        let starts = StartCounter::default();
        for byte in 0..7 {
            pool.put(byte).unwrap();
        }

        let mut out = [0u8; 2];
        pool.get(&mut out, &starts);
        assert_eq!(starts.0.get(), 0); // 5 left

        pool.get(&mut out, &starts);
        assert_eq!(starts.0.get(), 0); // 3 left

        pool.get(&mut out[..1], &starts);
        assert_eq!(starts.0.get(), 1); // 2 left
    }

    #[test]
    fn test_empty_get_still_replenishes() {
        let pool = pool(4, 1);
        let starts = StartCounter::default();
        let mut out = [0u8; 2];
        assert_eq!(pool.get(&mut out, &starts), 2);
        assert_eq!(starts.0.get(), 1);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Put(u8),
        Get(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![any::<u8>().prop_map(Op::Put), (0usize..8).prop_map(Op::Get)]
    }

    proptest! {
        #[test]
        fn prop_fifo_matches_model(capacity in 2usize..16, ops in prop::collection::vec(op(), 0..200)) {
            let pool = pool(capacity, 0);
            let starts = StartCounter::default();
            let mut model = VecDeque::new();

            for op in ops {
                match op {
                    Op::Put(byte) => {
                        let stored = pool.put(byte).is_ok();
                        prop_assert_eq!(stored, model.len() < capacity - 1);
                        if stored {
                            model.push_back(byte);
                        }
                    }
                    Op::Get(n) => {
                        let mut out = vec![0u8; n];
                        let owed = pool.get(&mut out, &starts);
                        let expected: Vec<u8> = model.drain(..n.min(model.len())).collect();
                        prop_assert_eq!(owed, n - expected.len());
                        prop_assert_eq!(&out[..expected.len()], &expected[..]);
                    }
                }
                prop_assert_eq!(pool.len(), model.len());
                prop_assert!(pool.len() <= pool.usable_capacity());
            }
        }

        #[test]
        fn prop_start_fires_once_per_low_read(threshold in 0usize..8, fill in 0usize..8, take in 0usize..8) {
            let pool = pool(8, threshold);
            let starts = StartCounter::default();
            for byte in 0..fill {
                pool.put(byte as u8).unwrap();
            }
            let mut out = vec![0u8; take];
            pool.get(&mut out, &starts);
            let expected = usize::from(pool.len() < threshold);
            prop_assert_eq!(starts.0.get(), expected);
        }
    }
}

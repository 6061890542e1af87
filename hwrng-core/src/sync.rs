//! Counting signal shared between the interrupt handler and waiting threads

use parking_lot::{Condvar, Mutex};

/// Counting semaphore with an upper bound on the stored count
///
/// `give` only holds the internal lock long enough to bump the count and
/// wake one waiter. `take` holds the same lock without masking interrupts,
/// so `give` is safe from an interrupt context that runs on its own thread,
/// as [`SimulatedRng`](crate::sim::SimulatedRng) delivers it. A handler that
/// preempts the waiting thread on the same core needs a lock-free signal.
#[derive(Debug)]
pub struct Signal {
    count: Mutex<u32>,
    limit: u32,
    available: Condvar,
}

impl Signal {
    pub fn new(initial: u32, limit: u32) -> Self {
        Self {
            count: Mutex::new(initial.min(limit)),
            limit,
            available: Condvar::new(),
        }
    }

    /// Raise the count (saturating at the limit) and wake one waiter
    pub fn give(&self) {
        let mut count = self.count.lock();
        if *count < self.limit {
            *count += 1;
        }
        self.available.notify_one();
    }

    /// Wait indefinitely for a nonzero count, then consume it
    pub fn take(&self) {
        let mut count = self.count.lock();
        while *count == 0 {
            self.available.wait(&mut count);
        }
        *count -= 1;
    }

    /// Consume the count if one is available
    pub fn try_take(&self) -> bool {
        let mut count = self.count.lock();
        if *count == 0 {
            return false;
        }
        *count -= 1;
        true
    }

    pub fn count(&self) -> u32 {
        *self.count.lock()
    }
}

impl Default for Signal {
    /// Binary signal starting empty
    fn default() -> Self {
        Self::new(0, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_count_saturates() {
        let signal = Signal::default();
        signal.give();
        signal.give();
        assert_eq!(signal.count(), 1);
        assert!(signal.try_take());
        assert!(!signal.try_take());
    }

    #[test]
    fn test_give_before_take_is_not_lost() {
        let signal = Signal::default();
        signal.give();
        signal.take();
        assert_eq!(signal.count(), 0);
    }

    #[test]
    fn test_take_wakes_on_give() {
        let signal = Arc::new(Signal::default());
        let waiter = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || signal.take())
        };

        signal.give();
        waiter.join().unwrap();
        assert_eq!(signal.count(), 0);
    }
}

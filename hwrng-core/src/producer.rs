//! Start/stop control and byte readout for the generator

use crate::hal::RngPeripheral;
use crate::metrics::Metrics;
use crate::pool::Replenish;
use std::sync::atomic::{AtomicBool, Ordering};

/// Generator power state as last commanded by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    Stopped,
    Running,
}

/// Thin wrapper over the peripheral issuing START/STOP and reading values
pub struct Producer<P> {
    peripheral: P,
    running: AtomicBool,
    metrics: Metrics,
}

impl<P: RngPeripheral> Producer<P> {
    pub fn new(peripheral: P, metrics: Metrics) -> Self {
        Self {
            peripheral,
            running: AtomicBool::new(false),
            metrics,
        }
    }

    pub fn start(&self) {
        self.peripheral.interrupt_free(|| {
            self.peripheral.start();
            self.running.store(true, Ordering::Release);
        });
        self.metrics.record_generator_start();
    }

    pub fn stop(&self) {
        self.peripheral.interrupt_free(|| {
            self.peripheral.stop();
            self.running.store(false, Ordering::Release);
        });
        self.metrics.record_generator_stop();
    }

    /// Read and clear one ready value
    ///
    /// Returns `None` when no value is ready (spurious interrupt). The check,
    /// read and clear happen with interrupts masked so they cannot be torn.
    pub fn read_ready_byte(&self) -> Option<u8> {
        self.peripheral.interrupt_free(|| {
            if !self.peripheral.value_ready() {
                return None;
            }
            let byte = self.peripheral.read_value();
            self.peripheral.clear_value_ready();
            Some(byte)
        })
    }

    pub fn clear_ready_event(&self) {
        self.peripheral.clear_value_ready();
    }

    pub fn state(&self) -> GeneratorState {
        if self.running.load(Ordering::Acquire) {
            GeneratorState::Running
        } else {
            GeneratorState::Stopped
        }
    }

    pub fn peripheral(&self) -> &P {
        &self.peripheral
    }
}

impl<P: RngPeripheral> Replenish for Producer<P> {
    fn replenish(&self) {
        self.start();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{ByteSource, SimulatedRng};

    #[test]
    fn test_start_stop_tracks_state() {
        let producer = Producer::new(SimulatedRng::new(ByteSource::counter(0)), Metrics::new());
        assert_eq!(producer.state(), GeneratorState::Stopped);

        producer.start();
        assert_eq!(producer.state(), GeneratorState::Running);
        assert!(producer.peripheral().is_running());

        producer.stop();
        assert_eq!(producer.state(), GeneratorState::Stopped);
        assert_eq!(producer.peripheral().stop_count(), 1);
    }

    #[test]
    fn test_read_ready_byte() {
        let producer = Producer::new(SimulatedRng::new(ByteSource::counter(42)), Metrics::new());
        assert_eq!(producer.read_ready_byte(), None);

        producer.start();
        producer.peripheral().tick();
        assert_eq!(producer.read_ready_byte(), Some(42));
        // event was cleared by the read
        assert_eq!(producer.read_ready_byte(), None);
    }
}

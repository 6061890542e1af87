//! Hardware abstraction for a byte-at-a-time random number generator
//!
//! The driver never touches registers itself. A platform layer implements
//! [`RngPeripheral`] for the real peripheral (or [`crate::sim::SimulatedRng`]
//! for tests) and delivers the "value ready" interrupt by calling the handler
//! registered through [`RngPeripheral::connect_irq`].

/// Handler run from interrupt context when a byte is ready
pub type IrqHandler = Box<dyn Fn() + Send + Sync>;

/// Register-level operations the driver needs from the generator
///
/// All methods take `&self`: register writes are atomic with respect to the
/// interrupt, and the driver shares the peripheral between thread and
/// interrupt context.
pub trait RngPeripheral: Send + Sync + 'static {
    /// Trigger the START task. Idempotent while running.
    fn start(&self);

    /// Trigger the STOP task. A byte already in flight may still arrive.
    fn stop(&self);

    /// Whether the VALRDY event is raised
    fn value_ready(&self) -> bool;

    /// Last generated value
    fn read_value(&self) -> u8;

    /// Clear the VALRDY event
    fn clear_value_ready(&self);

    fn set_bias_correction(&self, enabled: bool);

    /// Unmask the generator's interrupt line
    fn enable_interrupt(&self);

    /// Mask the generator's interrupt line
    fn disable_interrupt(&self);

    fn is_interrupt_enabled(&self) -> bool;

    /// Drop an interrupt latched while the line was masked
    fn clear_pending_interrupt(&self);

    /// Sleep until any event, as a low-power wait instruction would
    fn wait_for_event(&self) {
        std::hint::spin_loop();
    }

    /// Run `f` with interrupts masked
    fn interrupt_free<R>(&self, f: impl FnOnce() -> R) -> R;

    /// Install the "value ready" handler at the given priority
    fn connect_irq(&self, priority: u8, handler: IrqHandler);
}

impl<T: RngPeripheral> RngPeripheral for std::sync::Arc<T> {
    fn start(&self) {
        (**self).start()
    }

    fn stop(&self) {
        (**self).stop()
    }

    fn value_ready(&self) -> bool {
        (**self).value_ready()
    }

    fn read_value(&self) -> u8 {
        (**self).read_value()
    }

    fn clear_value_ready(&self) {
        (**self).clear_value_ready()
    }

    fn set_bias_correction(&self, enabled: bool) {
        (**self).set_bias_correction(enabled)
    }

    fn enable_interrupt(&self) {
        (**self).enable_interrupt()
    }

    fn disable_interrupt(&self) {
        (**self).disable_interrupt()
    }

    fn is_interrupt_enabled(&self) -> bool {
        (**self).is_interrupt_enabled()
    }

    fn clear_pending_interrupt(&self) {
        (**self).clear_pending_interrupt()
    }

    fn wait_for_event(&self) {
        (**self).wait_for_event()
    }

    fn interrupt_free<R>(&self, f: impl FnOnce() -> R) -> R {
        (**self).interrupt_free(f)
    }

    fn connect_irq(&self, priority: u8, handler: IrqHandler) {
        (**self).connect_irq(priority, handler)
    }
}

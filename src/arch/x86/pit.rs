//! 8253/8254 Programmable Interval Timer — channel 0 tick source.
//!
//! Programs channel 0 in square-wave mode at [`TICK_HZ`]. Unlike the host
//! kernel's PIT driver, this one does not calibrate against the TSC; a
//! single IRQ-driven counter is all the TCP core needs for retransmission
//! aging and initial-sequence-number entropy.

use super::port::outb;
use core::sync::atomic::{AtomicU32, Ordering};

const PIT_CHANNEL0: u16 = 0x40;
const PIT_CMD: u16 = 0x43;
const PIT_FREQUENCY: u32 = 1_193_182;

/// Tick rate in Hz.
pub const TICK_HZ: u32 = 100;

static TICK_COUNT: AtomicU32 = AtomicU32::new(0);

/// Program the PIT to fire at [`TICK_HZ`] interrupts per second.
pub fn init() {
    let divisor = PIT_FREQUENCY / TICK_HZ;
    unsafe {
        outb(PIT_CMD, 0x36);
        outb(PIT_CHANNEL0, (divisor & 0xFF) as u8);
        outb(PIT_CHANNEL0, ((divisor >> 8) & 0xFF) as u8);
    }
}

/// Called from the PIT IRQ handler.
pub fn tick() {
    TICK_COUNT.fetch_add(1, Ordering::Relaxed);
}

/// Ticks elapsed since boot.
#[inline]
pub fn get_ticks() -> u32 {
    TICK_COUNT.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_is_monotonic() {
        let before = get_ticks();
        tick();
        assert!(get_ticks() > before);
    }
}

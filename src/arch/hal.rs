//! Hardware Abstraction Layer — platform-agnostic API.
//!
//! Free functions cross-platform kernel code should use instead of
//! referencing `arch::x86::*` directly. This crate targets x86_64 only;
//! the indirection is kept so the spinlock and timer call sites read the
//! same way the host kernel's multi-architecture tree does.
//!
//! `cfg(test)` builds run as an ordinary hosted binary (`cargo test`'s
//! harness), where `cli`/`sti`/`hlt` are privileged instructions that
//! fault outside ring 0. The interrupt-control primitives below are
//! therefore no-ops under `cfg(test)` — mutual exclusion for the unit
//! tests in this crate is still provided by the spinlock's atomic CAS,
//! only the IRQ-masking side effect is skipped.

/// Logical CPU index. This crate does not model SMP, so there is exactly
/// one CPU; the indirection exists so spinlock ownership tracking reads
/// the same way it would on a multi-CPU build.
#[inline]
pub fn cpu_id() -> u32 {
    0
}

/// Enable interrupts on the current CPU.
#[cfg(not(test))]
#[inline]
pub fn enable_interrupts() {
    unsafe { core::arch::asm!("sti", options(nomem, nostack)); }
}

#[cfg(test)]
#[inline]
pub fn enable_interrupts() {}

/// Disable interrupts on the current CPU.
#[cfg(not(test))]
#[inline]
pub fn disable_interrupts() {
    unsafe { core::arch::asm!("cli", options(nomem, nostack)); }
}

#[cfg(test)]
#[inline]
pub fn disable_interrupts() {}

/// Check if interrupts are enabled on the current CPU.
#[cfg(not(test))]
#[inline]
pub fn interrupts_enabled() -> bool {
    let rflags: u64;
    unsafe { core::arch::asm!("pushfq; pop {}", out(reg) rflags, options(nomem)); }
    rflags & 0x200 != 0
}

#[cfg(test)]
#[inline]
pub fn interrupts_enabled() -> bool {
    true
}

/// Halt the CPU until the next interrupt.
#[cfg(not(test))]
#[inline]
pub fn halt() {
    unsafe { core::arch::asm!("hlt", options(nomem, nostack)); }
}

#[cfg(test)]
#[inline]
pub fn halt() {}

/// Save interrupt state and disable interrupts. Pass the result to
/// [`restore_interrupt_state`].
#[cfg(not(test))]
#[inline]
pub fn save_and_disable_interrupts() -> u64 {
    let flags: u64;
    unsafe {
        core::arch::asm!("pushfq; pop {}", out(reg) flags, options(nomem, preserves_flags));
        core::arch::asm!("cli", options(nomem, nostack, preserves_flags));
    }
    flags
}

#[cfg(test)]
#[inline]
pub fn save_and_disable_interrupts() -> u64 {
    0
}

/// Restore interrupt state from a value returned by [`save_and_disable_interrupts`].
#[cfg(not(test))]
#[inline]
pub fn restore_interrupt_state(saved: u64) {
    if saved & 0x200 != 0 {
        unsafe { core::arch::asm!("sti", options(nomem, nostack)); }
    }
}

#[cfg(test)]
#[inline]
pub fn restore_interrupt_state(_saved: u64) {}

/// Current monotonic tick count (`x86::pit::TICK_HZ` per second).
#[inline]
pub fn timer_current_ticks() -> u32 {
    crate::arch::x86::pit::get_ticks()
}

/// Tick frequency in Hz.
#[inline]
pub fn timer_frequency_hz() -> u32 {
    crate::arch::x86::pit::TICK_HZ
}

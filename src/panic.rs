//! Kernel panic handler. Only compiled for the freestanding build —
//! under `cfg(test)` the crate runs hosted under `std`'s own test
//! harness, which supplies its own panic handler.

#[cfg(not(test))]
use core::panic::PanicInfo;

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    crate::serial_println!("=== KERNEL PANIC ===");
    crate::serial_println!("{}", info);
    loop {
        crate::arch::hal::disable_interrupts();
        crate::arch::hal::halt();
    }
}

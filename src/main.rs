//! TCP transport core hosted in a small bare-metal kernel skeleton:
//! boot entry, serial console, an IRQ-safe spinlock, a cooperative
//! scheduler, and a minimal Ethernet/ARP/IPv4 stack exist only to give
//! the TCP core real collaborators with the same shapes the original
//! kernel gave it.
//!
//! ## Module structure
//!
//! - `arch` — HAL plus the x86 PIT/port primitives it's built on
//! - `drivers` — COM1 serial console and the NIC interface (software
//!   loopback model behind the same three-operation contract a real
//!   descriptor-ring driver would implement)
//! - `memory` — the kernel heap (`#[global_allocator]`)
//! - `net` — Ethernet/ARP/IPv4 plus the `tcp` submodule (the core itself)
//! - `sync` — the IRQ-safe spinlock (`tcplock` is one instance of it)
//! - `task` — the cooperative scheduler (`sleep_on`/`wake_on`/kill flag)
//!
//! Under `cfg(test)` this crate builds as an ordinary hosted `std`
//! binary so `cargo test` can run the `#[cfg(test)]` suites co-located
//! with every module; `arch::hal`'s interrupt-control primitives become
//! no-ops in that configuration since `cli`/`sti`/`hlt` are privileged
//! instructions outside ring 0.
#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(test), no_main)]
#![cfg_attr(not(test), feature(alloc_error_handler))]
#![allow(dead_code, static_mut_refs)]

extern crate alloc;

mod arch;
mod drivers;
mod memory;
mod net;
mod panic;
mod sync;
mod task;

use net::types::{Ipv4Addr, MacAddr, NetConfig};

/// Static interface configuration for this crate's single bound
/// interface (§6: "Interface configuration (ambient, this crate)"). A
/// future DHCP client would be the one other thing that ever writes to
/// `net::set_config`.
fn boot_net_config(mac: MacAddr) -> NetConfig {
    NetConfig {
        ip: Ipv4Addr::new(10, 0, 2, 15),
        mask: Ipv4Addr::new(255, 255, 255, 0),
        gateway: Ipv4Addr::new(10, 0, 2, 2),
        dns: Ipv4Addr::new(10, 0, 2, 3),
        mac,
    }
}

/// Entry point handed off to by the boot stub. Mirrors the host kernel's
/// own `kernel_main`, minus the boot-info handoff struct this skeleton
/// has no bootloader contract to validate.
#[cfg(not(test))]
#[no_mangle]
pub extern "C" fn kernel_main() -> ! {
    run()
}

fn run() -> ! {
    // Phase 1: early output.
    drivers::serial::init();
    serial_println!("");
    serial_println!("==========================================");
    serial_println!("  tcpcore — TCP transport core skeleton");
    serial_println!("==========================================");

    // Phase 2: heap, so the CBT's Vec/VecDeque fields have somewhere
    // to live.
    memory::heap::init();

    // Phase 3: timekeeping (retransmission aging, ISN entropy) and the
    // scheduler (blocking socket calls sleep on CB addresses).
    arch::x86::pit::init();
    task::scheduler::init();

    // Phase 4: bring up the network interface and register the TCP
    // core as IP's protocol-6 receive callback.
    drivers::network::init();
    let cfg = boot_net_config(drivers::network::mac_address());
    net::init(cfg);
    net::tcp::init();
    serial_println!("net: interface {} configured, tcp core registered", cfg.ip);

    serial_println!("");
    serial_println!("tcpcore initialization complete, entering idle loop.");

    // Idle loop: drain inbound frames, service due retransmissions, and
    // halt until the next interrupt. This skeleton has no interrupt
    // descriptor table wired to dispatch NIC/PIT IRQs to these handlers
    // directly — `net::poll()` is the polling substitute a real driver's
    // interrupt epilogue would otherwise trigger.
    loop {
        net::poll();
        arch::hal::halt();
    }
}

// `#![no_main]` (freestanding build only) disables the implicit use of
// this as an entry point; `kernel_main` above is what the boot stub
// actually jumps to. Defining it anyway keeps `cargo test`'s hosted
// build (where `no_main` is off) from needing a separate crate shape.
fn main() {}

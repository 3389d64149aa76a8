//! Kernel heap allocator — a first-fit free-list over a fixed static
//! arena, protected by an IRQ-safe lock.
//!
//! The host kernel's own heap demand-pages a 512 MiB virtual region
//! backed by a physical frame allocator. This skeleton carries no page
//! tables or physical memory manager (out of scope for the TCP core), so
//! the arena is a single static byte array sized generously for the
//! CBT's `Vec`/`VecDeque` allocations (16 connections × 4 KiB receive
//! buffers, plus retransmission queue and backlog growth). The free-list
//! algorithm — first-fit search, block splitting, address-ordered
//! coalescing on free — mirrors the host kernel's `LockedHeap`.

use core::alloc::{GlobalAlloc, Layout};
use core::sync::atomic::{AtomicBool, Ordering};

/// Arena size: comfortably covers 16 CBs' 4 KiB receive buffers (64 KiB)
/// plus retransmission queue copies, ARP/backlog collections, and the
/// loopback NIC's queued frames.
const HEAP_SIZE: usize = 8 * 1024 * 1024;

#[repr(align(16))]
struct Arena([u8; HEAP_SIZE]);

static mut HEAP_ARENA: Arena = Arena([0u8; HEAP_SIZE]);

#[repr(C)]
struct FreeBlock {
    size: usize,
    next: *mut FreeBlock,
}

static mut FREE_LIST: *mut FreeBlock = core::ptr::null_mut();
static mut INITIALIZED: bool = false;

// Under `cfg(test)` the crate is built as an ordinary hosted binary
// (see the `cfg_attr(not(test), no_std)` split at the crate root) and
// `std` already supplies a global allocator — defining a second one
// would conflict at link time, so this arena is test-dead code there.
#[cfg(not(test))]
#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap { lock: AtomicBool::new(false) };

struct LockedHeap {
    lock: AtomicBool,
}

impl LockedHeap {
    fn acquire(&self) -> u64 {
        let flags = crate::arch::hal::save_and_disable_interrupts();
        while self
            .lock
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }
        flags
    }

    fn release(&self, flags: u64) {
        self.lock.store(false, Ordering::Release);
        crate::arch::hal::restore_interrupt_state(flags);
    }
}

fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Must run once, before any allocation, while no other CPU can race it.
pub fn init() {
    unsafe {
        if INITIALIZED {
            return;
        }
        let base = core::ptr::addr_of_mut!(HEAP_ARENA.0) as *mut u8;
        let block = base as *mut FreeBlock;
        (*block).size = HEAP_SIZE;
        (*block).next = core::ptr::null_mut();
        FREE_LIST = block;
        INITIALIZED = true;
    }
    crate::serial_println!("heap: {} KiB arena ready", HEAP_SIZE / 1024);
}

unsafe fn alloc_inner(layout: Layout) -> *mut u8 {
    let size = align_up(
        layout.size().max(core::mem::size_of::<FreeBlock>()),
        layout.align().max(core::mem::align_of::<FreeBlock>()),
    );

    let mut prev: *mut FreeBlock = core::ptr::null_mut();
    let mut current = FREE_LIST;

    while !current.is_null() {
        let block_size = (*current).size;

        if block_size >= size {
            let remainder = block_size - size;
            if remainder >= core::mem::size_of::<FreeBlock>() + 16 {
                let new_block = (current as *mut u8).add(size) as *mut FreeBlock;
                (*new_block).size = remainder;
                (*new_block).next = (*current).next;
                if prev.is_null() {
                    FREE_LIST = new_block;
                } else {
                    (*prev).next = new_block;
                }
            } else if prev.is_null() {
                FREE_LIST = (*current).next;
            } else {
                (*prev).next = (*current).next;
            }
            return current as *mut u8;
        }

        prev = current;
        current = (*current).next;
    }

    core::ptr::null_mut()
}

unsafe fn dealloc_inner(ptr: *mut u8, layout: Layout) {
    let size = align_up(
        layout.size().max(core::mem::size_of::<FreeBlock>()),
        layout.align().max(core::mem::align_of::<FreeBlock>()),
    );

    let freed = ptr as *mut FreeBlock;
    (*freed).size = size;

    // Insert in address order and coalesce with an adjacent neighbour.
    let mut prev: *mut FreeBlock = core::ptr::null_mut();
    let mut current = FREE_LIST;
    while !current.is_null() && (current as usize) < (freed as usize) {
        prev = current;
        current = (*current).next;
    }

    (*freed).next = current;
    if prev.is_null() {
        FREE_LIST = freed;
    } else {
        (*prev).next = freed;
    }

    if !current.is_null() && (freed as usize) + (*freed).size == current as usize {
        (*freed).size += (*current).size;
        (*freed).next = (*current).next;
    }
    if !prev.is_null() && (prev as usize) + (*prev).size == freed as usize {
        (*prev).size += (*freed).size;
        (*prev).next = (*freed).next;
    }
}

unsafe impl GlobalAlloc for LockedHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if !INITIALIZED {
            return core::ptr::null_mut();
        }
        let flags = self.acquire();
        let ptr = alloc_inner(layout);
        self.release(flags);
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let flags = self.acquire();
        dealloc_inner(ptr, layout);
        self.release(flags);
    }
}

#[cfg(not(test))]
#[alloc_error_handler]
fn alloc_error(layout: Layout) -> ! {
    panic!("heap allocation failed: {:?}", layout);
}

//! NIC driver interface.
//!
//! The TCP core's contract with the network interface is exactly three
//! operations: read the station MAC address, hand a frame to the wire, and
//! drain received frames. A real deployment backs this with a descriptor-
//! ring driver (e.g. e1000); this crate ships a software loopback model
//! behind the identical interface so the stack runs and is testable
//! without real hardware.

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use crate::net::types::MacAddr;
use crate::sync::spinlock::Spinlock;

static MAC: Spinlock<MacAddr> = Spinlock::new(MacAddr::ZERO);
static RX_QUEUE: Spinlock<VecDeque<Vec<u8>>> = Spinlock::new(VecDeque::new());
static LOOPBACK: Spinlock<bool> = Spinlock::new(false);

/// Bring the interface up. In the software model this just assigns a
/// locally-administered MAC address; a real driver would read it from the
/// device's EEPROM.
pub fn init() {
    let mut mac = MAC.lock();
    *mac = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
}

/// Station MAC address.
pub fn mac_address() -> MacAddr {
    *MAC.lock()
}

/// Hand a frame to the wire. In the software loopback model (enabled via
/// [`set_loopback`]) the frame is queued straight back onto the receive
/// queue, which is how this crate's end-to-end tests drive the TCP core
/// without a real peer.
pub fn transmit(frame: &[u8]) {
    if *LOOPBACK.lock() {
        RX_QUEUE.lock().push_back(frame.to_vec());
    }
}

/// Pop the next received frame, if any.
pub fn recv_packet() -> Option<Vec<u8>> {
    RX_QUEUE.lock().pop_front()
}

/// Enable or disable loopback mode (test-only entry point).
pub fn set_loopback(on: bool) {
    *LOOPBACK.lock() = on;
}

/// Inject a raw frame as if it had arrived from the wire (test-only entry
/// point, also usable by a future userspace packet-capture replay tool).
pub fn inject(frame: Vec<u8>) {
    RX_QUEUE.lock().push_back(frame);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_roundtrips_frame() {
        set_loopback(true);
        transmit(&[1, 2, 3]);
        assert_eq!(recv_packet(), Some(alloc::vec![1, 2, 3]));
        set_loopback(false);
    }
}

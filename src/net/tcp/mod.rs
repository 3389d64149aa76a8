//! TCP transport core: an RFC 793-style eleven-state machine over a
//! fixed 16-slot control block table, a single global `tcplock`
//! spinlock, and a blocking socket API built on the scheduler's
//! sleep-on-address/wakeup-on-address primitives.
//!
//! ## Module structure
//!
//! - `cb` — Control Block, state enum, segment type, constants
//! - `rtq` — retransmission queue operations
//! - `send` — segment builder/transmitter (`tx`)
//! - `recv` — payload acceptance into the receive buffer, blocking `recv`
//! - `input` — incoming segment dispatch and the state machine itself
//! - `api` — open/bind/listen/accept/connect/send/close
//! - `timer` — best-effort retransmission hook
//! - `util` — sequence comparison, port allocation, RST, teardown

pub(crate) mod cb;
pub(crate) mod rtq;
pub(crate) mod send;
pub(crate) mod recv;
pub(crate) mod input;
pub(crate) mod api;
pub(crate) mod timer;
pub(crate) mod util;

use alloc::vec::Vec;
use cb::{Cb, MAX_CONNECTIONS};
use crate::sync::spinlock::Spinlock;

pub use cb::{ConnInfo, TcpState};
pub use api::{SockAddrIn, AF_INET};

/// The process-wide Control Block Table, guarded by the single
/// `tcplock` this whole module's invariants depend on. `None` until
/// `init()` runs.
pub(crate) static CBT: Spinlock<Option<Vec<Cb>>> = Spinlock::new(None);

/// Allocate the 16-slot CBT and register this module as the IP layer's
/// protocol-6 receive callback. Must run before any socket call.
pub fn init() {
    let mut guard = CBT.lock();
    let mut table = Vec::with_capacity(MAX_CONNECTIONS);
    for _ in 0..MAX_CONNECTIONS {
        table.push(Cb::new());
    }
    *guard = Some(table);
    drop(guard);

    crate::net::ipv4::add_protocol(crate::net::ipv4::PROTO_TCP, tcp_rx);
    crate::serial_println!("tcp: initialized ({} slots)", MAX_CONNECTIONS);
}

/// The IP-layer receive callback registered via `ip_add_protocol(6, ..)`.
pub(crate) fn tcp_rx(segment: &[u8], src: crate::net::types::Ipv4Addr, dst: crate::net::types::Ipv4Addr) {
    input::tcp_rx(segment, src, dst);
}

// ── Public socket API delegations ───────────────────────────────────

pub fn open() -> i32 {
    api::open()
}

pub fn bind(socket: i32, addr: SockAddrIn) -> i32 {
    api::bind(socket, addr)
}

pub fn listen(socket: i32, backlog: u32) -> i32 {
    api::listen(socket, backlog)
}

pub fn accept(socket: i32, peer: &mut Option<SockAddrIn>) -> i32 {
    api::accept(socket, peer)
}

pub fn connect(socket: i32, peer: SockAddrIn) -> i32 {
    api::connect(socket, peer)
}

pub fn send(socket: i32, buf: &[u8]) -> i32 {
    api::send_data(socket, buf)
}

pub fn recv(socket: i32, buf: &mut [u8]) -> i32 {
    if socket < 0 {
        return -1;
    }
    recv::recv(socket as usize, buf)
}

pub fn close(socket: i32) -> i32 {
    api::close(socket)
}

/// Non-blocking, non-mutating snapshot of every in-use connection's
/// tuple and state — diagnostics/netstat-style support, not part of the
/// socket syscall surface. Takes `tcplock` just long enough to copy.
pub fn snapshot() -> Vec<ConnInfo> {
    let guard = CBT.lock();
    let table = guard.as_ref().expect("tcp::init must run first");
    table
        .iter()
        .filter(|cb| cb.used)
        .map(|cb| ConnInfo {
            local_ip: cb.local_ip,
            local_port: cb.port,
            peer_addr: cb.peer_addr,
            peer_port: cb.peer_port,
            state: cb.state,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr_in(port: u16) -> SockAddrIn {
        SockAddrIn { family: AF_INET, port, addr: crate::net::types::Ipv4Addr::ZERO }
    }

    #[test]
    fn init_populates_sixteen_unused_slots() {
        init();
        let guard = CBT.lock();
        let table = guard.as_ref().unwrap();
        assert_eq!(table.len(), MAX_CONNECTIONS);
        assert!(table.iter().all(|cb| !cb.used));
    }

    #[test]
    fn snapshot_reports_only_used_cbs_and_never_mutates() {
        init();
        assert!(snapshot().is_empty());

        let s = open();
        bind(s, addr_in(0x2222));
        listen(s, 1);

        let conns = snapshot();
        assert_eq!(conns.len(), 1);
        assert_eq!(conns[0].local_port, 0x2222);
        assert_eq!(conns[0].state, TcpState::Listen);

        // Snapshotting again leaves the CBT exactly as it was.
        let conns_again = snapshot();
        assert_eq!(conns_again.len(), 1);

        close(s);
        assert!(snapshot().is_empty());
    }

    #[test]
    fn open_then_close_returns_cbt_to_initial_state() {
        init();
        let s = open();
        assert!(s >= 0);
        bind(s, addr_in(0x1234));
        listen(s, 4);
        // LISTEN with an empty backlog: close() falls into the
        // catch-all branch and clears immediately rather than sleeping.
        close(s);
        let guard = CBT.lock();
        assert!(guard.as_ref().unwrap().iter().all(|cb| !cb.used));
    }
}

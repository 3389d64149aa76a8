//! Socket API — blocking open/bind/listen/accept/connect/send/close.
//! Every entry validates the socket index, performs its action under
//! `tcplock`, and releases it before returning (blocking entries drop
//! and re-acquire across each sleep via `scheduler::sleep_on`).

use super::cb::{Cb, TcpState, ACK, FIN, MAX_CONNECTIONS, SYN, WINDOW_CAPACITY};
use super::{input, send, util, CBT};
use crate::net::types::Ipv4Addr;
use crate::task::scheduler;

/// Address family constant per §6 — the only family this crate accepts.
pub const AF_INET: u16 = 2;

/// Socket-level address, laid out per §6's `sockaddr_in`: 2-byte family,
/// network-order port, network-order IPv4 address. `bind`/`connect`
/// reject anything but `AF_INET`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SockAddrIn {
    pub family: u16,
    pub port: u16,
    pub addr: Ipv4Addr,
}

fn with_table<R>(f: impl FnOnce(&mut alloc::vec::Vec<Cb>) -> R, default: R) -> R {
    let mut guard = CBT.lock();
    match guard.as_mut() {
        Some(t) => f(t),
        None => default,
    }
}

/// Allocate a CB. Returns its index or -1 if the table is full.
pub fn open() -> i32 {
    with_table(
        |table| match table.iter().position(|cb| !cb.used) {
            Some(i) => {
                table[i] = Cb::new();
                table[i].used = true;
                i as i32
            }
            None => -1,
        },
        -1,
    )
}

/// Bind a local port. Requires CLOSED state, family `AF_INET`, and an
/// unheld port.
pub fn bind(socket: i32, addr: SockAddrIn) -> i32 {
    let idx = socket as usize;
    with_table(
        |table| {
            if socket < 0 || idx >= table.len() || !table[idx].used {
                return -1;
            }
            if addr.family != AF_INET {
                return -1;
            }
            if table[idx].state != TcpState::Closed {
                return -1;
            }
            if table.iter().any(|cb| cb.used && cb.port == addr.port) {
                return -1;
            }
            table[idx].port = addr.port;
            table[idx].local_ip = crate::net::config().ip;
            0
        },
        -1,
    )
}

/// Transition a bound CB to LISTEN. `backlog` is accepted but this
/// spec's backlog queue is unbounded — see `SPEC_FULL.md`.
pub fn listen(socket: i32, _backlog: u32) -> i32 {
    let idx = socket as usize;
    with_table(
        |table| {
            if socket < 0 || idx >= table.len() || !table[idx].used {
                return -1;
            }
            if table[idx].state != TcpState::Closed || table[idx].port == 0 {
                return -1;
            }
            table[idx].state = TcpState::Listen;
            0
        },
        -1,
    )
}

/// Sleep on `socket` until its backlog is non-empty or the caller is
/// killed, then dequeue and return one child. Re-checks the predicate on
/// every wake since spurious wakes are possible.
pub fn accept(socket: i32, peer: &mut Option<SockAddrIn>) -> i32 {
    let idx = socket as usize;
    loop {
        let outcome = with_table(
            |table| {
                if socket < 0 || idx >= table.len() || !table[idx].used || table[idx].state != TcpState::Listen {
                    return Some(-1);
                }
                match table[idx].backlog.pop_front() {
                    Some(child) => {
                        if let Some(slot) = peer {
                            slot.family = AF_INET;
                            slot.addr = table[child].peer_addr;
                            slot.port = table[child].peer_port;
                        }
                        Some(child as i32)
                    }
                    None => None,
                }
            },
            Some(-1),
        );

        if let Some(result) = outcome {
            return result;
        }

        if scheduler::is_current_killed() {
            return -1;
        }
        scheduler::sleep_on(idx);
        if scheduler::is_current_killed() {
            return -1;
        }
    }
}

/// Active open: claim an ephemeral port if none is bound, send the
/// initial SYN, and sleep until the state machine moves the CB out of
/// SYN_SENT.
pub fn connect(socket: i32, peer: SockAddrIn) -> i32 {
    let idx = socket as usize;

    let started = with_table(
        |table| {
            if socket < 0 || idx >= table.len() || !table[idx].used {
                return false;
            }
            if peer.family != AF_INET {
                return false;
            }
            if table[idx].state != TcpState::Closed {
                return false;
            }

            if table[idx].port == 0 {
                match util::alloc_ephemeral_port(table) {
                    Some(p) => table[idx].port = p,
                    None => return false,
                }
            }
            table[idx].local_ip = crate::net::config().ip;
            table[idx].peer_addr = peer.addr;
            table[idx].peer_port = peer.port;

            let iss = input::random_iss();
            table[idx].iss = iss;
            table[idx].snd.una = iss;
            table[idx].snd.nxt = iss.wrapping_add(1);
            table[idx].rcv.wnd = WINDOW_CAPACITY as u16;
            table[idx].state = TcpState::SynSent;

            let (lip, pip, pport) = (table[idx].local_ip, table[idx].peer_addr, table[idx].peer_port);
            send::tx(&mut table[idx], lip, pip, pport, iss, 0, SYN, &[]);
            true
        },
        false,
    );

    if !started {
        return -1;
    }

    loop {
        if scheduler::is_current_killed() {
            return -1;
        }
        scheduler::sleep_on(idx);
        if scheduler::is_current_killed() {
            return -1;
        }

        let state = with_table(|table| Some(table[idx].state), None);
        match state {
            Some(TcpState::SynSent) => continue,
            Some(TcpState::Established) => return 0,
            _ => return -1,
        }
    }
}

/// Send without waiting for the ack. Requires ESTABLISHED or CLOSE_WAIT.
pub fn send_data(socket: i32, buf: &[u8]) -> i32 {
    let idx = socket as usize;
    with_table(
        |table| {
            if socket < 0 || idx >= table.len() || !table[idx].used {
                return -1;
            }
            if !matches!(table[idx].state, TcpState::Established | TcpState::CloseWait) {
                return -1;
            }

            let (lip, pip, pport, seq, ack) = {
                let cb = &table[idx];
                (cb.local_ip, cb.peer_addr, cb.peer_port, cb.snd.nxt, cb.rcv.nxt)
            };
            let sent = send::tx(&mut table[idx], lip, pip, pport, seq, ack, ACK | super::cb::PSH, buf);
            table[idx].snd.nxt = table[idx].snd.nxt.wrapping_add(sent as u32);
            sent as i32
        },
        -1,
    )
}

/// Close: send FIN|ACK from the appropriate state and sleep once; in all
/// cases, clear the CB on wake (moves it to CLOSED) regardless of which
/// state the wake found it in — this crate does not track a TIME_WAIT
/// expiry to wait out (`SPEC_FULL.md` §4.4 leaves that explicitly out of
/// scope), so the peer's final ack (or the caller being killed) is what
/// ends the wait either way.
pub fn close(socket: i32) -> i32 {
    let idx = socket as usize;

    let next_state = with_table(
        |table| {
            if socket < 0 || idx >= table.len() || !table[idx].used {
                return None;
            }
            match table[idx].state {
                TcpState::SynRcvd | TcpState::Established => {
                    let (lip, pip, pport, seq, ack) = {
                        let cb = &table[idx];
                        (cb.local_ip, cb.peer_addr, cb.peer_port, cb.snd.nxt, cb.rcv.nxt)
                    };
                    send::tx(&mut table[idx], lip, pip, pport, seq, ack, FIN | ACK, &[]);
                    table[idx].snd.nxt = table[idx].snd.nxt.wrapping_add(1);
                    table[idx].state = TcpState::FinWait1;
                    Some(TcpState::FinWait1)
                }
                TcpState::CloseWait => {
                    let (lip, pip, pport, seq, ack) = {
                        let cb = &table[idx];
                        (cb.local_ip, cb.peer_addr, cb.peer_port, cb.snd.nxt, cb.rcv.nxt)
                    };
                    send::tx(&mut table[idx], lip, pip, pport, seq, ack, FIN | ACK, &[]);
                    table[idx].snd.nxt = table[idx].snd.nxt.wrapping_add(1);
                    table[idx].state = TcpState::LastAck;
                    Some(TcpState::LastAck)
                }
                other => {
                    util::cb_clear(table, idx);
                    Some(other)
                }
            }
        },
        None,
    );

    let waiting = match next_state {
        None => return -1,
        Some(TcpState::FinWait1) | Some(TcpState::LastAck) => true,
        Some(_) => false,
    };

    if !waiting {
        // Already cleared above (LISTEN / CLOSED / etc. had no peer ack
        // to wait for) — nothing left to sleep on.
        return 0;
    }

    let killed_before_sleep = scheduler::is_current_killed();
    if !killed_before_sleep {
        scheduler::sleep_on(idx);
    }
    let killed = killed_before_sleep || scheduler::is_current_killed();

    with_table(|table| util::cb_clear(table, idx), ());
    if killed { -1 } else { 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_cbt() {
        let mut table = alloc::vec::Vec::with_capacity(MAX_CONNECTIONS);
        for _ in 0..MAX_CONNECTIONS {
            table.push(Cb::new());
        }
        *CBT.lock() = Some(table);
    }

    fn addr_in(port: u16) -> SockAddrIn {
        SockAddrIn { family: AF_INET, port, addr: Ipv4Addr::ZERO }
    }

    #[test]
    fn open_allocates_until_exhausted_then_fails() {
        init_cbt();
        for expected in 0..MAX_CONNECTIONS as i32 {
            assert_eq!(open(), expected);
        }
        assert_eq!(open(), -1);
        *CBT.lock() = None;
    }

    #[test]
    fn bind_rejects_duplicate_port() {
        init_cbt();
        let a = open();
        let b = open();
        assert_eq!(bind(a, addr_in(0x50)), 0);
        assert_eq!(bind(b, addr_in(0x50)), -1);
        *CBT.lock() = None;
    }

    #[test]
    fn bind_rejects_wrong_family() {
        init_cbt();
        let s = open();
        let mut addr = addr_in(0x50);
        addr.family = 0;
        assert_eq!(bind(s, addr), -1);
        *CBT.lock() = None;
    }

    #[test]
    fn connect_rejects_wrong_family() {
        init_cbt();
        let s = open();
        let mut peer = addr_in(0x50);
        peer.family = 0;
        assert_eq!(connect(s, peer), -1);
        *CBT.lock() = None;
    }

    #[test]
    fn listen_requires_bound_closed_socket() {
        init_cbt();
        let s = open();
        assert_eq!(listen(s, 4), -1);
        bind(s, addr_in(0x51));
        assert_eq!(listen(s, 4), 0);
        *CBT.lock() = None;
    }

    #[test]
    fn accept_returns_minus_one_when_caller_already_killed() {
        init_cbt();
        let s = open();
        bind(s, addr_in(0x52));
        listen(s, 4);
        let tid = scheduler::spawn();
        scheduler::set_current_tid(tid);
        scheduler::kill(tid);
        let mut peer = None;
        assert_eq!(accept(s, &mut peer), -1);
        scheduler::set_current_tid(0);
        *CBT.lock() = None;
    }

    #[test]
    fn send_data_requires_established_or_close_wait() {
        init_cbt();
        let s = open();
        assert_eq!(send_data(s, b"hi"), -1);
        *CBT.lock() = None;
    }

    #[test]
    fn send_data_advances_snd_nxt_by_exactly_len() {
        init_cbt();
        let s = open();
        {
            let mut guard = CBT.lock();
            let table = guard.as_mut().unwrap();
            table[s as usize].state = TcpState::Established;
            table[s as usize].local_ip = Ipv4Addr::new(10, 0, 0, 1);
            table[s as usize].peer_addr = Ipv4Addr::new(10, 0, 0, 2);
            table[s as usize].peer_port = 4000;
            table[s as usize].snd.nxt = 1000;
        }
        let n = send_data(s, b"hello");
        assert_eq!(n, 5);
        assert_eq!(CBT.lock().as_ref().unwrap()[s as usize].snd.nxt, 1005);
        *CBT.lock() = None;
    }

    #[test]
    fn close_from_listen_clears_immediately_with_no_wait() {
        init_cbt();
        let s = open();
        bind(s, addr_in(0x53));
        listen(s, 4);
        assert_eq!(close(s), 0);
        assert!(!CBT.lock().as_ref().unwrap()[s as usize].used);
        *CBT.lock() = None;
    }

    #[test]
    fn close_from_established_sends_fin_and_waits_then_clears_on_kill() {
        init_cbt();
        let s = open();
        {
            let mut guard = CBT.lock();
            let table = guard.as_mut().unwrap();
            table[s as usize].state = TcpState::Established;
            table[s as usize].local_ip = Ipv4Addr::new(10, 0, 0, 1);
            table[s as usize].peer_addr = Ipv4Addr::new(10, 0, 0, 2);
            table[s as usize].peer_port = 4000;
            table[s as usize].snd.nxt = 1000;
        }
        let tid = scheduler::spawn();
        scheduler::set_current_tid(tid);
        scheduler::kill(tid);

        assert_eq!(close(s), -1);
        assert!(!CBT.lock().as_ref().unwrap()[s as usize].used);
        scheduler::set_current_tid(0);
        *CBT.lock() = None;
    }
}

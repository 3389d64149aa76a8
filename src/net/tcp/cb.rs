//! Control Block (CB) — per-connection state, segment flags, and the
//! fixed-size retransmission queue entry type.

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use crate::net::types::Ipv4Addr;

// ── TCP header flags ─────────────────────────────────────────────────
pub(crate) const FIN: u8 = 0x01;
pub(crate) const SYN: u8 = 0x02;
pub(crate) const RST: u8 = 0x04;
pub(crate) const PSH: u8 = 0x08;
pub(crate) const ACK: u8 = 0x10;

// ── Protocol constants ──────────────────────────────────────────────
pub(crate) const TCP_HEADER_LEN: usize = 20;
/// Control Block Table size — fixed at 16 slots per this crate's design.
pub(crate) const MAX_CONNECTIONS: usize = 16;
/// Fixed receive buffer capacity per connection.
pub(crate) const WINDOW_CAPACITY: usize = 4096;
/// Maximum segment body this crate will build in one `tx` call (MTU 1500
/// minus IP/TCP headers).
pub(crate) const MAX_SEGMENT_LEN: usize = 1460;
/// Retransmission age threshold in ticks (3s at the PIT's 100Hz rate).
pub(crate) const RETRANSMIT_TICKS: u32 = 300;
/// Maximum unaccepted children a LISTEN CB will hold before new SYNs are
/// dropped silently. Independent of the `backlog` argument a caller
/// passes to `listen()` — that argument is accepted but not validated
/// against any limit, matching the host kernel's own `_backlog: u16`.
pub(crate) const MAX_BACKLOG: usize = 16;

/// TCP connection state machine, eleven states per RFC 793.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TcpState {
    Closed,
    Listen,
    SynSent,
    SynRcvd,
    Established,
    FinWait1,
    FinWait2,
    Closing,
    TimeWait,
    CloseWait,
    LastAck,
}

impl TcpState {
    /// Synchronised states per the glossary: both sides have exchanged ISNs.
    pub(crate) fn is_synchronized(&self) -> bool {
        !matches!(self, TcpState::Closed | TcpState::Listen | TcpState::SynSent)
    }

    pub(crate) fn is_receive_ready(&self) -> bool {
        matches!(self, TcpState::Established | TcpState::FinWait1 | TcpState::FinWait2)
    }
}

/// Send-side sequence variables.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct SendVars {
    pub nxt: u32,
    pub una: u32,
    pub wnd: u16,
    pub up: u16,
    pub wl1: u32,
    pub wl2: u32,
}

/// Receive-side sequence variables.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct RecvVars {
    pub nxt: u32,
    pub wnd: u16,
    pub up: u16,
}

/// A segment copy retained for potential retransmission.
pub(crate) struct RtqEntry {
    pub seq: u32,
    pub sent_tick: u32,
    /// Sequence numbers this segment consumes: `plen` plus one for each
    /// of SYN/FIN. Distinct from `data.len()`, which also counts the
    /// 20-byte header — `drain_acked` must compare against this, not
    /// the wire length.
    pub seq_len: u32,
    pub data: Vec<u8>,
}

/// A TCP association's control block.
pub(crate) struct Cb {
    pub used: bool,
    pub state: TcpState,
    pub local_ip: Ipv4Addr,
    pub port: u16,
    pub peer_addr: Ipv4Addr,
    pub peer_port: u16,

    pub snd: SendVars,
    pub iss: u32,
    pub rcv: RecvVars,
    pub irs: u32,

    /// Retransmission queue — append-only in normal operation, drained
    /// wholesale by `cb_clear`.
    pub txq: VecDeque<RtqEntry>,

    /// Fixed receive buffer. Bytes occupy `[0, capacity - rcv.wnd)`.
    pub window: Vec<u8>,

    /// Index of the listening CB that spawned this one, or `None`.
    pub parent: Option<usize>,
    /// Completed child CBs awaiting `accept`, FIFO, only meaningful while
    /// `state == Listen`.
    pub backlog: VecDeque<usize>,
}

impl Cb {
    pub(crate) fn new() -> Self {
        Cb {
            used: false,
            state: TcpState::Closed,
            local_ip: Ipv4Addr::ZERO,
            port: 0,
            peer_addr: Ipv4Addr::ZERO,
            peer_port: 0,
            snd: SendVars::default(),
            iss: 0,
            rcv: RecvVars { nxt: 0, wnd: WINDOW_CAPACITY as u16, up: 0 },
            irs: 0,
            txq: VecDeque::new(),
            window: {
                let mut w = Vec::with_capacity(WINDOW_CAPACITY);
                w.resize(WINDOW_CAPACITY, 0);
                w
            },
            parent: None,
            backlog: VecDeque::new(),
        }
    }

    /// Bytes currently held in the receive buffer, available to a reader.
    pub(crate) fn available(&self) -> usize {
        WINDOW_CAPACITY - self.rcv.wnd as usize
    }
}

/// Point-in-time copy of one connection's identifying tuple and state,
/// for diagnostics/logging (`super::snapshot`). Never used to mutate a CB.
#[derive(Clone, Copy, Debug)]
pub struct ConnInfo {
    pub local_ip: Ipv4Addr,
    pub local_port: u16,
    pub peer_addr: Ipv4Addr,
    pub peer_port: u16,
    pub state: TcpState,
}

/// A parsed incoming TCP segment.
pub(crate) struct TcpSegment {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    pub flags: u8,
    pub window: u16,
    pub payload: Vec<u8>,
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_cb_is_unused_and_closed() {
        let cb = Cb::new();
        assert!(!cb.used);
        assert_eq!(cb.state, TcpState::Closed);
        assert_eq!(cb.available(), 0);
    }

    #[test]
    fn synchronized_states_classified_correctly() {
        assert!(!TcpState::Closed.is_synchronized());
        assert!(!TcpState::Listen.is_synchronized());
        assert!(!TcpState::SynSent.is_synchronized());
        assert!(TcpState::SynRcvd.is_synchronized());
        assert!(TcpState::Established.is_synchronized());
        assert!(TcpState::LastAck.is_synchronized());
    }
}

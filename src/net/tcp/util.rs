//! Sequence number comparison (modulo-2³²), ephemeral port allocation,
//! RST generation, and recursive CB teardown.

use super::cb::{Cb, TcpState, ACK, RST};
use super::{rtq, send};

// ── Sequence number comparison (wrapping-safe, modulo 2^32) ─────────

/// `a` strictly after `b`: `(b - a) mod 2^32 >= 2^31` per the spec's
/// `(B - A) mod 2^32 < 2^31` definition of `A <= B`.
pub(crate) fn is_seq_gt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

pub(crate) fn is_seq_gte(a: u32, b: u32) -> bool {
    a == b || is_seq_gt(a, b)
}

pub(crate) fn is_seq_lte(a: u32, b: u32) -> bool {
    a == b || !is_seq_gt(a, b)
}

// ── Ephemeral port allocation ───────────────────────────────────────

const EPHEMERAL_BASE: u32 = 49152;
const EPHEMERAL_TOP: u32 = 65535;
const EPHEMERAL_SEED_MOD: u32 = 1024;

/// Scan [49152, 65535] starting at a time-seeded offset modulo 1024 for a
/// port not held by any `used` CB. Caller already holds `tcplock`.
pub(crate) fn alloc_ephemeral_port(table: &[Cb]) -> Option<u16> {
    let span = EPHEMERAL_TOP - EPHEMERAL_BASE + 1;
    let seed = crate::arch::hal::timer_current_ticks() % EPHEMERAL_SEED_MOD;
    for i in 0..span {
        let candidate = (EPHEMERAL_BASE + (seed + i) % span) as u16;
        if !table.iter().any(|cb| cb.used && cb.port == candidate) {
            return Some(candidate);
        }
    }
    None
}

// ── RST generation ──────────────────────────────────────────────────

/// Send a RST in response to a segment with no matching CB (CLOSED-state
/// handling per §4.2).
pub(crate) fn send_rst_for(seg: &super::cb::TcpSegment) {
    if seg.flags & RST != 0 {
        return;
    }
    let cfg = crate::net::config();

    // Build directly: CLOSED has no CB to route the transmission (and
    // thus no retransmission queue) through, so this bypasses `tx`.
    let (seq, ack, flags) = if seg.flags & ACK != 0 {
        (seg.ack, 0u32, RST)
    } else {
        let mut ack = seg.seq.wrapping_add(seg.payload.len() as u32);
        if seg.flags & super::cb::SYN != 0 {
            ack = ack.wrapping_add(1);
        }
        if seg.flags & super::cb::FIN != 0 {
            ack = ack.wrapping_add(1);
        }
        (0u32, ack, RST | ACK)
    };

    let mut header = [0u8; super::cb::TCP_HEADER_LEN];
    header[0] = (seg.dst_port >> 8) as u8;
    header[1] = (seg.dst_port & 0xFF) as u8;
    header[2] = (seg.src_port >> 8) as u8;
    header[3] = (seg.src_port & 0xFF) as u8;
    header[4..8].copy_from_slice(&seq.to_be_bytes());
    header[8..12].copy_from_slice(&ack.to_be_bytes());
    header[12] = 5 << 4;
    header[13] = flags;

    let pseudo = crate::net::checksum::pseudo_header_checksum(
        cfg.ip.as_bytes(),
        seg.src_ip.as_bytes(),
        crate::net::ipv4::PROTO_TCP,
        super::cb::TCP_HEADER_LEN as u16,
    );
    let cksum = crate::net::checksum::finish(pseudo + crate::net::checksum::partial_sum(&header));
    header[16] = (cksum >> 8) as u8;
    header[17] = (cksum & 0xFF) as u8;

    crate::net::ipv4::send_ipv4(seg.src_ip, crate::net::ipv4::PROTO_TCP, &header);
}

// ── Recursive teardown ──────────────────────────────────────────────

/// Free `index`'s retransmission queue, recursively clear every CB still
/// sitting in its backlog, zero the record, and mark the slot free.
/// Called by `free`/`close` to return a CB (and any un-accepted children)
/// to CLOSED + unused.
pub(crate) fn cb_clear(table: &mut [Cb], index: usize) {
    if index >= table.len() || !table[index].used {
        return;
    }

    let children: alloc::vec::Vec<usize> = table[index].backlog.drain(..).collect();
    for child in children {
        cb_clear(table, child);
    }

    rtq::clear(&mut table[index]);
    table[index] = Cb::new();
}

/// Advance `snd.una` if `ack` is strictly newer and within the
/// outstanding window, draining any now-fully-acknowledged retransmission
/// entries. Returns whether `snd.una` moved.
pub(crate) fn advance_una(cb: &mut Cb, ack: u32) -> bool {
    if is_seq_gt(ack, cb.snd.una) && is_seq_lte(ack, cb.snd.nxt) {
        cb.snd.una = ack;
        rtq::drain_acked(cb);
        true
    } else {
        false
    }
}

pub(crate) fn send_bare_ack(table: &mut [Cb], index: usize) {
    let (local_ip, peer_ip, peer_port, seq, ack) = {
        let cb = &table[index];
        (cb.local_ip, cb.peer_addr, cb.peer_port, cb.snd.nxt, cb.rcv.nxt)
    };
    send::tx(&mut table[index], local_ip, peer_ip, peer_port, seq, ack, ACK, &[]);
}

pub(crate) fn wake_cb(index: usize) {
    crate::task::scheduler::wake_on(index);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_gt_handles_wraparound() {
        assert!(is_seq_gt(5, u32::MAX - 2));
        assert!(!is_seq_gt(u32::MAX - 2, 5));
        assert!(!is_seq_gt(10, 10));
    }

    #[test]
    fn seq_gte_and_lte_agree_at_equality() {
        assert!(is_seq_gte(10, 10));
        assert!(is_seq_lte(10, 10));
    }

    #[test]
    fn advance_una_moves_forward_within_window() {
        let mut cb = Cb::new();
        cb.snd.una = 100;
        cb.snd.nxt = 200;
        assert!(advance_una(&mut cb, 150));
        assert_eq!(cb.snd.una, 150);
    }

    #[test]
    fn advance_una_rejects_ack_beyond_nxt() {
        let mut cb = Cb::new();
        cb.snd.una = 100;
        cb.snd.nxt = 200;
        assert!(!advance_una(&mut cb, 250));
        assert_eq!(cb.snd.una, 100);
    }

    #[test]
    fn cb_clear_frees_slot_and_recurses_into_backlog() {
        let mut table: alloc::vec::Vec<Cb> = (0..4).map(|_| Cb::new()).collect();
        table[0].used = true;
        table[0].state = TcpState::Listen;
        table[0].backlog.push_back(1);
        table[1].used = true;
        table[1].state = TcpState::Established;

        cb_clear(&mut table, 0);

        assert!(!table[0].used);
        assert!(!table[1].used);
    }
}

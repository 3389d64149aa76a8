//! Retransmission queue — per-CB record of transmitted segments kept in
//! case they need replaying. Append-only during normal operation; drained
//! wholesale on close.

use alloc::vec::Vec;
use super::cb::{Cb, RtqEntry};

/// Append a copy of a just-transmitted segment to `cb`'s retransmission
/// queue. `seq_len` is the number of sequence numbers the segment
/// consumes (`plen` plus one per SYN/FIN) — not `data.len()`, which also
/// counts the 20-byte header. Called by `tx` after handing the segment
/// to IP.
pub(crate) fn enqueue(cb: &mut Cb, seq: u32, seq_len: u32, sent_tick: u32, data: Vec<u8>) {
    cb.txq.push_back(RtqEntry { seq, sent_tick, seq_len, data });
}

/// Drop every entry whose sequence number has been fully acknowledged
/// (`seq + seq_len <= una`, modular). Called after `snd.una` advances.
pub(crate) fn drain_acked(cb: &mut Cb) {
    let una = cb.snd.una;
    cb.txq.retain(|e| {
        let end = e.seq.wrapping_add(e.seq_len.max(1));
        super::util::is_seq_gt(end, una)
    });
}

/// Free the entire queue. Called from `cb_clear`.
pub(crate) fn clear(cb: &mut Cb) {
    cb.txq.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::tcp::cb::Cb;

    #[test]
    fn enqueue_then_clear_empties_queue() {
        let mut cb = Cb::new();
        enqueue(&mut cb, 100, 3, 0, alloc::vec![1, 2, 3]);
        assert_eq!(cb.txq.len(), 1);
        clear(&mut cb);
        assert_eq!(cb.txq.len(), 0);
    }

    #[test]
    fn drain_acked_removes_fully_acknowledged_entries() {
        let mut cb = Cb::new();
        enqueue(&mut cb, 100, 4, 0, alloc::vec![1, 2, 3, 4]);
        enqueue(&mut cb, 104, 2, 0, alloc::vec![5, 6]);
        cb.snd.una = 104;
        drain_acked(&mut cb);
        assert_eq!(cb.txq.len(), 1);
        assert_eq!(cb.txq[0].seq, 104);
    }

    #[test]
    fn drain_acked_uses_seq_len_not_wire_byte_length() {
        // A bare SYN only consumes one sequence number, even though its
        // enqueued byte length is the full 20-byte header.
        let mut cb = Cb::new();
        let iss = 1000u32;
        enqueue(&mut cb, iss, 1, 0, alloc::vec![0u8; 20]);
        cb.snd.una = iss.wrapping_add(1);
        drain_acked(&mut cb);
        assert_eq!(cb.txq.len(), 0);
    }
}

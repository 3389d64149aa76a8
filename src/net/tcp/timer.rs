//! Retransmission timer — the spec leaves this optional; this crate
//! realises it as a best-effort hook called from `net::poll()` rather
//! than a dedicated periodic task, since the scheduler here has no
//! timer-wheel primitive of its own. Exponential backoff, a retry
//! ceiling, delayed ACKs, and TIME_WAIT expiry are explicitly out of
//! scope (`SPEC_FULL.md` §4.4) — `close()` clears its own CB on wake
//! rather than this timer aging it out of TIME_WAIT.

use super::cb::{RETRANSMIT_TICKS, TcpState};
use super::{util, CBT};

/// Walk every used CB's retransmission queue and re-send entries whose
/// sequence is still unacknowledged and older than `RETRANSMIT_TICKS`.
/// Skipped entirely if the CBT hasn't been initialised yet.
pub(crate) fn check_retransmissions() {
    let mut guard = CBT.lock();
    let table = match guard.as_mut() {
        Some(t) => t,
        None => return,
    };

    let now = crate::arch::hal::timer_current_ticks();

    for index in 0..table.len() {
        if !table[index].used || !table[index].state.is_synchronized()
            || table[index].state == TcpState::Listen
        {
            continue;
        }

        let una = table[index].snd.una;
        let due: alloc::vec::Vec<(u32, alloc::vec::Vec<u8>)> = table[index]
            .txq
            .iter()
            .filter(|e| {
                util::is_seq_gte(e.seq, una) && now.wrapping_sub(e.sent_tick) >= RETRANSMIT_TICKS
            })
            .map(|e| (e.seq, e.data.clone()))
            .collect();

        for (seq, data) in due {
            let peer_ip = table[index].peer_addr;
            crate::net::ipv4::send_ipv4(peer_ip, crate::net::ipv4::PROTO_TCP, &data);
            if let Some(entry) = table[index].txq.iter_mut().find(|e| e.seq == seq) {
                entry.sent_tick = now;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::cb::Cb;

    #[test]
    fn skips_when_cbt_uninitialised() {
        *CBT.lock() = None;
        check_retransmissions();
    }

    #[test]
    fn leaves_fresh_queue_entries_untouched() {
        let mut table: alloc::vec::Vec<Cb> = (0..2).map(|_| Cb::new()).collect();
        table[0].used = true;
        table[0].state = TcpState::Established;
        table[0].snd.una = 100;
        let tick = crate::arch::hal::timer_current_ticks();
        table[0].txq.push_back(super::super::cb::RtqEntry { seq: 100, sent_tick: tick, data: alloc::vec![0u8; 20] });
        *CBT.lock() = Some(table);

        check_retransmissions();

        assert_eq!(CBT.lock().as_ref().unwrap()[0].txq.len(), 1);
        *CBT.lock() = None;
    }
}

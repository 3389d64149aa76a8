//! Receive path: payload acceptance into the fixed receive buffer, and
//! the blocking `recv()` socket call that drains it.

use super::cb::{Cb, WINDOW_CAPACITY};
use super::CBT;
use crate::task::scheduler;

/// Copy `payload` into `cb.window` at the current write offset, advance
/// `rcv.nxt`, and shrink `rcv.wnd`. Caller (the state machine) has
/// already verified `payload.len() <= cb.rcv.wnd as usize`; a segment
/// that doesn't fit is dropped before this is reached — this spec leaves
/// that case otherwise unhandled.
pub(crate) fn accept_payload(cb: &mut Cb, payload: &[u8]) {
    let offset = WINDOW_CAPACITY - cb.rcv.wnd as usize;
    let len = payload.len().min(cb.rcv.wnd as usize);
    cb.window[offset..offset + len].copy_from_slice(&payload[..len]);
    cb.rcv.nxt = cb.rcv.nxt.wrapping_add(len as u32);
    cb.rcv.wnd -= len as u16;
}

/// Blocking receive. Sleeps on the CB's channel while no data is
/// available and the connection is still receive-ready; returns 0 on
/// clean remote close (no data, not receive-ready), -1 if killed while
/// waiting, or the number of bytes copied (compacting the buffer
/// afterwards and growing `rcv.wnd` back by that count).
pub(crate) fn recv(socket: usize, buf: &mut [u8]) -> i32 {
    loop {
        {
            let mut guard = CBT.lock();
            let table = match guard.as_mut() {
                Some(t) => t,
                None => return -1,
            };
            if socket >= table.len() || !table[socket].used {
                return -1;
            }

            let cb = &mut table[socket];
            let available = cb.available();

            if available > 0 {
                let n = buf.len().min(available);
                buf[..n].copy_from_slice(&cb.window[..n]);
                cb.window.copy_within(n..available, 0);
                cb.rcv.wnd += n as u16;
                return n as i32;
            }

            if !cb.state.is_receive_ready() {
                return 0;
            }
        }

        if scheduler::is_current_killed() {
            return -1;
        }
        scheduler::sleep_on(socket);
        if scheduler::is_current_killed() {
            return -1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::cb::TcpState;

    #[test]
    fn accept_payload_advances_rcv_nxt_and_shrinks_window() {
        let mut cb = Cb::new();
        cb.rcv.nxt = 0x500;
        cb.rcv.wnd = WINDOW_CAPACITY as u16;
        accept_payload(&mut cb, b"hi");
        assert_eq!(cb.rcv.nxt, 0x502);
        assert_eq!(cb.rcv.wnd, WINDOW_CAPACITY as u16 - 2);
        assert_eq!(&cb.window[..2], b"hi");
    }

    #[test]
    fn recv_returns_zero_on_empty_close_wait() {
        let mut table: alloc::vec::Vec<Cb> = (0..2).map(|_| Cb::new()).collect();
        table[0].used = true;
        table[0].state = TcpState::CloseWait;
        *CBT.lock() = Some(table);
        let mut buf = [0u8; 16];
        assert_eq!(recv(0, &mut buf), 0);
        *CBT.lock() = None;
    }

    #[test]
    fn recv_returns_available_bytes_and_grows_window_back() {
        let mut table: alloc::vec::Vec<Cb> = (0..2).map(|_| Cb::new()).collect();
        table[0].used = true;
        table[0].state = TcpState::Established;
        table[0].rcv.wnd = WINDOW_CAPACITY as u16;
        accept_payload(&mut table[0], b"hi");
        *CBT.lock() = Some(table);

        let mut buf = [0u8; 16];
        let n = recv(0, &mut buf);
        assert_eq!(n, 2);
        assert_eq!(&buf[..2], b"hi");
        assert_eq!(CBT.lock().as_ref().unwrap()[0].rcv.wnd, WINDOW_CAPACITY as u16);
        *CBT.lock() = None;
    }
}

//! Kernel memory management. The TCP core's fixed-size CBT does not
//! itself need a heap, but its owned `Vec`/`VecDeque` fields (retransmission
//! queue entries, backlog, receive buffers, the CBT itself) do — this
//! module supplies the one thing the rest of the skeleton needs: a
//! `#[global_allocator]`.

pub mod heap;

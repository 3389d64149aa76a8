//! Minimal cooperative scheduler.
//!
//! The TCP core needs exactly four primitives from a process scheduler:
//! the current task's id, a way to block a task on an address until
//! something wakes that address, a way to wake every task blocked on an
//! address, and a cooperative kill flag a blocked task can observe. This
//! module provides those four and nothing else — no paging, no signals,
//! no syscall ABI, no preemptive context switch. It generalises the host
//! kernel's `sleep_until`/`wake_thread` pair (which parks a task until a
//! fixed tick deadline and wakes it by tid) into genuine address-keyed,
//! multi-waiter sleep/wakeup, because the TCP core sleeps on a *condition*
//! (backlog non-empty, bytes available, state left SYN_SENT) rather than
//! a timeout.
//!
//! Waking happens by direct call from whichever path makes the predicate
//! true (the IP receive callback, another task's `close`). There is no
//! real context switch: a blocked task spins with interrupts enabled,
//! which is how a single-core kernel's interrupt-driven wakeup works
//! without needing a second stack to switch to.

use alloc::collections::BTreeMap;
use core::sync::atomic::{AtomicU32, Ordering};
use crate::sync::spinlock::Spinlock;

struct TaskState {
    killed: bool,
    waiting_on: Option<usize>,
}

struct Scheduler {
    tasks: BTreeMap<u32, TaskState>,
    /// Generation counter per channel; bumped by `wake_on` so a sleeper's
    /// spin loop can detect "something changed" even if it can't directly
    /// observe the predicate it's waiting on.
    generations: BTreeMap<usize, u64>,
}

static NEXT_TID: AtomicU32 = AtomicU32::new(1);
static CURRENT_TID: AtomicU32 = AtomicU32::new(0);
static SCHED: Spinlock<Scheduler> = Spinlock::new(Scheduler {
    tasks: BTreeMap::new(),
    generations: BTreeMap::new(),
});

/// Register the boot task (tid 0) so it has kill-flag bookkeeping.
pub fn init() {
    let mut s = SCHED.lock();
    s.tasks.insert(0, TaskState { killed: false, waiting_on: None });
}

/// Register a new logical task and return its id. Bookkeeping only: this
/// scheduler does not itself run the task on a separate stack.
pub fn spawn() -> u32 {
    let tid = NEXT_TID.fetch_add(1, Ordering::Relaxed);
    let mut s = SCHED.lock();
    s.tasks.insert(tid, TaskState { killed: false, waiting_on: None });
    tid
}

/// The currently executing task's id.
pub fn current_tid() -> u32 {
    CURRENT_TID.load(Ordering::Relaxed)
}

/// Switch the "current task" identity (test and harness use only — in a
/// real preemptive scheduler this is implicit in which stack is running).
pub fn set_current_tid(tid: u32) {
    CURRENT_TID.store(tid, Ordering::Relaxed);
}

/// Has the current task been asked to die while it slept?
pub fn is_current_killed() -> bool {
    let s = SCHED.lock();
    s.tasks.get(&current_tid()).map_or(false, |t| t.killed)
}

/// Mark a task's kill flag. A task already sleeping observes this the
/// next time it re-checks its predicate.
pub fn kill(tid: u32) {
    let mut s = SCHED.lock();
    if let Some(t) = s.tasks.get_mut(&tid) {
        t.killed = true;
    }
}

/// Block the current task on `channel` until [`wake_on`] is called for
/// that channel or the task is killed. Does not take or release any
/// caller-held lock itself — callers must drop the `tcplock` guard before
/// calling `sleep_on` and re-acquire it after, exactly as xv6's
/// `sleep(chan, lock)` drops and re-acquires its process-table lock.
///
/// Re-checks the kill flag on every spin so cancellation is observed
/// promptly rather than only at call entry.
pub fn sleep_on(channel: usize) {
    let tid = current_tid();
    let start_gen = {
        let mut s = SCHED.lock();
        if let Some(t) = s.tasks.get_mut(&tid) {
            t.waiting_on = Some(channel);
        }
        *s.generations.get(&channel).unwrap_or(&0)
    };

    loop {
        if is_current_killed() {
            break;
        }
        let gen = SCHED.lock().generations.get(&channel).copied().unwrap_or(0);
        if gen != start_gen {
            break;
        }
        crate::arch::hal::enable_interrupts();
        crate::arch::hal::halt();
    }

    let mut s = SCHED.lock();
    if let Some(t) = s.tasks.get_mut(&tid) {
        t.waiting_on = None;
    }
}

/// Wake every task blocked on `channel`. Safe to call with zero waiters
/// (the common case when, e.g., a payload segment arrives on a connection
/// nobody is currently `recv`-ing on).
pub fn wake_on(channel: usize) {
    let mut s = SCHED.lock();
    let gen = s.generations.entry(channel).or_insert(0);
    *gen = gen.wrapping_add(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wake_on_bumps_generation_for_future_sleepers() {
        wake_on(999);
        wake_on(999);
        let s = SCHED.lock();
        assert!(*s.generations.get(&999).unwrap() >= 2);
    }

    #[test]
    fn kill_flag_observed() {
        let tid = spawn();
        set_current_tid(tid);
        assert!(!is_current_killed());
        kill(tid);
        assert!(is_current_killed());
    }
}

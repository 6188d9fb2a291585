//! Synchronous RPC built on the participant message substrate (§4.6).
//!
//! Grounded closely in `original_source/linux/drivers/char/fusion/call.c`:
//! an `Execution` is heap-allocated there and only `kfree`d by whichever
//! side reads it last, even though `remove_execution` takes it off the
//! call's list as soon as `return()` resolves it. The direct translation
//! is an `Arc<Execution>` that `return_value` removes from `Call`'s list
//! while the caller's `wait_for_return` keeps its own clone alive to read.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::ThreadId;

use fusion_abi::CallHandler;

use crate::error::{FusionError, FusionResult};
use crate::ids::{CallId, IdGenerator, ParticipantId};
use crate::wait::{Interrupt, POLL_INTERVAL};

struct ExecutionInner {
    ret_val: i32,
    executed: bool,
    orphaned: bool,
    /// Skirmish ids transferred from caller to owner for this serial
    /// (§4.6 priority-inversion avoidance), reclaimed on return.
    transferred: Vec<u32>,
}

/// One outstanding (non-one-way) invocation. `caller_participant`/
/// `caller_pid`/`caller_thread` stay populated even once `orphaned`, so
/// `return` can still undo the skirmish transfer against the right owner.
pub struct Execution {
    pub serial: u32,
    pub caller_participant: ParticipantId,
    pub caller_pid: u32,
    pub caller_thread: ThreadId,
    inner: Mutex<ExecutionInner>,
    cv: Condvar,
    call_destroyed: Arc<AtomicBool>,
}

impl Execution {
    /// Block until the owner calls `return` on this serial, the call is
    /// destroyed, or `interrupt` fires. A signalled wait orphans the
    /// execution rather than removing it — `return` still runs later and
    /// undoes the skirmish transfer, matching the original's comment
    /// that orphaning "won't be freed by caller".
    pub fn wait_for_return(&self, interrupt: &Interrupt) -> FusionResult<i32> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.executed {
                return Ok(inner.ret_val);
            }
            if self.call_destroyed.load(Ordering::Acquire) {
                return Err(FusionError::Gone);
            }
            if interrupt.is_signalled() {
                inner.orphaned = true;
                return Err(FusionError::Interrupted);
            }
            inner = self.cv.wait_timeout(inner, POLL_INTERVAL).unwrap().0;
        }
    }
}

/// What `return_value` found and did, so `World` knows whose skirmishes
/// to reclaim and whether to wake a caller at all.
pub enum ReturnOutcome {
    Delivered {
        caller_participant: ParticipantId,
        caller_pid: u32,
        caller_thread: ThreadId,
        transferred: Vec<u32>,
    },
    OrphanFreed {
        caller_participant: ParticipantId,
        caller_pid: u32,
        caller_thread: ThreadId,
        transferred: Vec<u32>,
    },
}

struct CallState {
    executions: VecDeque<Arc<Execution>>,
    invocation_count: u64,
    pending_requests: u64,
}

pub struct Call {
    pub id: CallId,
    pub creator_pid: u32,
    pub owner: ParticipantId,
    pub handler: CallHandler,
    serials: IdGenerator,
    state: Mutex<CallState>,
    cv: Condvar,
    destroyed: Arc<AtomicBool>,
    request_seq: AtomicU64,
    /// Executions returned after their caller had already been
    /// interrupted (§3 SUPPLEMENT: introspection only).
    orphaned_count: AtomicU64,
}

impl Call {
    pub fn new(id: u32, creator_pid: u32, owner: ParticipantId, handler: CallHandler) -> Self {
        Self {
            id: CallId(id),
            creator_pid,
            owner,
            handler,
            serials: IdGenerator::new(),
            state: Mutex::new(CallState {
                executions: VecDeque::new(),
                invocation_count: 0,
                pending_requests: 0,
            }),
            cv: Condvar::new(),
            destroyed: Arc::new(AtomicBool::new(false)),
            request_seq: AtomicU64::new(0),
            orphaned_count: AtomicU64::new(0),
        }
    }

    pub fn invocation_count(&self) -> u64 {
        self.state.lock().unwrap().invocation_count
    }

    pub fn orphaned_count(&self) -> u64 {
        self.orphaned_count.load(Ordering::Relaxed)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Wakes every outstanding execution and idle-waiter with `Gone`.
    pub fn mark_destroyed(&self) {
        self.destroyed.store(true, Ordering::Release);
        let s = self.state.lock().unwrap();
        for exec in &s.executions {
            exec.cv.notify_all();
        }
        drop(s);
        self.cv.notify_all();
    }

    /// Allocates a fresh non-zero serial — unconditionally, even for
    /// one-way calls, matching the original's internal counter — and,
    /// unless one-way, registers the `Execution` the caller will wait
    /// on. Also bumps the invocation counter, which the original
    /// increments for every execute regardless of one-way-ness. The
    /// wire-visible serial is masked to 0 for one-way calls by the
    /// caller when it builds the request payload, not here.
    pub fn begin_execution(
        &self,
        caller: ParticipantId,
        caller_pid: u32,
        caller_thread: ThreadId,
        oneway: bool,
    ) -> FusionResult<(u32, Option<Arc<Execution>>)> {
        if self.is_destroyed() {
            return Err(FusionError::Gone);
        }
        let serial = self.serials.next_nonzero();
        let mut s = self.state.lock().unwrap();
        s.invocation_count += 1;
        if oneway {
            return Ok((serial, None));
        }
        let execution = Arc::new(Execution {
            serial,
            caller_participant: caller,
            caller_pid,
            caller_thread,
            inner: Mutex::new(ExecutionInner {
                ret_val: 0,
                executed: false,
                orphaned: false,
                transferred: Vec::new(),
            }),
            cv: Condvar::new(),
            call_destroyed: self.destroyed.clone(),
        });
        s.executions.push_back(execution.clone());
        Ok((serial, Some(execution)))
    }

    /// Record which skirmish ids were transferred from caller to owner
    /// for `execution`'s serial, so `return` can undo it later.
    pub fn record_transfer(&self, execution: &Execution, ids: Vec<u32>) {
        execution.inner.lock().unwrap().transferred = ids;
    }

    /// `return` (§4.6): oldest-first scan for the matching, unresolved
    /// serial. `NoMatch` if none is found — API 4 has no one-way return
    /// compatibility fallback.
    pub fn return_value(&self, serial: u32, val: i32) -> FusionResult<ReturnOutcome> {
        let mut s = self.state.lock().unwrap();
        let Some(pos) = s.executions.iter().position(|e| e.serial == serial) else {
            log::debug!("call {}: return for unknown serial {serial}", self.id);
            return Err(FusionError::NoMatch);
        };
        let exec = s.executions.remove(pos).unwrap();
        let executions_empty = s.executions.is_empty();
        drop(s);
        if executions_empty {
            self.cv.notify_all();
        }

        let mut inner = exec.inner.lock().unwrap();
        let orphaned = inner.orphaned;
        inner.ret_val = val;
        inner.executed = true;
        let transferred = std::mem::take(&mut inner.transferred);
        drop(inner);
        exec.cv.notify_all();

        if orphaned {
            self.orphaned_count.fetch_add(1, Ordering::Relaxed);
        }

        Ok(if orphaned {
            ReturnOutcome::OrphanFreed {
                caller_participant: exec.caller_participant,
                caller_pid: exec.caller_pid,
                caller_thread: exec.caller_thread,
                transferred,
            }
        } else {
            ReturnOutcome::Delivered {
                caller_participant: exec.caller_participant,
                caller_pid: exec.caller_pid,
                caller_thread: exec.caller_thread,
                transferred,
            }
        })
    }

    /// Bumped once per `execute`/`execute2` (one-way included) right
    /// after the request message is enqueued; paired with
    /// `note_request_consumed` once the owner actually reads it back out
    /// of its FIFO, so `destroy` can wait for the owner's mailbox to
    /// drain before tearing the call down.
    pub fn note_request_sent(&self) {
        let mut s = self.state.lock().unwrap();
        s.pending_requests += 1;
    }

    pub fn note_request_consumed(&self) {
        let mut s = self.state.lock().unwrap();
        if s.pending_requests > 0 {
            s.pending_requests -= 1;
        }
        let drained = s.pending_requests == 0;
        drop(s);
        if drained {
            self.cv.notify_all();
        }
    }

    pub fn next_request_seq(&self) -> u64 {
        self.request_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// First half of `destroy` (§4.6): block until every request this
    /// call has sent has been drained from the owner's FIFO.
    pub fn wait_requests_drained(&self, interrupt: &Interrupt) -> FusionResult<()> {
        let mut s = self.state.lock().unwrap();
        loop {
            if s.pending_requests == 0 {
                return Ok(());
            }
            if interrupt.is_signalled() {
                return Err(FusionError::Interrupted);
            }
            s = self.cv.wait_timeout(s, POLL_INTERVAL).unwrap().0;
        }
    }

    /// Second half of `destroy`: block until no executions remain.
    pub fn wait_executions_drained(&self, interrupt: &Interrupt) -> FusionResult<()> {
        let mut s = self.state.lock().unwrap();
        loop {
            if s.executions.is_empty() {
                return Ok(());
            }
            if interrupt.is_signalled() {
                return Err(FusionError::Interrupted);
            }
            s = self.cv.wait_timeout(s, POLL_INTERVAL).unwrap().0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fusion_abi::CallHandler;

    fn handler() -> CallHandler {
        CallHandler { handler: 0, ctx: 0 }
    }

    #[test]
    fn oneway_execute_skips_execution_but_counts_invocation() {
        let call = Call::new(0, 1, ParticipantId(9), handler());
        let (serial, exec) = call
            .begin_execution(ParticipantId(1), 100, std::thread::current().id(), true)
            .unwrap();
        assert!(serial > 0);
        assert!(exec.is_none());
        assert_eq!(call.invocation_count(), 1);
    }

    #[test]
    fn return_delivers_value_to_waiting_execution() {
        let call = Call::new(0, 1, ParticipantId(9), handler());
        let (serial, exec) = call
            .begin_execution(ParticipantId(1), 100, std::thread::current().id(), false)
            .unwrap();
        let exec = exec.unwrap();
        assert!(serial > 0);

        call.return_value(serial, 42).unwrap();
        let interrupt = Interrupt::new();
        assert_eq!(exec.wait_for_return(&interrupt), Ok(42));
    }

    #[test]
    fn return_after_interrupt_counts_as_orphaned() {
        let call = Call::new(0, 1, ParticipantId(9), handler());
        let (serial, exec) = call
            .begin_execution(ParticipantId(1), 100, std::thread::current().id(), false)
            .unwrap();
        let exec = exec.unwrap();

        let interrupt = Interrupt::new();
        interrupt.signal();
        assert_eq!(exec.wait_for_return(&interrupt), Err(FusionError::Interrupted));

        assert!(matches!(
            call.return_value(serial, 7).unwrap(),
            ReturnOutcome::OrphanFreed { .. }
        ));
        assert_eq!(call.orphaned_count(), 1);
    }

    #[test]
    fn return_with_unknown_serial_is_no_match() {
        let call = Call::new(0, 1, ParticipantId(9), handler());
        assert_eq!(call.return_value(999, 0), Err(FusionError::NoMatch));
    }

    #[test]
    fn destroy_waits_are_satisfied_once_drained() {
        let call = Call::new(0, 1, ParticipantId(9), handler());
        let interrupt = Interrupt::new();
        call.note_request_sent();
        call.note_request_consumed();
        call.wait_requests_drained(&interrupt).unwrap();
        call.wait_executions_drained(&interrupt).unwrap();
    }
}

//! The blocking idiom used by every suspension point in §5: release the
//! entry's mutex, sleep on its condvar, reacquire on wake, and re-check
//! both "has this entry been destroyed" and "am I still interrupted"
//! before deciding whether the wait is over.
//!
//! The real driver puts a thread on `wait_queue_head_t` and wakes it
//! with `wake_up_interruptible_all`, racing a `signal_pending` check on
//! resume. A `Condvar` paired with the entry's own `Mutex` is the
//! direct translation DESIGN NOTES §9 calls for. Because there is no
//! real signal delivery in a plain library, callers pass an explicit
//! [`Interrupt`] token instead of relying on process-wide signal state;
//! waits poll it on a short interval rather than blocking indefinitely,
//! so a signal delivered mid-sleep is noticed promptly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::FusionError;

/// How often a bounded wait rechecks its [`Interrupt`] and deadline.
pub const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A cancellation token standing in for "a signal was delivered to the
/// blocked thread". Cheap to clone; signalling is visible to every
/// clone and to every wait already in progress.
#[derive(Clone, Debug, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Mark this token as signalled. Any wait using it wakes with
    /// `Interrupted` within one poll interval.
    pub fn signal(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_signalled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Reset so the same token can be reused for a subsequent wait.
    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Park on `cv` (backed by the mutex `guard` already holds) until
/// `ready` is satisfied, `gone` is satisfied (entry destroyed under us),
/// the token is signalled, or an optional absolute `deadline` passes.
///
/// On every wake the lock is held again before `ready`/`gone` are
/// re-evaluated, exactly as if the caller had re-resolved the entry by
/// id: nothing downstream of this call ever observes a half-woken
/// state.
pub fn wait_for<'a, T>(
    mut guard: MutexGuard<'a, T>,
    cv: &std::sync::Condvar,
    interrupt: &Interrupt,
    deadline: Option<Instant>,
    mut ready: impl FnMut(&T) -> bool,
    mut gone: impl FnMut(&T) -> bool,
) -> Result<MutexGuard<'a, T>, FusionError> {
    loop {
        if gone(&guard) {
            return Err(FusionError::Gone);
        }
        if ready(&guard) {
            return Ok(guard);
        }
        if interrupt.is_signalled() {
            return Err(FusionError::Interrupted);
        }

        let wait_time = match deadline {
            Some(dl) => {
                let now = Instant::now();
                if now >= dl {
                    return Err(FusionError::TimedOut);
                }
                (dl - now).min(POLL_INTERVAL)
            }
            None => POLL_INTERVAL,
        };

        guard = cv.wait_timeout(guard, wait_time).unwrap().0;
    }
}

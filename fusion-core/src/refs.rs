//! Distributed reference counts (§4.2).
//!
//! Each `Ref` tracks a `global` count (kernel-internal holders) and a
//! `local` count broken down per participant, plus an optional
//! inheritance link to a parent ref whose `local` it mirrors. The
//! cross-entry bookkeeping this implies — propagating deltas to
//! descendants, firing a watch, walking the parent chain for cycles —
//! is orchestrated by `World` (see `world.rs`), which is the only place
//! that is allowed to hold two `Ref` entries' locks at once (and then
//! only one at a time, released before recursing, per §5's documented
//! concession).

use std::collections::HashMap;
use std::sync::{Condvar, Mutex};

use crate::error::{FusionError, FusionResult};
use crate::ids::{CallId, ParticipantId, RefId};
use crate::wait::{self, Interrupt};

pub struct RefState {
    pub own_local: u64,
    pub local_map: HashMap<u32, u64>,
    pub inherited_local: u64,
    pub global: u64,
    pub watch: Option<(CallId, u32)>,
    pub lock_owner: Option<ParticipantId>,
    pub inherited_from: Option<RefId>,
    pub children: std::collections::HashSet<u32>,
    pub destroyed: bool,
}

impl RefState {
    pub fn local(&self) -> u64 {
        self.own_local + self.inherited_local
    }

    pub fn total(&self) -> u64 {
        self.global + self.local()
    }
}

pub struct Ref {
    pub id: RefId,
    pub creator_pid: u32,
    state: Mutex<RefState>,
    cv: Condvar,
}

impl Ref {
    pub fn new(id: u32, creator_pid: u32) -> Self {
        Self {
            id: RefId(id),
            creator_pid,
            state: Mutex::new(RefState {
                own_local: 0,
                local_map: HashMap::new(),
                inherited_local: 0,
                global: 0,
                watch: None,
                lock_owner: None,
                inherited_from: None,
                children: std::collections::HashSet::new(),
                destroyed: false,
            }),
            cv: Condvar::new(),
        }
    }

    pub fn lock(&self) -> std::sync::MutexGuard<'_, RefState> {
        self.state.lock().unwrap()
    }

    pub fn condvar(&self) -> &Condvar {
        &self.cv
    }

    pub fn notify_all(&self) {
        self.cv.notify_all();
    }

    /// `up` (§4.2): increments global, or the caller's local entry.
    /// Rejected with `Busy` while zero-locked.
    pub fn up(&self, participant: Option<ParticipantId>) -> FusionResult<(u64, u64)> {
        let mut s = self.lock();
        if s.lock_owner.is_some() {
            return Err(FusionError::Busy);
        }
        let before = s.total();
        match participant {
            Some(p) => {
                *s.local_map.entry(p.raw()).or_insert(0) += 1;
                s.own_local += 1;
            }
            None => s.global += 1,
        }
        let after = s.total();
        Ok((before, after))
    }

    /// `down` (§4.2): `Underflow` if the relevant count is already
    /// zero; `Busy` while zero-locked.
    pub fn down(&self, participant: Option<ParticipantId>) -> FusionResult<(u64, u64)> {
        let mut s = self.lock();
        if s.lock_owner.is_some() {
            return Err(FusionError::Busy);
        }
        let before = s.total();
        match participant {
            Some(p) => {
                let entry = s.local_map.get_mut(&p.raw());
                match entry {
                    Some(n) if *n > 0 => {
                        *n -= 1;
                        let now_zero = *n == 0;
                        s.own_local -= 1;
                        if now_zero {
                            s.local_map.remove(&p.raw());
                        }
                    }
                    _ => return Err(FusionError::Underflow),
                }
            }
            None => {
                if s.global == 0 {
                    return Err(FusionError::Underflow);
                }
                s.global -= 1;
            }
        }
        let after = s.total();
        Ok((before, after))
    }

    /// Drop every local count this participant holds, as part of
    /// teardown (§4.1). Returns `(before, after)` totals if the
    /// participant held any local count at all.
    pub fn drop_local_of(&self, participant: ParticipantId) -> Option<(u64, u64)> {
        let mut s = self.lock();
        let n = s.local_map.remove(&participant.raw())?;
        if n == 0 {
            return None;
        }
        let before = s.total();
        debug_assert!(s.own_local >= n, "own_local below what local_map recorded for this participant");
        s.own_local -= n;
        let after = s.total();
        Some((before, after))
    }

    pub fn stat(&self) -> u64 {
        self.lock().total()
    }

    /// Install a watch (§4.2): mutually exclusive with zero-lock,
    /// single-shot, requires a nonzero count and no existing watch.
    pub fn watch(&self, call_id: CallId, arg: u32) -> FusionResult<()> {
        let mut s = self.lock();
        if s.lock_owner.is_some() {
            return Err(FusionError::Busy);
        }
        if s.watch.is_some() {
            return Err(FusionError::AlreadyWatched);
        }
        if s.total() == 0 {
            return Err(FusionError::Invalid);
        }
        s.watch = Some((call_id, arg));
        Ok(())
    }

    /// Single-shot: take and clear the watch, if any.
    pub fn take_watch(&self) -> Option<(CallId, u32)> {
        self.lock().watch.take()
    }

    /// Blocking zero-lock (§4.2): waits for the total count to reach
    /// zero, releasing the entry lock while asleep and re-checking for
    /// destruction on every wake.
    pub fn zero_lock(&self, participant: ParticipantId, interrupt: &Interrupt) -> FusionResult<()> {
        let mut s = self.lock();
        if s.watch.is_some() {
            return Err(FusionError::Busy);
        }
        s = wait::wait_for(
            s,
            &self.cv,
            interrupt,
            None,
            |st| st.total() == 0,
            |st| st.destroyed,
        )?;
        s.lock_owner = Some(participant);
        Ok(())
    }

    pub fn zero_trylock(&self, participant: ParticipantId) -> FusionResult<()> {
        let mut s = self.lock();
        if s.watch.is_some() {
            return Err(FusionError::Busy);
        }
        if s.total() > 0 {
            return Err(FusionError::StillReferenced);
        }
        s.lock_owner = Some(participant);
        Ok(())
    }

    pub fn unlock(&self, participant: ParticipantId) -> FusionResult<()> {
        let mut s = self.lock();
        if s.lock_owner != Some(participant) {
            return Err(FusionError::NotHolder);
        }
        s.lock_owner = None;
        drop(s);
        self.cv.notify_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn up_down_round_trip_leaves_count_unchanged() {
        let r = Ref::new(0, 1);
        let p = ParticipantId(5);
        r.up(Some(p)).unwrap();
        assert_eq!(r.stat(), 1);
        r.down(Some(p)).unwrap();
        assert_eq!(r.stat(), 0);
    }

    #[test]
    fn down_on_empty_local_underflows() {
        let r = Ref::new(0, 1);
        assert_eq!(r.down(Some(ParticipantId(5))), Err(FusionError::Underflow));
    }

    #[test]
    fn zero_trylock_fails_while_referenced() {
        let r = Ref::new(0, 1);
        r.up(Some(ParticipantId(1))).unwrap();
        assert_eq!(
            r.zero_trylock(ParticipantId(1)),
            Err(FusionError::StillReferenced)
        );
    }

    #[test]
    fn watch_requires_nonzero_count_and_is_single_shot() {
        let r = Ref::new(0, 1);
        assert_eq!(r.watch(CallId(0), 1), Err(FusionError::Invalid));
        r.up(Some(ParticipantId(1))).unwrap();
        r.watch(CallId(0), 1).unwrap();
        assert_eq!(r.watch(CallId(0), 1), Err(FusionError::AlreadyWatched));
        assert_eq!(r.take_watch(), Some((CallId(0), 1)));
        assert_eq!(r.take_watch(), None);
    }
}

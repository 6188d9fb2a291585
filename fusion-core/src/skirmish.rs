//! Recursive cross-process mutexes (§4.3).
//!
//! Ownership is keyed by `(participant, OS thread)`. The thread id
//! comes from `std::thread::current().id()`, the direct analogue of
//! the original driver's `current->pid` used as the lock owner key.

use std::collections::HashMap;
use std::sync::{Condvar, Mutex};
use std::thread::ThreadId;

use fusion_abi::MIN_SKIRMISH_PRE_ACQUIRED;

use crate::error::{FusionError, FusionResult};
use crate::ids::{ParticipantId, SkirmishId};
use crate::wait::{self, Interrupt};

#[derive(Clone, Copy, PartialEq, Eq)]
struct Holder {
    participant: ParticipantId,
    thread: ThreadId,
    depth: u32,
}

struct SkirmishState {
    held: Option<Holder>,
    pre_acquired: Vec<u32>,
    lock_total: u64,
    destroyed: bool,
}

pub struct Skirmish {
    pub id: SkirmishId,
    pub creator_pid: u32,
    state: Mutex<SkirmishState>,
    cv: Condvar,
}

impl Skirmish {
    pub fn new(id: u32, creator_pid: u32) -> Self {
        Self {
            id: SkirmishId(id),
            creator_pid,
            state: Mutex::new(SkirmishState {
                held: None,
                pre_acquired: Vec::new(),
                lock_total: 0,
                destroyed: false,
            }),
            cv: Condvar::new(),
        }
    }

    pub fn lock_count(&self, participant: ParticipantId) -> u32 {
        let s = self.state.lock().unwrap();
        let me = std::thread::current().id();
        match s.held {
            Some(h) if h.participant == participant && h.thread == me => h.depth,
            _ => 0,
        }
    }

    /// Total successful acquisitions over this skirmish's lifetime
    /// (§3 SUPPLEMENT: retained for introspection, not a correctness
    /// invariant).
    pub fn lock_total(&self) -> u64 {
        self.state.lock().unwrap().lock_total
    }

    pub fn mark_destroyed(&self) {
        let mut s = self.state.lock().unwrap();
        s.destroyed = true;
        self.cv.notify_all();
    }

    /// Blocking acquire (§4.3). `tracker` supplies this thread's
    /// currently-held skirmish ids for the deadlock diagnostic and is
    /// updated on success.
    pub fn prevail(
        &self,
        participant: ParticipantId,
        tracker: &SkirmishTracker,
        interrupt: &Interrupt,
    ) -> FusionResult<u32> {
        let me = std::thread::current().id();
        let mut s = self.state.lock().unwrap();
        loop {
            if s.destroyed {
                return Err(FusionError::Gone);
            }
            match s.held {
                Some(h) if h.participant == participant && h.thread == me => {
                    s.held = Some(Holder {
                        depth: h.depth + 1,
                        ..h
                    });
                    return Ok(s.held.unwrap().depth);
                }
                None => {
                    self.take_free(&mut s, participant, me, tracker);
                    return Ok(1);
                }
                Some(_) => {
                    self.log_potential_deadlock(participant, me, tracker);
                    s = wait::wait_for(
                        s,
                        &self.cv,
                        interrupt,
                        None,
                        |st| st.held.is_none(),
                        |st| st.destroyed,
                    )?;
                }
            }
        }
    }

    /// Non-blocking acquire (§4.3): `Busy` instead of waiting.
    pub fn swoop(
        &self,
        participant: ParticipantId,
        tracker: &SkirmishTracker,
    ) -> FusionResult<u32> {
        let me = std::thread::current().id();
        let mut s = self.state.lock().unwrap();
        if s.destroyed {
            return Err(FusionError::Gone);
        }
        match s.held {
            Some(h) if h.participant == participant && h.thread == me => {
                s.held = Some(Holder {
                    depth: h.depth + 1,
                    ..h
                });
                Ok(s.held.unwrap().depth)
            }
            None => {
                self.take_free(&mut s, participant, me, tracker);
                Ok(1)
            }
            Some(_) => Err(FusionError::Busy),
        }
    }

    pub fn dismiss(&self, participant: ParticipantId, tracker: &SkirmishTracker) -> FusionResult<u32> {
        let me = std::thread::current().id();
        let mut s = self.state.lock().unwrap();
        match s.held {
            Some(h) if h.participant == participant && h.thread == me => {
                let depth = h.depth - 1;
                if depth == 0 {
                    s.held = None;
                    tracker.remove(participant, me, self.id.raw());
                    drop(s);
                    self.cv.notify_all();
                } else {
                    s.held = Some(Holder { depth, ..h });
                }
                Ok(depth)
            }
            _ => Err(FusionError::NotHolder),
        }
    }

    /// Release unconditionally, e.g. on participant teardown or during
    /// a call's priority-inversion transfer. Returns the depth that was
    /// cleared, if any.
    pub fn force_release(&self, participant: ParticipantId, thread: ThreadId) -> Option<u32> {
        let mut s = self.state.lock().unwrap();
        match s.held {
            Some(h) if h.participant == participant && h.thread == thread => {
                let depth = h.depth;
                s.held = None;
                drop(s);
                self.cv.notify_all();
                Some(depth)
            }
            _ => None,
        }
    }

    /// Re-attribute an already-held lock to `new_owner`, preserving
    /// depth, for the duration of a call's priority-inversion transfer
    /// (§4.6). Only valid while held by `(participant, thread)`.
    pub fn transfer(&self, participant: ParticipantId, thread: ThreadId, new_owner: ParticipantId) {
        let mut s = self.state.lock().unwrap();
        if let Some(h) = s.held {
            if h.participant == participant && h.thread == thread {
                s.held = Some(Holder {
                    participant: new_owner,
                    ..h
                });
            }
        }
    }

    fn take_free(
        &self,
        s: &mut SkirmishState,
        participant: ParticipantId,
        thread: ThreadId,
        tracker: &SkirmishTracker,
    ) {
        let already_held = tracker.snapshot(participant, thread);
        s.pre_acquired = already_held
            .into_iter()
            .take(MIN_SKIRMISH_PRE_ACQUIRED)
            .collect();
        s.held = Some(Holder {
            participant,
            thread,
            depth: 1,
        });
        s.lock_total += 1;
        tracker.push(participant, thread, self.id.raw());
    }

    /// Advisory only (§4.3): if the acquiring thread already holds a
    /// skirmish that recorded *this* one among its pre-acquisitions,
    /// acquiring in the other order risks deadlock. Logged, never
    /// fails the operation.
    fn log_potential_deadlock(
        &self,
        participant: ParticipantId,
        thread: ThreadId,
        tracker: &SkirmishTracker,
    ) {
        if tracker.snapshot(participant, thread).is_empty() {
            return;
        }
        log::warn!(
            "skirmish {}: participant {participant} thread {thread:?} may be acquiring out of \
             the previously observed order (advisory only)",
            self.id
        );
    }
}

/// Tracks, per `(participant, thread)`, the skirmishes currently held,
/// in acquisition order. Shared by every `Skirmish` in a world so the
/// deadlock diagnostic and the call-time priority-inversion transfer
/// (§4.6) can both see "everything this thread holds right now".
#[derive(Default)]
pub struct SkirmishTracker {
    held: Mutex<HashMap<(u32, ThreadId), Vec<u32>>>,
}

impl SkirmishTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self, participant: ParticipantId, thread: ThreadId) -> Vec<u32> {
        self.held
            .lock()
            .unwrap()
            .get(&(participant.raw(), thread))
            .cloned()
            .unwrap_or_default()
    }

    pub fn push(&self, participant: ParticipantId, thread: ThreadId, skirmish_id: u32) {
        self.held
            .lock()
            .unwrap()
            .entry((participant.raw(), thread))
            .or_default()
            .push(skirmish_id);
    }

    pub fn remove(&self, participant: ParticipantId, thread: ThreadId, skirmish_id: u32) {
        let mut held = self.held.lock().unwrap();
        if let Some(list) = held.get_mut(&(participant.raw(), thread)) {
            list.retain(|id| *id != skirmish_id);
            if list.is_empty() {
                held.remove(&(participant.raw(), thread));
            }
        }
    }

    /// Remove and return every skirmish id held by `(participant,
    /// thread)`, for the caller-side half of a call transfer.
    pub fn take_all(&self, participant: ParticipantId, thread: ThreadId) -> Vec<u32> {
        self.held
            .lock()
            .unwrap()
            .remove(&(participant.raw(), thread))
            .unwrap_or_default()
    }

    /// Every `(thread, skirmish ids)` pair currently attributed to
    /// `participant`, across all its threads — used by participant
    /// teardown (§4.1's `skirmish.release_all_owned_by`), which must
    /// force-release locks regardless of which thread took them.
    pub fn drain_participant(&self, participant: ParticipantId) -> Vec<(ThreadId, Vec<u32>)> {
        let mut held = self.held.lock().unwrap();
        let keys: Vec<(u32, ThreadId)> = held
            .keys()
            .filter(|(p, _)| *p == participant.raw())
            .copied()
            .collect();
        keys.into_iter()
            .filter_map(|key| held.remove(&key).map(|ids| (key.1, ids)))
            .collect()
    }

    /// Re-attribute a set of skirmish ids to `(participant, thread)`,
    /// the undo half of a call transfer.
    pub fn restore(&self, participant: ParticipantId, thread: ThreadId, ids: Vec<u32>) {
        if ids.is_empty() {
            return;
        }
        self.held
            .lock()
            .unwrap()
            .entry((participant.raw(), thread))
            .or_default()
            .extend(ids);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recursive_prevail_and_dismiss_releases_at_depth_zero() {
        let s = Skirmish::new(0, 1);
        let tracker = SkirmishTracker::new();
        let interrupt = Interrupt::new();
        let p = ParticipantId(1);

        assert_eq!(s.prevail(p, &tracker, &interrupt).unwrap(), 1);
        assert_eq!(s.prevail(p, &tracker, &interrupt).unwrap(), 2);
        assert_eq!(s.prevail(p, &tracker, &interrupt).unwrap(), 3);

        assert_eq!(s.dismiss(p, &tracker).unwrap(), 2);
        assert_eq!(s.dismiss(p, &tracker).unwrap(), 1);
        assert_eq!(s.dismiss(p, &tracker).unwrap(), 0);
        assert_eq!(s.lock_count(p), 0);
    }

    #[test]
    fn swoop_busy_when_held_by_other_participant() {
        let s = Skirmish::new(0, 1);
        let tracker = SkirmishTracker::new();
        s.swoop(ParticipantId(1), &tracker).unwrap();
        assert_eq!(s.swoop(ParticipantId(2), &tracker), Err(FusionError::Busy));
    }

    #[test]
    fn dismiss_by_non_holder_fails() {
        let s = Skirmish::new(0, 1);
        let tracker = SkirmishTracker::new();
        s.swoop(ParticipantId(1), &tracker).unwrap();
        assert_eq!(
            s.dismiss(ParticipantId(2), &tracker),
            Err(FusionError::NotHolder)
        );
    }
}

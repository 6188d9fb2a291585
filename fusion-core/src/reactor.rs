//! Pub/sub fan-out (§4.5).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use fusion_abi::message::MessageKind;

use crate::error::{FusionError, FusionResult};
use crate::ids::{ParticipantId, ReactorId};
use crate::participant::{check_payload_size, Message, Participant};

struct ReactorState {
    /// Attach count per subscriber; an entry only leaves the set when
    /// its count reaches zero (§4.5: "idempotent-with-counter").
    subscribers: HashMap<u32, u32>,
    destroyed: bool,
}

pub struct Reactor {
    pub id: ReactorId,
    pub creator_pid: u32,
    state: Mutex<ReactorState>,
    /// Messages fanned out over this reactor's lifetime (§3 SUPPLEMENT:
    /// introspection only, not a correctness invariant).
    dispatch_count: AtomicU64,
}

impl Reactor {
    pub fn new(id: u32, creator_pid: u32) -> Self {
        Self {
            id: ReactorId(id),
            creator_pid,
            state: Mutex::new(ReactorState {
                subscribers: HashMap::new(),
                destroyed: false,
            }),
            dispatch_count: AtomicU64::new(0),
        }
    }

    pub fn mark_destroyed(&self) {
        self.state.lock().unwrap().destroyed = true;
    }

    pub fn dispatch_count(&self) -> u64 {
        self.dispatch_count.load(Ordering::Relaxed)
    }

    pub fn attach(&self, participant: ParticipantId) -> FusionResult<()> {
        let mut s = self.state.lock().unwrap();
        if s.destroyed {
            return Err(FusionError::Gone);
        }
        *s.subscribers.entry(participant.raw()).or_insert(0) += 1;
        Ok(())
    }

    pub fn detach(&self, participant: ParticipantId) -> FusionResult<()> {
        let mut s = self.state.lock().unwrap();
        let Some(count) = s.subscribers.get_mut(&participant.raw()) else {
            return Err(FusionError::NotHolder);
        };
        *count -= 1;
        if *count == 0 {
            s.subscribers.remove(&participant.raw());
        }
        Ok(())
    }

    /// Drop every attachment this participant holds, regardless of
    /// count, as part of teardown (§4.1).
    pub fn detach_all(&self, participant: ParticipantId) {
        self.state.lock().unwrap().subscribers.remove(&participant.raw());
    }

    pub fn is_attached(&self, participant: ParticipantId) -> bool {
        self.state
            .lock()
            .unwrap()
            .subscribers
            .contains_key(&participant.raw())
    }

    /// Enqueue one reactor message on every attached participant except
    /// `from` (unless `include_self`). `lookup` resolves a subscriber id
    /// to its live `Participant`, if any — dispatch is best-effort, so a
    /// subscriber that vanished between attach and dispatch is simply
    /// skipped and logged, never surfaced to the caller (§4.5). Every
    /// dispatched message carries this reactor's own id as `msg_id`.
    pub fn dispatch(
        &self,
        from: ParticipantId,
        include_self: bool,
        bytes: &[u8],
        lookup: impl Fn(u32) -> Option<std::sync::Arc<Participant>>,
    ) -> FusionResult<()> {
        check_payload_size(bytes.len())?;
        let s = self.state.lock().unwrap();
        if s.destroyed {
            return Err(FusionError::Gone);
        }
        let targets: Vec<u32> = s
            .subscribers
            .keys()
            .copied()
            .filter(|&p| include_self || p != from.raw())
            .collect();
        drop(s);
        let msg_id = self.id.raw();

        for target in targets {
            match lookup(target) {
                Some(participant) => {
                    participant.enqueue(Message {
                        kind: MessageKind::Reactor,
                        source: from.raw(),
                        msg_id,
                        payload: bytes.to_vec(),
                    });
                    self.dispatch_count.fetch_add(1, Ordering::Relaxed);
                }
                None => log::warn!(
                    "reactor {}: dispatch target {target} has no live participant, skipping",
                    self.id
                ),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_is_idempotent_with_counter() {
        let r = Reactor::new(0, 1);
        let p = ParticipantId(5);
        r.attach(p).unwrap();
        r.attach(p).unwrap();
        assert!(r.is_attached(p));
        r.detach(p).unwrap();
        assert!(r.is_attached(p));
        r.detach(p).unwrap();
        assert!(!r.is_attached(p));
    }

    #[test]
    fn detach_without_attach_is_not_holder() {
        let r = Reactor::new(0, 1);
        assert_eq!(r.detach(ParticipantId(5)), Err(FusionError::NotHolder));
    }

    #[test]
    fn dispatch_skips_source_unless_include_self() {
        let r = Reactor::new(0, 1);
        let from = ParticipantId(1);
        let other = ParticipantId(2);
        r.attach(from).unwrap();
        r.attach(other).unwrap();

        let from_p = std::sync::Arc::new(Participant::new(1, 100));
        let other_p = std::sync::Arc::new(Participant::new(2, 101));
        let lookup = |id: u32| -> Option<std::sync::Arc<Participant>> {
            if id == 1 {
                Some(from_p.clone())
            } else if id == 2 {
                Some(other_p.clone())
            } else {
                None
            }
        };

        r.dispatch(from, false, b"hi", lookup).unwrap();
        assert!(!from_p.poll());
        assert!(other_p.poll());
    }
}

//! Three-state property leases (§4.4).

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use fusion_abi::{LEASE_VS_PURCHASED_TIMEOUT_MS, PURCHASE_VS_PURCHASED_TIMEOUT_MS};

use crate::error::{FusionError, FusionResult};
use crate::ids::{ParticipantId, PropertyId};
use crate::wait::{self, Interrupt};

#[derive(Clone, Copy)]
enum PropertyState {
    Available,
    Leased { holder: ParticipantId, depth: u32 },
    Purchased {
        holder: ParticipantId,
        depth: u32,
        stamp: Instant,
    },
}

struct Inner {
    state: PropertyState,
    destroyed: bool,
}

pub struct Property {
    pub id: PropertyId,
    pub creator_pid: u32,
    state: Mutex<Inner>,
    cv: Condvar,
}

impl Property {
    pub fn new(id: u32, creator_pid: u32) -> Self {
        Self {
            id: PropertyId(id),
            creator_pid,
            state: Mutex::new(Inner {
                state: PropertyState::Available,
                destroyed: false,
            }),
            cv: Condvar::new(),
        }
    }

    pub fn mark_destroyed(&self) {
        let mut s = self.state.lock().unwrap();
        s.destroyed = true;
        self.cv.notify_all();
    }

    /// `Available` iff `holder` is none (§8 universal invariant).
    pub fn holder(&self) -> Option<ParticipantId> {
        match self.state.lock().unwrap().state {
            PropertyState::Available => None,
            PropertyState::Leased { holder, .. } => Some(holder),
            PropertyState::Purchased { holder, .. } => Some(holder),
        }
    }

    pub fn purchaser(&self) -> Option<ParticipantId> {
        match self.state.lock().unwrap().state {
            PropertyState::Purchased { holder, .. } => Some(holder),
            _ => None,
        }
    }

    pub fn lease(&self, participant: ParticipantId, interrupt: &Interrupt) -> FusionResult<u32> {
        let mut s = self.state.lock().unwrap();
        loop {
            if s.destroyed {
                return Err(FusionError::Gone);
            }
            match s.state {
                PropertyState::Available => {
                    s.state = PropertyState::Leased {
                        holder: participant,
                        depth: 1,
                    };
                    return Ok(1);
                }
                PropertyState::Leased { holder, depth } if holder == participant => {
                    s.state = PropertyState::Leased {
                        holder,
                        depth: depth + 1,
                    };
                    return Ok(depth + 1);
                }
                PropertyState::Leased { .. } => {
                    s = wait::wait_for(
                        s,
                        &self.cv,
                        interrupt,
                        None,
                        |inner| !matches!(inner.state, PropertyState::Leased { .. }),
                        |inner| inner.destroyed,
                    )?;
                }
                PropertyState::Purchased { stamp, .. } => {
                    let deadline = stamp + Duration::from_millis(LEASE_VS_PURCHASED_TIMEOUT_MS);
                    s = wait::wait_for(
                        s,
                        &self.cv,
                        interrupt,
                        Some(deadline),
                        |inner| !matches!(inner.state, PropertyState::Purchased { .. }),
                        |inner| inner.destroyed,
                    )
                    .map_err(|e| match e {
                        FusionError::TimedOut => FusionError::WouldBlock,
                        other => other,
                    })?;
                }
            }
        }
    }

    pub fn purchase(&self, participant: ParticipantId, interrupt: &Interrupt) -> FusionResult<u32> {
        let mut s = self.state.lock().unwrap();
        loop {
            if s.destroyed {
                return Err(FusionError::Gone);
            }
            match s.state {
                PropertyState::Available => {
                    s.state = PropertyState::Purchased {
                        holder: participant,
                        depth: 1,
                        stamp: Instant::now(),
                    };
                    return Ok(1);
                }
                PropertyState::Leased { .. } => {
                    s = wait::wait_for(
                        s,
                        &self.cv,
                        interrupt,
                        None,
                        |inner| !matches!(inner.state, PropertyState::Leased { .. }),
                        |inner| inner.destroyed,
                    )?;
                }
                PropertyState::Purchased {
                    holder,
                    depth,
                    stamp,
                } if holder == participant => {
                    s.state = PropertyState::Purchased {
                        holder,
                        depth: depth + 1,
                        stamp,
                    };
                    return Ok(depth + 1);
                }
                PropertyState::Purchased { stamp, .. } => {
                    let deadline = stamp + Duration::from_millis(PURCHASE_VS_PURCHASED_TIMEOUT_MS);
                    s = wait::wait_for(
                        s,
                        &self.cv,
                        interrupt,
                        Some(deadline),
                        |inner| !matches!(inner.state, PropertyState::Purchased { .. }),
                        |inner| inner.destroyed,
                    )
                    .map_err(|e| match e {
                        FusionError::TimedOut => FusionError::WouldBlock,
                        other => other,
                    })?;
                }
            }
        }
    }

    /// `cede` (§4.4): decrements depth; at zero, clears to `Available`
    /// and wakes every waiter. A just-ceded purchase yields the CPU
    /// once, so a freshly-woken lessor gets a fair shot before the
    /// ceding thread races ahead and re-acquires.
    pub fn cede(&self, participant: ParticipantId) -> FusionResult<()> {
        let mut s = self.state.lock().unwrap();
        let was_purchased;
        match s.state {
            PropertyState::Leased { holder, depth } if holder == participant => {
                was_purchased = false;
                if depth == 1 {
                    s.state = PropertyState::Available;
                } else {
                    s.state = PropertyState::Leased {
                        holder,
                        depth: depth - 1,
                    };
                }
            }
            PropertyState::Purchased {
                holder,
                depth,
                stamp,
            } if holder == participant => {
                was_purchased = true;
                if depth == 1 {
                    s.state = PropertyState::Available;
                } else {
                    s.state = PropertyState::Purchased {
                        holder,
                        depth: depth - 1,
                        stamp,
                    };
                }
            }
            _ => return Err(FusionError::NotHolder),
        }
        let now_available = matches!(s.state, PropertyState::Available);
        drop(s);
        if now_available {
            self.cv.notify_all();
        }
        if was_purchased && now_available {
            std::thread::yield_now();
        }
        Ok(())
    }

    /// Unconditional release of every level held by `participant`, used
    /// by participant teardown (§4.1's `property.cede_all_owned_by`).
    /// Unlike `cede`, this clears all at once rather than one level at a
    /// time, since the owner is gone and nothing will call `cede` again.
    pub fn force_release(&self, participant: ParticipantId) -> bool {
        let mut s = self.state.lock().unwrap();
        let was_purchased = match s.state {
            PropertyState::Leased { holder, .. } if holder == participant => false,
            PropertyState::Purchased { holder, .. } if holder == participant => true,
            _ => return false,
        };
        s.state = PropertyState::Available;
        drop(s);
        self.cv.notify_all();
        if was_purchased {
            std::thread::yield_now();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_then_cede_returns_to_available() {
        let prop = Property::new(0, 1);
        let interrupt = Interrupt::new();
        let p = ParticipantId(1);
        prop.lease(p, &interrupt).unwrap();
        assert_eq!(prop.holder(), Some(p));
        prop.cede(p).unwrap();
        assert_eq!(prop.holder(), None);
    }

    #[test]
    fn cede_by_non_holder_fails() {
        let prop = Property::new(0, 1);
        let interrupt = Interrupt::new();
        prop.lease(ParticipantId(1), &interrupt).unwrap();
        assert_eq!(prop.cede(ParticipantId(2)), Err(FusionError::NotHolder));
    }

    #[test]
    fn lease_past_hundred_ms_window_would_block() {
        let prop = Property::new(0, 1);
        let interrupt = Interrupt::new();
        prop.purchase(ParticipantId(1), &interrupt).unwrap();
        std::thread::sleep(Duration::from_millis(120));
        assert_eq!(
            prop.lease(ParticipantId(2), &interrupt),
            Err(FusionError::WouldBlock)
        );
    }
}

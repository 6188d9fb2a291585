//! The cross-registry orchestrator (§4.7 SUPPLEMENT) and every operation
//! that touches more than one registry: ref propagation and watch
//! firing, participant teardown order, skirmish transfer for calls, and
//! the `WorldSet` of up to `MAX_WORLDS` lazily-created worlds.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use fusion_abi::message::{MessageHeader, MessageKind};
use fusion_abi::{ApiVersion, MAX_WORLDS, API_MAJOR, PRIVILEGED_PARTICIPANT};

use crate::call::{Call, ReturnOutcome};
use crate::error::{FusionError, FusionResult};
use crate::ids::{CallId, ParticipantId, PropertyId, ReactorId, RefId, SkirmishId};
use crate::participant::{check_payload_size, kill_deadline, KillWait, Message, Participant, SYSTEM_SOURCE};
use crate::property::Property;
use crate::reactor::Reactor;
use crate::refs::Ref;
use crate::registry::Registry;
use crate::skirmish::{Skirmish, SkirmishTracker};
use crate::wait::{Interrupt, POLL_INTERVAL};

/// `{handler, ctx, caller, arg, ptr, serial}`, manually packed the same
/// way `participant::Message` frames its header — the fields are
/// heterogeneous enough that a `#[repr(C)]` struct would carry padding,
/// so this stays a plain byte encoding rather than a `zerocopy` view.
fn encode_call_request(handler: u64, ctx: u64, caller: u32, arg: u32, ptr: u64, serial: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(36);
    out.extend_from_slice(&handler.to_ne_bytes());
    out.extend_from_slice(&ctx.to_ne_bytes());
    out.extend_from_slice(&caller.to_ne_bytes());
    out.extend_from_slice(&arg.to_ne_bytes());
    out.extend_from_slice(&ptr.to_ne_bytes());
    out.extend_from_slice(&serial.to_ne_bytes());
    out
}

/// One world: six independent registries plus the skirmish tracker they
/// all share for deadlock diagnostics and call-time lock transfer.
pub struct World {
    pub minor: u32,
    participants: Registry<Participant>,
    refs: Registry<Ref>,
    skirmishes: Registry<Skirmish>,
    properties: Registry<Property>,
    reactors: Registry<Reactor>,
    calls: Registry<Call>,
    tracker: SkirmishTracker,
    participant_count: AtomicU64,
}

impl World {
    fn new(minor: u32) -> Self {
        Self {
            minor,
            participants: Registry::new(),
            refs: Registry::new(),
            skirmishes: Registry::new(),
            properties: Registry::new(),
            reactors: Registry::new(),
            calls: Registry::new(),
            tracker: SkirmishTracker::new(),
            participant_count: AtomicU64::new(0),
        }
    }

    pub fn participant_count(&self) -> u64 {
        self.participant_count.load(Ordering::Relaxed)
    }

    // ---- 4.1 Participant and message substrate ----------------------

    pub fn enter(&self, version: ApiVersion, creator_pid: u32) -> FusionResult<ParticipantId> {
        if version.major != API_MAJOR {
            return Err(FusionError::Unsupported);
        }
        let (id, _) = self.participants.insert(|id| Participant::new(id, creator_pid));
        self.participant_count.fetch_add(1, Ordering::AcqRel);
        Ok(ParticipantId(id))
    }

    /// Teardown (§4.1): fixed order across registries, then drains and
    /// frees the participant's own FIFO.
    pub fn leave(&self, id: ParticipantId) -> FusionResult<()> {
        let Some(participant) = self.participants.remove(id.raw()) else {
            return Err(FusionError::Invalid);
        };

        for (_, call) in self.calls.snapshot() {
            if call.owner == id {
                call.mark_destroyed();
                self.calls.remove(call.id.raw());
            }
        }

        for (thread, ids) in self.tracker.drain_participant(id) {
            for skirmish_id in ids {
                if let Some(s) = self.skirmishes.get(skirmish_id) {
                    s.force_release(id, thread);
                }
            }
        }

        for (_, reactor) in self.reactors.snapshot() {
            reactor.detach_all(id);
        }

        for (_, property) in self.properties.snapshot() {
            property.force_release(id);
        }

        for (_, r) in self.refs.snapshot() {
            if let Some((before, after)) = r.drop_local_of(id) {
                self.propagate_delta(r.id, -((before - after) as i64));
                if before > 0 && after == 0 {
                    self.fire_watch_if_any(&r);
                }
            }
        }

        participant.mark_destroyed();

        if self.participant_count.fetch_sub(1, Ordering::AcqRel) == 1 {
            log::debug!("world {}: last participant left", self.minor);
        }
        Ok(())
    }

    fn get_participant(&self, id: ParticipantId) -> FusionResult<Arc<Participant>> {
        self.participants.get(id.raw()).ok_or(FusionError::Invalid)
    }

    pub fn send(&self, from: ParticipantId, to: ParticipantId, msg_id: u32, bytes: &[u8]) -> FusionResult<()> {
        check_payload_size(bytes.len())?;
        let target = self.get_participant(to)?;
        target.enqueue(Message {
            kind: MessageKind::Send,
            source: from.raw(),
            msg_id,
            payload: bytes.to_vec(),
        });
        Ok(())
    }

    pub fn read(&self, id: ParticipantId, buf: &mut [u8], blocking: bool) -> FusionResult<usize> {
        let n = self.get_participant(id)?.read(buf, blocking)?;
        self.note_consumed_calls(&buf[..n]);
        Ok(n)
    }

    /// Every `Call`-kind message just dequeued by a `read` carries its
    /// call's own id as `msg_id` (see `call_execute`/`fire_watch_if_any`);
    /// walk the frames handed back and tell the matching `Call` one of
    /// its pending requests has actually left the owner's FIFO, so
    /// `call_destroy` can tell when it's safe to tear down.
    fn note_consumed_calls(&self, bytes: &[u8]) {
        let mut offset = 0usize;
        while offset + MessageHeader::SIZE <= bytes.len() {
            let kind = u32::from_ne_bytes(bytes[offset..offset + 4].try_into().unwrap());
            let msg_id = u32::from_ne_bytes(bytes[offset + 4..offset + 8].try_into().unwrap());
            let size = u32::from_ne_bytes(bytes[offset + 8..offset + 12].try_into().unwrap()) as usize;
            if kind == MessageKind::Call as u32 {
                self.call_note_request_consumed(CallId(msg_id));
            }
            offset += MessageHeader::SIZE + size;
        }
    }

    pub fn poll(&self, id: ParticipantId) -> FusionResult<bool> {
        Ok(self.get_participant(id)?.poll())
    }

    /// `kill` (§4.1): signal every target, then, per `timeout_ms`,
    /// optionally wait for them to actually leave the world.
    pub fn kill(&self, from: ParticipantId, target: Option<ParticipantId>, timeout_ms: i64) -> FusionResult<()> {
        let targets: Vec<u32> = self
            .participants
            .snapshot()
            .into_iter()
            .filter(|(pid, _)| *pid != from.raw() && target.is_none_or(|t| t.raw() == *pid))
            .map(|(pid, p)| {
                p.deliver_signal();
                pid
            })
            .collect();

        match kill_deadline(timeout_ms) {
            KillWait::NoWait => Ok(()),
            KillWait::Forever => self.wait_targets_gone(&targets, None),
            KillWait::Bounded(deadline) => self.wait_targets_gone(&targets, Some(deadline)),
        }
    }

    fn wait_targets_gone(&self, targets: &[u32], deadline: Option<Instant>) -> FusionResult<()> {
        loop {
            if targets.iter().all(|id| !self.participants.contains(*id)) {
                return Ok(());
            }
            if let Some(dl) = deadline {
                if Instant::now() >= dl {
                    return Err(FusionError::TimedOut);
                }
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    // ---- 4.2 Ref ------------------------------------------------------

    pub fn ref_new(&self, creator_pid: u32) -> RefId {
        let (id, _) = self.refs.insert(|id| Ref::new(id, creator_pid));
        RefId(id)
    }

    fn get_ref(&self, id: RefId) -> FusionResult<Arc<Ref>> {
        self.refs.get(id.raw()).ok_or(FusionError::Invalid)
    }

    pub fn ref_up(&self, id: RefId, participant: Option<ParticipantId>) -> FusionResult<u64> {
        let entry = self.get_ref(id)?;
        let (_before, after) = entry.up(participant)?;
        if participant.is_some() {
            self.propagate_delta(id, 1);
        }
        Ok(after)
    }

    pub fn ref_down(&self, id: RefId, participant: Option<ParticipantId>) -> FusionResult<u64> {
        let entry = self.get_ref(id)?;
        let (before, after) = entry.down(participant)?;
        if participant.is_some() {
            self.propagate_delta(id, -1);
        }
        if before > 0 && after == 0 {
            self.fire_watch_if_any(&entry);
        }
        Ok(after)
    }

    pub fn ref_stat(&self, id: RefId) -> FusionResult<u64> {
        Ok(self.get_ref(id)?.stat())
    }

    pub fn ref_watch(&self, id: RefId, call_id: CallId, call_arg: u32) -> FusionResult<()> {
        self.get_ref(id)?.watch(call_id, call_arg)
    }

    pub fn ref_zero_lock(&self, id: RefId, participant: ParticipantId, interrupt: &Interrupt) -> FusionResult<()> {
        self.get_ref(id)?.zero_lock(participant, interrupt)
    }

    pub fn ref_zero_trylock(&self, id: RefId, participant: ParticipantId) -> FusionResult<()> {
        self.get_ref(id)?.zero_trylock(participant)
    }

    pub fn ref_unlock(&self, id: RefId, participant: ParticipantId) -> FusionResult<()> {
        self.get_ref(id)?.unlock(participant)
    }

    /// `inherit` (§4.2): rejects a cycle by walking the prospective
    /// parent's own ancestor chain looking for `child_id`.
    pub fn ref_inherit(&self, child_id: RefId, parent_id: RefId) -> FusionResult<()> {
        if child_id == parent_id {
            return Err(FusionError::WouldCycle);
        }
        if self.is_ancestor(child_id, parent_id) {
            return Err(FusionError::WouldCycle);
        }

        let child = self.get_ref(child_id)?;
        let parent = self.get_ref(parent_id)?;

        let parent_local = {
            let mut p = parent.lock();
            p.children.insert(child_id.raw());
            p.local()
        };
        let mut c = child.lock();
        c.inherited_from = Some(parent_id);
        c.inherited_local = parent_local;
        drop(c);
        self.propagate_delta(child_id, parent_local as i64);
        Ok(())
    }

    /// True if `candidate` appears in `start`'s chain of ancestors
    /// (walking `inherited_from` upward), i.e. making `start` inherit
    /// from `candidate` would close a cycle.
    fn is_ancestor(&self, candidate: RefId, start: RefId) -> bool {
        let mut current = start;
        let mut seen = HashSet::new();
        loop {
            if current == candidate {
                return true;
            }
            if !seen.insert(current.raw()) {
                return false;
            }
            let Some(entry) = self.refs.get(current.raw()) else {
                return false;
            };
            let Some(parent) = entry.lock().inherited_from else {
                return false;
            };
            current = parent;
        }
    }

    pub fn ref_destroy(&self, id: RefId) -> FusionResult<()> {
        let entry = self.refs.remove(id.raw()).ok_or(FusionError::Invalid)?;
        entry.mark_destroyed();

        let (parent, children): (Option<RefId>, Vec<u32>) = {
            let s = entry.lock();
            (s.inherited_from, s.children.iter().copied().collect())
        };

        if let Some(parent_id) = parent {
            if let Some(parent_entry) = self.refs.get(parent_id.raw()) {
                parent_entry.lock().children.remove(&id.raw());
            }
        }

        for child_id in children {
            if let Some(child_entry) = self.refs.get(child_id) {
                let mut c = child_entry.lock();
                let delta = c.inherited_local;
                c.inherited_from = None;
                c.inherited_local = 0;
                drop(c);
                if delta > 0 {
                    self.propagate_delta(RefId(child_id), -(delta as i64));
                }
            }
        }
        Ok(())
    }

    /// Apply `delta` to every descendant's `inherited_local`, recursing
    /// one `Ref` lock at a time (§5's documented exception to "hold at
    /// most one ref entry lock"). A descendant whose `total()` drops to
    /// zero purely from inheriting its parent's `down` still owes its
    /// own watch a wake, same as a direct `down` would.
    fn propagate_delta(&self, id: RefId, delta: i64) {
        let Some(entry) = self.refs.get(id.raw()) else {
            return;
        };
        let children: Vec<u32> = entry.lock().children.iter().copied().collect();
        for child_id in children {
            let Some(child) = self.refs.get(child_id) else {
                continue;
            };
            let (before, after) = {
                let mut c = child.lock();
                let before = c.total();
                if delta >= 0 {
                    c.inherited_local += delta as u64;
                } else {
                    debug_assert!(
                        c.inherited_local >= (-delta) as u64,
                        "inherited_local went negative propagating a down past its own ups"
                    );
                    c.inherited_local = c.inherited_local.saturating_sub((-delta) as u64);
                }
                (before, c.total())
            };
            if before > 0 && after == 0 {
                self.fire_watch_if_any(&child);
            }
            self.propagate_delta(RefId(child_id), delta);
        }
    }

    fn fire_watch_if_any(&self, entry: &Arc<Ref>) {
        let Some((call_id, call_arg)) = entry.take_watch() else {
            return;
        };
        let Some(call) = self.calls.get(call_id.raw()) else {
            return;
        };
        let Some(owner) = self.participants.get(call.owner.raw()) else {
            return;
        };
        match call.begin_execution(ParticipantId(SYSTEM_SOURCE), 0, std::thread::current().id(), true) {
            Ok((_serial, _)) => {
                call.note_request_sent();
                let payload = encode_call_request(
                    call.handler.handler,
                    call.handler.ctx,
                    SYSTEM_SOURCE,
                    call_arg,
                    0,
                    0,
                );
                owner.enqueue(Message {
                    kind: MessageKind::Call,
                    source: SYSTEM_SOURCE,
                    msg_id: call_id.raw(),
                    payload,
                });
            }
            Err(e) => log::warn!(
                "ref {}: watch-triggered call {} could not be dispatched: {e:?}",
                entry.id,
                call_id
            ),
        }
    }

    // ---- 4.3 Skirmish ---------------------------------------------

    pub fn skirmish_new(&self, creator_pid: u32) -> SkirmishId {
        let (id, _) = self.skirmishes.insert(|id| Skirmish::new(id, creator_pid));
        SkirmishId(id)
    }

    fn get_skirmish(&self, id: SkirmishId) -> FusionResult<Arc<Skirmish>> {
        self.skirmishes.get(id.raw()).ok_or(FusionError::Invalid)
    }

    pub fn skirmish_prevail(&self, id: SkirmishId, participant: ParticipantId, interrupt: &Interrupt) -> FusionResult<u32> {
        self.get_skirmish(id)?.prevail(participant, &self.tracker, interrupt)
    }

    pub fn skirmish_swoop(&self, id: SkirmishId, participant: ParticipantId) -> FusionResult<u32> {
        self.get_skirmish(id)?.swoop(participant, &self.tracker)
    }

    pub fn skirmish_dismiss(&self, id: SkirmishId, participant: ParticipantId) -> FusionResult<u32> {
        self.get_skirmish(id)?.dismiss(participant, &self.tracker)
    }

    pub fn skirmish_lock_count(&self, id: SkirmishId, participant: ParticipantId) -> FusionResult<u32> {
        Ok(self.get_skirmish(id)?.lock_count(participant))
    }

    pub fn skirmish_destroy(&self, id: SkirmishId) -> FusionResult<()> {
        let entry = self.skirmishes.remove(id.raw()).ok_or(FusionError::Invalid)?;
        entry.mark_destroyed();
        Ok(())
    }

    /// `release_all_from_pid` (§4.3): distinct from the per-participant
    /// `release_all_owned_by` that `leave` already runs. A single OS pid
    /// can back more than one participant; this releases every skirmish
    /// held by any of them, for the out-of-scope device-release path
    /// rather than a single participant's `leave`.
    pub fn skirmish_release_all_from_pid(&self, pid: u32) {
        let owners: Vec<ParticipantId> = self
            .participants
            .snapshot()
            .into_iter()
            .filter(|(_, p)| p.creator_pid() == pid)
            .map(|(id, _)| ParticipantId(id))
            .collect();
        for participant in owners {
            for (thread, ids) in self.tracker.drain_participant(participant) {
                for skirmish_id in ids {
                    if let Some(s) = self.skirmishes.get(skirmish_id) {
                        s.force_release(participant, thread);
                    }
                }
            }
        }
    }

    // ---- 4.4 Property -----------------------------------------------

    pub fn property_new(&self, creator_pid: u32) -> PropertyId {
        let (id, _) = self.properties.insert(|id| Property::new(id, creator_pid));
        PropertyId(id)
    }

    fn get_property(&self, id: PropertyId) -> FusionResult<Arc<Property>> {
        self.properties.get(id.raw()).ok_or(FusionError::Invalid)
    }

    pub fn property_lease(&self, id: PropertyId, participant: ParticipantId, interrupt: &Interrupt) -> FusionResult<u32> {
        self.get_property(id)?.lease(participant, interrupt)
    }

    pub fn property_purchase(&self, id: PropertyId, participant: ParticipantId, interrupt: &Interrupt) -> FusionResult<u32> {
        self.get_property(id)?.purchase(participant, interrupt)
    }

    pub fn property_cede(&self, id: PropertyId, participant: ParticipantId) -> FusionResult<()> {
        self.get_property(id)?.cede(participant)
    }

    /// `holdup` (§4.4): only `PRIVILEGED_PARTICIPANT` may call this; it
    /// delivers a kill signal to whoever currently holds the property
    /// purchased, to break a deadlock around it.
    pub fn property_holdup(&self, id: PropertyId, caller: ParticipantId) -> FusionResult<()> {
        if caller.raw() != PRIVILEGED_PARTICIPANT {
            return Err(FusionError::NotOwner);
        }
        let property = self.get_property(id)?;
        let Some(holder) = property.purchaser() else {
            return Ok(());
        };
        if let Some(target) = self.participants.get(holder.raw()) {
            target.deliver_signal();
        }
        Ok(())
    }

    pub fn property_destroy(&self, id: PropertyId) -> FusionResult<()> {
        let entry = self.properties.remove(id.raw()).ok_or(FusionError::Invalid)?;
        entry.mark_destroyed();
        Ok(())
    }

    // ---- 4.5 Reactor --------------------------------------------------

    pub fn reactor_new(&self, creator_pid: u32) -> ReactorId {
        let (id, _) = self.reactors.insert(|id| Reactor::new(id, creator_pid));
        ReactorId(id)
    }

    fn get_reactor(&self, id: ReactorId) -> FusionResult<Arc<Reactor>> {
        self.reactors.get(id.raw()).ok_or(FusionError::Invalid)
    }

    pub fn reactor_attach(&self, id: ReactorId, participant: ParticipantId) -> FusionResult<()> {
        self.get_reactor(id)?.attach(participant)
    }

    pub fn reactor_detach(&self, id: ReactorId, participant: ParticipantId) -> FusionResult<()> {
        self.get_reactor(id)?.detach(participant)
    }

    pub fn reactor_dispatch(
        &self,
        id: ReactorId,
        from: ParticipantId,
        include_self: bool,
        bytes: &[u8],
    ) -> FusionResult<()> {
        let reactor = self.get_reactor(id)?;
        let participants = &self.participants;
        reactor.dispatch(from, include_self, bytes, |target| participants.get(target))
    }

    pub fn reactor_destroy(&self, id: ReactorId) -> FusionResult<()> {
        let entry = self.reactors.remove(id.raw()).ok_or(FusionError::Invalid)?;
        entry.mark_destroyed();
        Ok(())
    }

    // ---- 4.6 Call -----------------------------------------------------

    pub fn call_new(&self, owner: ParticipantId, creator_pid: u32, handler: fusion_abi::CallHandler) -> CallId {
        let (id, _) = self.calls.insert(|id| Call::new(id, creator_pid, owner, handler));
        CallId(id)
    }

    fn get_call(&self, id: CallId) -> FusionResult<Arc<Call>> {
        self.calls.get(id.raw()).ok_or(FusionError::Invalid)
    }

    /// `execute`/`execute2` (§4.6): builds and enqueues the request,
    /// transfers the caller's skirmishes to the owner for the duration
    /// of a non-one-way call, then blocks for the result.
    pub fn call_execute(
        &self,
        from: ParticipantId,
        caller_pid: u32,
        id: CallId,
        arg: u32,
        ptr: u64,
        oneway: bool,
        interrupt: &Interrupt,
    ) -> FusionResult<i32> {
        let call = self.get_call(id)?;
        let owner = self.get_participant(call.owner)?;
        let thread = std::thread::current().id();

        let (serial, execution) = call.begin_execution(from, caller_pid, thread, oneway)?;

        let wire_serial = if oneway { 0 } else { serial };
        let payload = encode_call_request(call.handler.handler, call.handler.ctx, from.raw(), arg, ptr, wire_serial);
        owner.enqueue(Message {
            kind: MessageKind::Call,
            source: from.raw(),
            msg_id: id.raw(),
            payload,
        });
        call.note_request_sent();

        let Some(execution) = execution else {
            return Ok(0);
        };

        let transferred = self.tracker.take_all(from, thread);
        for skirmish_id in &transferred {
            if let Some(s) = self.skirmishes.get(*skirmish_id) {
                s.transfer(from, thread, call.owner);
            }
        }
        call.record_transfer(&execution, transferred);

        // Skirmishes are actually handed back in `call_return`, at the
        // moment the callee resolves the execution, rather than here —
        // by the time this wait returns, `call_return` has already run.
        execution.wait_for_return(interrupt)
    }

    /// `return` (§4.6): resolves the matching execution and restores
    /// its transferred skirmishes to the original caller thread,
    /// whether or not that caller is still around to see it happen.
    pub fn call_return(&self, owner: ParticipantId, id: CallId, serial: u32, val: i32) -> FusionResult<()> {
        let call = self.get_call(id)?;
        if call.owner != owner {
            return Err(FusionError::NotOwner);
        }
        let outcome = call.return_value(serial, val)?;
        let (caller_participant, caller_thread, transferred) = match outcome {
            ReturnOutcome::Delivered { caller_participant, caller_thread, transferred, .. } => {
                (caller_participant, caller_thread, transferred)
            }
            ReturnOutcome::OrphanFreed { caller_participant, caller_thread, transferred, .. } => {
                (caller_participant, caller_thread, transferred)
            }
        };
        for skirmish_id in transferred {
            if let Some(s) = self.skirmishes.get(skirmish_id) {
                s.transfer(owner, caller_thread, caller_participant);
                self.tracker.restore(caller_participant, caller_thread, vec![skirmish_id]);
            }
        }
        Ok(())
    }

    /// `destroy` (§4.6): owner-only; waits for the owner's FIFO to
    /// drain this call's requests, then for every execution to resolve.
    pub fn call_destroy(&self, owner: ParticipantId, id: CallId, interrupt: &Interrupt) -> FusionResult<()> {
        let call = self.get_call(id)?;
        if call.owner != owner {
            return Err(FusionError::NotOwner);
        }
        call.wait_requests_drained(interrupt)?;
        call.wait_executions_drained(interrupt)?;
        self.calls.remove(id.raw());
        call.mark_destroyed();
        Ok(())
    }

    /// Called by whatever reads a `Call`-kind message out of a
    /// participant's FIFO, so `destroy` knows the owner's mailbox has
    /// genuinely drained this call's in-flight requests.
    pub fn call_note_request_consumed(&self, id: CallId) {
        if let Some(call) = self.calls.get(id.raw()) {
            call.note_request_consumed();
        }
    }

    pub fn describe(&self, registry: &str) -> String {
        match registry {
            "participants" => self
                .participants
                .snapshot()
                .into_iter()
                .map(|(id, p)| format!("{id}\tpid={}\tsent={}\trecv={}", p.creator_pid(), p.sent(), p.received()))
                .collect::<Vec<_>>()
                .join("\n"),
            "refs" => self
                .refs
                .snapshot()
                .into_iter()
                .map(|(id, r)| format!("{id}\tpid={}\ttotal={}", r.creator_pid, r.stat()))
                .collect::<Vec<_>>()
                .join("\n"),
            "skirmishes" => self
                .skirmishes
                .snapshot()
                .into_iter()
                .map(|(id, s)| format!("{id}\tpid={}\tlocks={}", s.creator_pid, s.lock_total()))
                .collect::<Vec<_>>()
                .join("\n"),
            "properties" => self
                .properties
                .snapshot()
                .into_iter()
                .map(|(id, p)| format!("{id}\tpid={}\tholder={:?}", p.creator_pid, p.holder()))
                .collect::<Vec<_>>()
                .join("\n"),
            "reactors" => self
                .reactors
                .snapshot()
                .into_iter()
                .map(|(id, r)| format!("{id}\tpid={}\tdispatched={}", r.creator_pid, r.dispatch_count()))
                .collect::<Vec<_>>()
                .join("\n"),
            "calls" => self
                .calls
                .snapshot()
                .into_iter()
                .map(|(id, c)| {
                    format!(
                        "{id}\towner={}\tcalls={}\torphaned={}",
                        c.owner,
                        c.invocation_count(),
                        c.orphaned_count()
                    )
                })
                .collect::<Vec<_>>()
                .join("\n"),
            _ => String::new(),
        }
    }
}

/// Up to `MAX_WORLDS` independent worlds, allocated lazily on first
/// `open` of a given minor (§4.7 SUPPLEMENT), mirroring the teacher's
/// lazy-allocate-on-first-use pattern for kernel objects.
pub struct WorldSet {
    slots: Mutex<Vec<Option<(Arc<World>, bool)>>>,
}

impl WorldSet {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_WORLDS as usize);
        slots.resize_with(MAX_WORLDS as usize, || None);
        Self {
            slots: Mutex::new(slots),
        }
    }

    /// Open `minor`, creating it on first use. `exclusive` fails `Busy`
    /// if the world already has at least one participant.
    pub fn open(&self, minor: u32, exclusive: bool) -> FusionResult<Arc<World>> {
        if minor >= MAX_WORLDS {
            return Err(FusionError::Invalid);
        }
        let mut slots = self.slots.lock().unwrap();
        let idx = minor as usize;
        if slots[idx].is_none() {
            slots[idx] = Some((Arc::new(World::new(minor)), exclusive));
            return Ok(slots[idx].as_ref().unwrap().0.clone());
        }
        let (world, _) = slots[idx].as_ref().unwrap();
        if exclusive && world.participant_count() > 0 {
            return Err(FusionError::Busy);
        }
        Ok(world.clone())
    }

    /// Free a world once its last participant has left, per §4.7.
    pub fn reap(&self, minor: u32) {
        let mut slots = self.slots.lock().unwrap();
        if let Some(idx) = slots.get_mut(minor as usize) {
            if let Some((world, _)) = idx {
                if world.participant_count() == 0 {
                    *idx = None;
                }
            }
        }
    }
}

impl Default for WorldSet {
    fn default() -> Self {
        Self::new()
    }
}

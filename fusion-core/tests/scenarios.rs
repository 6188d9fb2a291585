//! End-to-end scenarios, one per numbered case.

use std::sync::Arc;
use std::time::{Duration, Instant};

use fusion_abi::message::{MessageHeader, MessageKind};
use fusion_abi::{ApiVersion, CallHandler};
use fusion_core::{FusionError, Interrupt, World, WorldSet};

fn v4() -> ApiVersion {
    ApiVersion { major: 4, minor: 0 }
}

fn open_world() -> Arc<World> {
    WorldSet::new().open(0, false).unwrap()
}

fn read_one(world: &World, id: fusion_core::ParticipantId) -> (MessageKind, u32, Vec<u8>) {
    let deadline = Instant::now() + Duration::from_millis(500);
    while !world.poll(id).unwrap() {
        assert!(Instant::now() < deadline, "message never arrived");
        std::thread::sleep(Duration::from_millis(5));
    }
    let mut buf = [0u8; 256];
    let n = world.read(id, &mut buf, false).unwrap();
    let kind = match u32::from_ne_bytes(buf[0..4].try_into().unwrap()) {
        0 => MessageKind::Send,
        1 => MessageKind::Call,
        2 => MessageKind::Reactor,
        other => panic!("unknown message kind {other}"),
    };
    let msg_id = u32::from_ne_bytes(buf[4..8].try_into().unwrap());
    let size = u32::from_ne_bytes(buf[8..12].try_into().unwrap()) as usize;
    let payload = buf[MessageHeader::SIZE..MessageHeader::SIZE + size].to_vec();
    (kind, msg_id, payload)
}

/// `{handler, ctx, caller, arg, ptr, serial}` as packed by
/// `world::encode_call_request`.
fn decode_call_request(bytes: &[u8]) -> (u64, u64, u32, u32, u64, u32) {
    let handler = u64::from_ne_bytes(bytes[0..8].try_into().unwrap());
    let ctx = u64::from_ne_bytes(bytes[8..16].try_into().unwrap());
    let caller = u32::from_ne_bytes(bytes[16..20].try_into().unwrap());
    let arg = u32::from_ne_bytes(bytes[20..24].try_into().unwrap());
    let ptr = u64::from_ne_bytes(bytes[24..32].try_into().unwrap());
    let serial = u32::from_ne_bytes(bytes[32..36].try_into().unwrap());
    (handler, ctx, caller, arg, ptr, serial)
}

#[test]
fn scenario_1_rpc_round_trip() {
    let world = open_world();
    let a = world.enter(v4(), 100).unwrap();
    let b = world.enter(v4(), 200).unwrap();

    let call_id = world.call_new(a, 100, CallHandler { handler: 0xAA, ctx: 0xBB });

    let world2 = world.clone();
    let handle = std::thread::spawn(move || {
        let interrupt = Interrupt::new();
        world2.call_execute(b, 200, call_id, 7, 0, false, &interrupt)
    });

    let (kind, msg_id, payload) = read_one(&world, a);
    assert!(matches!(kind, MessageKind::Call));
    assert_eq!(msg_id, call_id.raw());
    let (handler, ctx, caller, arg, ptr, serial) = decode_call_request(&payload);
    assert_eq!(handler, 0xAA);
    assert_eq!(ctx, 0xBB);
    assert_eq!(caller, b.raw());
    assert_eq!(arg, 7);
    assert_eq!(ptr, 0);
    assert_eq!(serial, 1);

    world.call_return(a, call_id, serial, 42).unwrap();
    assert_eq!(handle.join().unwrap(), Ok(42));
}

#[test]
fn scenario_2_reactor_fan_out() {
    let world = open_world();
    let a = world.enter(v4(), 1).unwrap();
    let b = world.enter(v4(), 2).unwrap();
    let c = world.enter(v4(), 3).unwrap();

    let reactor = world.reactor_new(1);
    world.reactor_attach(reactor, a).unwrap();
    world.reactor_attach(reactor, b).unwrap();
    world.reactor_attach(reactor, c).unwrap();

    world.reactor_dispatch(reactor, a, false, b"hi").unwrap();

    let (kind, msg_id, payload) = read_one(&world, b);
    assert!(matches!(kind, MessageKind::Reactor));
    assert_eq!(msg_id, reactor.raw());
    assert_eq!(payload, b"hi");

    let (_, _, payload) = read_one(&world, c);
    assert_eq!(payload, b"hi");

    assert!(!world.poll(a).unwrap());
}

#[test]
fn scenario_3_ref_watch_firing() {
    let world = open_world();
    let a = world.enter(v4(), 1).unwrap();
    let owner = world.enter(v4(), 2).unwrap();

    let call_id = world.call_new(owner, 2, CallHandler { handler: 0, ctx: 0 });
    let x = world.ref_new(1);

    world.ref_up(x, Some(a)).unwrap();
    assert_eq!(world.ref_stat(x).unwrap(), 1);

    world.ref_watch(x, call_id, 99).unwrap();
    world.ref_down(x, Some(a)).unwrap();
    assert_eq!(world.ref_stat(x).unwrap(), 0);

    let (kind, msg_id, payload) = read_one(&world, owner);
    assert!(matches!(kind, MessageKind::Call));
    assert_eq!(msg_id, call_id.raw());
    let (_, _, caller, arg, _, _) = decode_call_request(&payload);
    assert_eq!(caller, 0);
    assert_eq!(arg, 99);

    // Single-shot: a second up/down does not fire again.
    world.ref_up(x, Some(a)).unwrap();
    world.ref_down(x, Some(a)).unwrap();
    assert!(!world.poll(owner).unwrap());
}

#[test]
fn scenario_4_ref_inherit_propagation() {
    let world = open_world();
    let a = world.enter(v4(), 1).unwrap();

    let p = world.ref_new(1);
    let q = world.ref_new(1);

    world.ref_up(p, Some(a)).unwrap();
    world.ref_up(p, Some(a)).unwrap();
    world.ref_up(p, Some(a)).unwrap();
    assert_eq!(world.ref_stat(p).unwrap(), 3);

    world.ref_inherit(q, p).unwrap();
    assert_eq!(world.ref_stat(q).unwrap(), 3);

    world.ref_down(p, Some(a)).unwrap();
    assert_eq!(world.ref_stat(p).unwrap(), 2);
    assert_eq!(world.ref_stat(q).unwrap(), 2);

    world.ref_destroy(p).unwrap();
    assert_eq!(world.ref_stat(q).unwrap(), 0);
}

#[test]
fn scenario_5_skirmish_recursive_and_teardown() {
    let world = open_world();
    let a = world.enter(v4(), 1).unwrap();
    let b = world.enter(v4(), 2).unwrap();

    let s = world.skirmish_new(1);
    let interrupt = Interrupt::new();
    world.skirmish_prevail(s, a, &interrupt).unwrap();
    world.skirmish_prevail(s, a, &interrupt).unwrap();
    world.skirmish_prevail(s, a, &interrupt).unwrap();
    assert_eq!(world.skirmish_lock_count(s, a).unwrap(), 3);

    world.leave(a).unwrap();

    world.skirmish_prevail(s, b, &interrupt).unwrap();
    assert_eq!(world.skirmish_lock_count(s, b).unwrap(), 1);
}

#[test]
fn scenario_6_property_purchase_timeout() {
    let world = open_world();
    let a = world.enter(v4(), 1).unwrap();
    let b = world.enter(v4(), 2).unwrap();

    let p = world.property_new(1);
    let interrupt = Interrupt::new();
    world.property_purchase(p, a, &interrupt).unwrap();

    std::thread::sleep(Duration::from_millis(120));
    assert_eq!(
        world.property_lease(p, b, &interrupt),
        Err(FusionError::WouldBlock)
    );
}

#[test]
fn scenario_6_property_purchase_early_cede_unblocks_lease() {
    let world = open_world();
    let a = world.enter(v4(), 1).unwrap();
    let b = world.enter(v4(), 2).unwrap();

    let p = world.property_new(1);
    let interrupt = Interrupt::new();
    world.property_purchase(p, a, &interrupt).unwrap();

    let world2 = world.clone();
    let handle = std::thread::spawn(move || {
        let interrupt = Interrupt::new();
        world2.property_lease(p, b, &interrupt)
    });

    std::thread::sleep(Duration::from_millis(60));
    world.property_cede(p, a).unwrap();

    assert!(handle.join().unwrap().is_ok());
}

/// A ref that only ever holds inherited count, never its own, still owes
/// its watch a wake once the parent's `down` zeroes it by propagation —
/// not just when a direct `up`/`down` on the ref itself crosses zero.
#[test]
fn scenario_7_inherited_ref_watch_fires_on_propagated_zero() {
    let world = open_world();
    let a = world.enter(v4(), 1).unwrap();
    let owner = world.enter(v4(), 2).unwrap();

    let call_id = world.call_new(owner, 2, CallHandler { handler: 0, ctx: 0 });
    let parent = world.ref_new(1);
    let child = world.ref_new(1);

    world.ref_up(parent, Some(a)).unwrap();
    world.ref_inherit(child, parent).unwrap();
    assert_eq!(world.ref_stat(child).unwrap(), 1);

    world.ref_watch(child, call_id, 7).unwrap();
    world.ref_down(parent, Some(a)).unwrap();
    assert_eq!(world.ref_stat(child).unwrap(), 0);

    let (kind, msg_id, payload) = read_one(&world, owner);
    assert!(matches!(kind, MessageKind::Call));
    assert_eq!(msg_id, call_id.raw());
    let (_, _, _, arg, _, _) = decode_call_request(&payload);
    assert_eq!(arg, 7);
}

/// `leave`'s ref teardown must propagate the actual local count a
/// participant held, not a flat -1, when it held more than one.
#[test]
fn scenario_8_leave_propagates_full_local_count_on_teardown() {
    let world = open_world();
    let a = world.enter(v4(), 1).unwrap();

    let parent = world.ref_new(1);
    let child = world.ref_new(1);

    world.ref_up(parent, Some(a)).unwrap();
    world.ref_up(parent, Some(a)).unwrap();
    world.ref_up(parent, Some(a)).unwrap();
    world.ref_inherit(child, parent).unwrap();
    assert_eq!(world.ref_stat(child).unwrap(), 3);

    world.leave(a).unwrap();

    assert_eq!(world.ref_stat(parent).unwrap(), 0);
    assert_eq!(world.ref_stat(child).unwrap(), 0);
}

/// A call's `return` restores transferred skirmishes to the caller's own
/// `ParticipantId`, not a `ParticipantId` built out of the caller's raw
/// pid — the two numbering spaces are unrelated.
#[test]
fn scenario_9_call_return_restores_skirmish_to_real_caller_participant() {
    let world = open_world();
    let owner = world.enter(v4(), 100).unwrap();
    let caller = world.enter(v4(), 100).unwrap();
    // A pid that collides with no participant id in this world, so
    // `ParticipantId(caller_pid)` would resolve to nobody (or the wrong
    // participant) if `call_return` ever reconstructed the caller that way.
    let caller_pid = 777_777;

    let s = world.skirmish_new(100);
    let interrupt = Interrupt::new();
    world.skirmish_prevail(s, caller, &interrupt).unwrap();

    let call_id = world.call_new(owner, 100, CallHandler { handler: 0, ctx: 0 });
    let world2 = world.clone();
    let handle = std::thread::spawn(move || {
        let interrupt = Interrupt::new();
        world2.call_execute(caller, caller_pid, call_id, 0, 0, false, &interrupt)
    });

    let (_, _, payload) = read_one(&world, owner);
    let (_, _, _, _, _, serial) = decode_call_request(&payload);
    world.call_return(owner, call_id, serial, 0).unwrap();
    handle.join().unwrap().unwrap();

    assert_eq!(world.skirmish_lock_count(s, caller).unwrap(), 1);
    world.skirmish_dismiss(s, caller).unwrap();
}

/// `skirmish_release_all_from_pid` releases every skirmish held by any
/// participant sharing that pid, distinct from the per-participant
/// release `leave` already performs for a single one of them.
#[test]
fn scenario_10_skirmish_release_all_from_pid_spans_participants() {
    let world = open_world();
    let pid = 42;
    let a = world.enter(v4(), pid).unwrap();
    let b = world.enter(v4(), pid).unwrap();

    let s1 = world.skirmish_new(pid);
    let s2 = world.skirmish_new(pid);
    let interrupt = Interrupt::new();
    world.skirmish_prevail(s1, a, &interrupt).unwrap();
    world.skirmish_prevail(s2, b, &interrupt).unwrap();

    world.skirmish_release_all_from_pid(pid);

    assert_eq!(world.skirmish_lock_count(s1, a).unwrap(), 0);
    assert_eq!(world.skirmish_lock_count(s2, b).unwrap(), 0);
    assert_eq!(world.skirmish_swoop(s1, b).unwrap(), 1);
}

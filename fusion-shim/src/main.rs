//! Thin CLI standing in for the device-node glue spec.md places out of
//! scope: it owns its own pid (`std::process::id()`), opens a world,
//! dispatches a handful of `fusion-core` operations, and maps
//! `FusionError` to an exit code. The demo round-trips a few of
//! `fusion-abi`'s ioctl payload structs through bytes before handing
//! their fields to `fusion-core`, standing in for the `copy_from_user`
//! + struct decode a real device node would do ahead of this shim.

use std::process::ExitCode;

use clap::{Parser, Subcommand};

use fusion_abi::{
    ApiVersion, CallExecuteRequest, CallHandler, CallReturnRequest, KillRequest,
    ReactorDispatchRequest, RefInheritRequest, RefWatchRequest, API_MAJOR, API_MINOR,
};
use fusion_core::{CallId, FusionError, Interrupt, ParticipantId, ReactorId, RefId, WorldSet};

#[derive(Parser)]
#[command(about = "Demo driver for the fusion coordination library")]
struct Cli {
    /// Which of the MAX_WORLDS minors to open.
    #[arg(long, default_value_t = 0)]
    world: u32,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the end-to-end walkthrough: enter, ref up/down, a skirmish,
    /// a property lease, a reactor fan-out, and an RPC round trip.
    Demo,
    /// Print one registry's introspection text for a world (§6: not a
    /// stable format, human-diagnostic only).
    Introspect {
        /// One of participants, refs, skirmishes, properties, reactors, calls.
        registry: String,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Cli::parse();

    let result = match args.command {
        Command::Demo => run_demo(args.world),
        Command::Introspect { registry } => run_introspect(args.world, &registry),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("fusion-shim: {e:?}");
            exit_code_for(e)
        }
    }
}

fn run_introspect(world: u32, registry: &str) -> Result<(), FusionError> {
    let worlds = WorldSet::new();
    let world = worlds.open(world, false)?;
    println!("{}", world.describe(registry));
    Ok(())
}

fn run_demo(minor: u32) -> Result<(), FusionError> {
    let pid = std::process::id();
    let worlds = WorldSet::new();
    let world = worlds.open(minor, false)?;
    let version = ApiVersion { major: API_MAJOR, minor: API_MINOR };

    let a = world.enter(version, pid)?;
    let b = world.enter(version, pid)?;
    println!("entered as {a} and {b} (pid {pid})");

    let r = world.ref_new(pid);
    world.ref_up(r, Some(a))?;
    world.ref_up(r, Some(a))?;
    println!("ref {r} total after two ups: {}", world.ref_stat(r)?);
    world.ref_down(r, Some(a))?;

    // Round-trip a couple of the ioctl payload structs through bytes, the
    // way a real device node would decode them out of a `copy_from_user`
    // buffer before reaching `fusion-core`.
    let child = world.ref_new(pid);
    let inherit_req = RefInheritRequest { ref_id: child.raw(), from_id: r.raw() };
    let inherit_req = RefInheritRequest::from_bytes(&inherit_req.to_bytes()).expect("round-trips");
    world.ref_inherit(RefId(inherit_req.ref_id), RefId(inherit_req.from_id))?;
    println!("ref {child} inherited from {r}, total now {}", world.ref_stat(child)?);

    let watch_call = world.call_new(a, pid, CallHandler { handler: 0, ctx: 0 });
    let watch_req = RefWatchRequest { ref_id: child.raw(), call_id: watch_call.raw(), call_arg: 99 };
    let watch_req = RefWatchRequest::from_bytes(&watch_req.to_bytes()).expect("round-trips");
    world.ref_watch(RefId(watch_req.ref_id), CallId(watch_req.call_id), watch_req.call_arg)?;
    world.ref_down(r, Some(a))?;
    let mut watch_buf = [0u8; 256];
    let n = world.read(a, &mut watch_buf, true)?;
    println!("ref {child}'s watch fired, {n} bytes delivered to {a}");

    let s = world.skirmish_new(pid);
    let interrupt = Interrupt::new();
    world.skirmish_prevail(s, a, &interrupt)?;
    println!("skirmish {s} held by {a}, depth {}", world.skirmish_lock_count(s, a)?);
    world.skirmish_dismiss(s, a)?;

    let reactor = world.reactor_new(pid);
    world.reactor_attach(reactor, a)?;
    world.reactor_attach(reactor, b)?;
    let dispatch_payload = b"hello from fusion-shim";
    let dispatch_req = ReactorDispatchRequest {
        reactor_id: reactor.raw(),
        include_self: 0,
        size: dispatch_payload.len() as u32,
    };
    let dispatch_req = ReactorDispatchRequest::from_bytes(&dispatch_req.to_bytes()).expect("round-trips");
    world.reactor_dispatch(
        ReactorId(dispatch_req.reactor_id),
        a,
        dispatch_req.include_self != 0,
        dispatch_payload,
    )?;
    let mut buf = [0u8; 256];
    let n = world.read(b, &mut buf, true)?;
    println!("{b} received {n} bytes over reactor {reactor}");

    let call = world.call_new(a, pid, CallHandler { handler: 0, ctx: 0 });
    let exec_req = CallExecuteRequest { call_id: call.raw(), arg: 7, ptr: 0, flags: 0 };
    let exec_req = CallExecuteRequest::from_bytes(&exec_req.to_bytes()).expect("round-trips");
    let world_for_callee = world.clone();
    let callee = std::thread::spawn(move || {
        let interrupt = Interrupt::new();
        world_for_callee.call_execute(
            b,
            pid,
            CallId(exec_req.call_id),
            exec_req.arg,
            exec_req.ptr,
            exec_req.oneway(),
            &interrupt,
        )
    });
    let mut req = [0u8; 256];
    world.read(a, &mut req, true)?;
    let serial_offset = fusion_abi::message::MessageHeader::SIZE + 32;
    let serial = u32::from_ne_bytes(req[serial_offset..serial_offset + 4].try_into().unwrap());
    let return_req = CallReturnRequest { call_id: call.raw(), serial, val: 42 };
    let return_req = CallReturnRequest::from_bytes(&return_req.to_bytes()).expect("round-trips");
    world.call_return(a, CallId(return_req.call_id), return_req.serial, return_req.val)?;
    let ret = callee.join().expect("callee thread panicked");
    println!("call {call} returned {ret:?}");

    let kill_req = KillRequest { target_or_zero: b.raw(), signal: 0, timeout_ms: -1 };
    let kill_req = KillRequest::from_bytes(&kill_req.to_bytes()).expect("round-trips");
    let kill_target = (kill_req.target_or_zero != 0).then_some(ParticipantId(kill_req.target_or_zero));
    world.kill(a, kill_target, kill_req.timeout_ms)?;
    println!("delivered kill signal to {b}");

    world.leave(b)?;
    world.leave(a)?;
    worlds.reap(minor);
    Ok(())
}

fn exit_code_for(err: FusionError) -> ExitCode {
    let code: u8 = match err {
        FusionError::Invalid => 2,
        FusionError::Busy => 3,
        FusionError::WouldBlock => 4,
        FusionError::NotOwner => 5,
        FusionError::NotHolder => 6,
        FusionError::Underflow => 7,
        FusionError::AlreadyWatched => 8,
        FusionError::StillReferenced => 9,
        FusionError::MessageTooLarge => 10,
        FusionError::BadAddress => 11,
        FusionError::Gone => 12,
        FusionError::Interrupted => 13,
        FusionError::TimedOut => 14,
        FusionError::OutOfMemory => 15,
        FusionError::WouldCycle => 16,
        FusionError::NoMatch => 17,
        FusionError::Unsupported => 18,
    };
    ExitCode::from(code)
}

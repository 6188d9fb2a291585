//! Wire-compatible constants and structures shared between `fusion-core`
//! and whatever decodes control operations on its behalf (see
//! `fusion-shim`, which stands in for the out-of-scope device-node glue).
//!
//! Operation numbering here is compatibility-critical: it mirrors the
//! ioctl group/op table in the specification and must not be renumbered.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod message;

/// At most this many independent worlds share one device node.
pub const MAX_WORLDS: u32 = 8;

/// Smallest accepted payload for `send`/`dispatch` (§4.1).
pub const MIN_MESSAGE_SIZE: usize = 1;
/// Largest accepted payload for `send`/`dispatch` (§4.1). Larger transfers
/// are expected to go through shared memory and send only a handle.
pub const MAX_MESSAGE_SIZE: usize = 65_536;

/// Lease wait deadline relative to the purchase timestamp (§4.4).
pub const LEASE_VS_PURCHASED_TIMEOUT_MS: u64 = 100;
/// Purchase wait deadline relative to the purchase timestamp (§4.4).
pub const PURCHASE_VS_PURCHASED_TIMEOUT_MS: u64 = 1000;

/// Minimum number of pre-acquisitions a skirmish records for the
/// deadlock diagnostic (§4.3).
pub const MIN_SKIRMISH_PRE_ACQUIRED: usize = 32;

/// The privileged participant id allowed to call `property.holdup` (§4.4).
pub const PRIVILEGED_PARTICIPANT: u32 = 1;

/// API major version implemented here. `enter` rejects a mismatch on
/// `major`; minor version gates which operations are available.
pub const API_MAJOR: u16 = 4;
/// Current minor version.
pub const API_MINOR: u16 = 0;

/// Requested API version passed to `enter`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiVersion {
    pub major: u16,
    pub minor: u16,
}

/// Command group tag (the high byte of a control-operation number),
/// preserved from the original ioctl numbering in §6.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Group {
    Lounge = 0x01,
    Messaging = 0x02,
    Call = 0x03,
    Ref = 0x04,
    Skirmish = 0x05,
    Property = 0x06,
    Reactor = 0x07,
}

impl Group {
    pub const fn tag(self, op: u8) -> u32 {
        ((self as u32) << 8) | op as u32
    }
}

/// Control operations, grouped and numbered as in spec.md §6. The
/// numeric value is `Group::tag(op_within_group)`; only the pairing
/// matters for compatibility, not the particular byte values chosen
/// here, since there is no real ioctl table to stay binary-compatible
/// with in this crate's deployment.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    LoungeEnter = 0x0101,
    LoungeKill = 0x0102,
    LoungeEntrySetInfo = 0x0103,
    LoungeEntryGetInfo = 0x0104,

    MessagingSend = 0x0201,

    CallNew = 0x0301,
    CallExecute = 0x0302,
    CallReturn = 0x0303,
    CallDestroy = 0x0304,

    RefNew = 0x0401,
    RefDestroy = 0x0402,
    RefUp = 0x0403,
    RefUpGlobal = 0x0404,
    RefDown = 0x0405,
    RefDownGlobal = 0x0406,
    RefZeroLock = 0x0407,
    RefZeroTrylock = 0x0408,
    RefUnlock = 0x0409,
    RefStat = 0x040a,
    RefWatch = 0x040b,
    RefInherit = 0x040c,

    SkirmishNew = 0x0501,
    SkirmishPrevail = 0x0502,
    SkirmishSwoop = 0x0503,
    SkirmishDismiss = 0x0504,
    SkirmishDestroy = 0x0505,

    PropertyNew = 0x0601,
    PropertyLease = 0x0602,
    PropertyPurchase = 0x0603,
    PropertyCede = 0x0604,
    PropertyHoldup = 0x0605,
    PropertyDestroy = 0x0606,

    ReactorNew = 0x0701,
    ReactorAttach = 0x0702,
    ReactorDetach = 0x0703,
    ReactorDispatch = 0x0704,
    ReactorDestroy = 0x0705,
}

/// `{target_or_0, signal, timeout_ms}` payload for `lounge.kill` (§4.1, §6).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KillRequest {
    /// 0 broadcasts to every other participant; otherwise a single target.
    pub target_or_zero: u32,
    pub signal: u32,
    /// `<0`: one pass, no wait. `0`: wait indefinitely. `>0`: bounded wait.
    pub timeout_ms: i64,
}

impl KillRequest {
    pub const WIRE_SIZE: usize = 16;

    /// Hand-packed, not `zerocopy`: `timeout_ms` is `i64` while the
    /// other fields are `u32`, so a derived view would have to assume
    /// a padding layout this crate doesn't verify.
    pub fn to_bytes(self) -> [u8; Self::WIRE_SIZE] {
        let mut out = [0u8; Self::WIRE_SIZE];
        out[0..4].copy_from_slice(&self.target_or_zero.to_ne_bytes());
        out[4..8].copy_from_slice(&self.signal.to_ne_bytes());
        out[8..16].copy_from_slice(&self.timeout_ms.to_ne_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::WIRE_SIZE {
            return None;
        }
        Some(Self {
            target_or_zero: u32::from_ne_bytes(bytes[0..4].try_into().ok()?),
            signal: u32::from_ne_bytes(bytes[4..8].try_into().ok()?),
            timeout_ms: i64::from_ne_bytes(bytes[8..16].try_into().ok()?),
        })
    }
}

/// `{id, call_id, call_arg}` payload for `ref.watch` (§4.2, §6).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefWatchRequest {
    pub ref_id: u32,
    pub call_id: u32,
    pub call_arg: u32,
}

impl RefWatchRequest {
    pub const WIRE_SIZE: usize = 12;

    pub fn to_bytes(self) -> [u8; Self::WIRE_SIZE] {
        let mut out = [0u8; Self::WIRE_SIZE];
        out[0..4].copy_from_slice(&self.ref_id.to_ne_bytes());
        out[4..8].copy_from_slice(&self.call_id.to_ne_bytes());
        out[8..12].copy_from_slice(&self.call_arg.to_ne_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::WIRE_SIZE {
            return None;
        }
        Some(Self {
            ref_id: u32::from_ne_bytes(bytes[0..4].try_into().ok()?),
            call_id: u32::from_ne_bytes(bytes[4..8].try_into().ok()?),
            call_arg: u32::from_ne_bytes(bytes[8..12].try_into().ok()?),
        })
    }
}

/// `{id, from_id}` payload for `ref.inherit` (§4.2, §6).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefInheritRequest {
    pub ref_id: u32,
    pub from_id: u32,
}

impl RefInheritRequest {
    pub const WIRE_SIZE: usize = 8;

    pub fn to_bytes(self) -> [u8; Self::WIRE_SIZE] {
        let mut out = [0u8; Self::WIRE_SIZE];
        out[0..4].copy_from_slice(&self.ref_id.to_ne_bytes());
        out[4..8].copy_from_slice(&self.from_id.to_ne_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::WIRE_SIZE {
            return None;
        }
        Some(Self {
            ref_id: u32::from_ne_bytes(bytes[0..4].try_into().ok()?),
            from_id: u32::from_ne_bytes(bytes[4..8].try_into().ok()?),
        })
    }
}

/// `{handler, ctx}` payload for `call.new` (§4.6, §6). Both fields are
/// opaque machine-word-sized user values the kernel shuttles verbatim;
/// it never dereferences them.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallHandler {
    pub handler: u64,
    pub ctx: u64,
}

/// `{call_id, arg, ptr, flags}` payload for `call.execute` (§4.6, §6).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallExecuteRequest {
    pub call_id: u32,
    pub arg: u32,
    pub ptr: u64,
    pub flags: u32,
}

/// Set on `CallExecuteRequest::flags` to request one-way (no reply) dispatch.
pub const CALL_FLAG_ONEWAY: u32 = 0x1;

impl CallExecuteRequest {
    pub const WIRE_SIZE: usize = 20;

    pub fn to_bytes(self) -> [u8; Self::WIRE_SIZE] {
        let mut out = [0u8; Self::WIRE_SIZE];
        out[0..4].copy_from_slice(&self.call_id.to_ne_bytes());
        out[4..8].copy_from_slice(&self.arg.to_ne_bytes());
        out[8..16].copy_from_slice(&self.ptr.to_ne_bytes());
        out[16..20].copy_from_slice(&self.flags.to_ne_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::WIRE_SIZE {
            return None;
        }
        Some(Self {
            call_id: u32::from_ne_bytes(bytes[0..4].try_into().ok()?),
            arg: u32::from_ne_bytes(bytes[4..8].try_into().ok()?),
            ptr: u64::from_ne_bytes(bytes[8..16].try_into().ok()?),
            flags: u32::from_ne_bytes(bytes[16..20].try_into().ok()?),
        })
    }

    pub fn oneway(&self) -> bool {
        self.flags & CALL_FLAG_ONEWAY != 0
    }
}

/// `{call_id, serial, val}` payload for `call.return` (§4.6, §6).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallReturnRequest {
    pub call_id: u32,
    pub serial: u32,
    pub val: i32,
}

impl CallReturnRequest {
    pub const WIRE_SIZE: usize = 12;

    pub fn to_bytes(self) -> [u8; Self::WIRE_SIZE] {
        let mut out = [0u8; Self::WIRE_SIZE];
        out[0..4].copy_from_slice(&self.call_id.to_ne_bytes());
        out[4..8].copy_from_slice(&self.serial.to_ne_bytes());
        out[8..12].copy_from_slice(&self.val.to_ne_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::WIRE_SIZE {
            return None;
        }
        Some(Self {
            call_id: u32::from_ne_bytes(bytes[0..4].try_into().ok()?),
            serial: u32::from_ne_bytes(bytes[4..8].try_into().ok()?),
            val: i32::from_ne_bytes(bytes[8..12].try_into().ok()?),
        })
    }
}

/// `dispatch` payload header for `reactor.dispatch` (§4.5, §6), followed
/// by `size` bytes of message data.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReactorDispatchRequest {
    pub reactor_id: u32,
    pub include_self: u32,
    pub size: u32,
}

impl ReactorDispatchRequest {
    pub const WIRE_SIZE: usize = 12;

    pub fn to_bytes(self) -> [u8; Self::WIRE_SIZE] {
        let mut out = [0u8; Self::WIRE_SIZE];
        out[0..4].copy_from_slice(&self.reactor_id.to_ne_bytes());
        out[4..8].copy_from_slice(&self.include_self.to_ne_bytes());
        out[8..12].copy_from_slice(&self.size.to_ne_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::WIRE_SIZE {
            return None;
        }
        Some(Self {
            reactor_id: u32::from_ne_bytes(bytes[0..4].try_into().ok()?),
            include_self: u32::from_ne_bytes(bytes[4..8].try_into().ok()?),
            size: u32::from_ne_bytes(bytes[8..12].try_into().ok()?),
        })
    }
}

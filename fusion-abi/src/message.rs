//! Message framing for the participant FIFO read path (§4.1).
//!
//! Each dequeued message is emitted as a fixed header followed
//! immediately by `size` bytes of payload; headers and payloads are
//! packed contiguously with no padding between frames.

/// Tag identifying how a queued message originated, carried in the
/// read-side header (`FusionMessageType` in the original driver).
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Direct `send` from one participant to another.
    Send = 0,
    /// A call request or an orphaned-execution style reply carrier.
    Call = 1,
    /// A reactor dispatch.
    Reactor = 2,
}

/// Fixed-size header emitted before each message's payload on read.
/// All three fields are `u32` so the layout carries no inter-field
/// padding, making it safe to view as raw bytes via `zerocopy`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, zerocopy::IntoBytes, zerocopy::FromBytes, zerocopy::Immutable, zerocopy::KnownLayout)]
pub struct MessageHeader {
    pub kind: u32,
    pub msg_id: u32,
    pub size: u32,
}

impl MessageHeader {
    pub const SIZE: usize = core::mem::size_of::<MessageHeader>();

    pub fn new(kind: MessageKind, msg_id: u32, size: u32) -> Self {
        Self {
            kind: kind as u32,
            msg_id,
            size,
        }
    }

    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out.copy_from_slice(zerocopy::IntoBytes::as_bytes(&self));
        out
    }
}

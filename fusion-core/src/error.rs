//! The flat error taxonomy of spec.md §7.
//!
//! Every public operation returns one of these kinds; nothing is
//! swallowed silently. Asynchronous failures on internally generated
//! messages (a watch-triggered call, a reactor enqueue) are logged and
//! counted, never surfaced back through the originating call.

/// Every way a `fusion-core` operation can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusionError {
    /// Unknown id, or an entry in the wrong state for this operation.
    Invalid,
    /// Cannot proceed right now; try later (exclusive open, non-blocking trylock).
    Busy,
    /// Explicit non-blocking path found nothing to do.
    WouldBlock,
    /// Caller does not own the call it tried to operate on.
    NotOwner,
    /// Calling thread does not hold the skirmish/property it tried to release.
    NotHolder,
    /// A `down` would take a count below zero.
    Underflow,
    /// A watch is already installed on this ref.
    AlreadyWatched,
    /// `zero_trylock` found a nonzero count.
    StillReferenced,
    /// Payload outside `[MIN_MESSAGE_SIZE, MAX_MESSAGE_SIZE]`.
    MessageTooLarge,
    /// A user memory copy faulted.
    BadAddress,
    /// The id was valid when the operation started but the entry was
    /// destroyed while the caller was asleep.
    Gone,
    /// The wait was cancelled by a signal before its condition was met.
    Interrupted,
    /// A bounded wait ran out of time.
    TimedOut,
    /// Allocation failed.
    OutOfMemory,
    /// A `ref.inherit` would close a parent/child cycle.
    WouldCycle,
    /// `call.return` found no execution matching `(call_id, serial)`.
    NoMatch,
    /// The requested operation is not available at the caller's API version.
    Unsupported,
}

pub type FusionResult<T> = Result<T, FusionError>;

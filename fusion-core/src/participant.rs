//! Participants and their message FIFOs (§4.1).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use fusion_abi::message::{MessageHeader, MessageKind};
use fusion_abi::{MAX_MESSAGE_SIZE, MIN_MESSAGE_SIZE};

use crate::error::{FusionError, FusionResult};
use crate::ids::ParticipantId;
use crate::wait::{self, Interrupt};

/// `0` as a source/recipient id means "the system", used for
/// watch-triggered call requests (§4.2) whose caller is nobody.
pub const SYSTEM_SOURCE: u32 = 0;

/// One queued message, framed on read as `MessageHeader` + payload.
#[derive(Debug, Clone)]
pub struct Message {
    pub kind: MessageKind,
    pub source: u32,
    pub msg_id: u32,
    pub payload: Vec<u8>,
}

impl Message {
    fn encoded_len(&self) -> usize {
        MessageHeader::SIZE + self.payload.len()
    }
}

struct FifoState {
    queue: VecDeque<Message>,
    destroyed: bool,
}

/// A participant: id, creator pid, message FIFO, and its own wait
/// queue for blocking reads. Destruction cascades through every other
/// registry (§4.1) before this entry is dropped.
pub struct Participant {
    id: ParticipantId,
    creator_pid: u32,
    fifo: Mutex<FifoState>,
    fifo_cv: Condvar,
    received: AtomicU64,
    sent: AtomicU64,
    /// Signalled by `kill` to interrupt a blocking read in progress.
    read_interrupt: Interrupt,
}

impl Participant {
    pub fn new(id: u32, creator_pid: u32) -> Self {
        Self {
            id: ParticipantId(id),
            creator_pid,
            fifo: Mutex::new(FifoState {
                queue: VecDeque::new(),
                destroyed: false,
            }),
            fifo_cv: Condvar::new(),
            received: AtomicU64::new(0),
            sent: AtomicU64::new(0),
            read_interrupt: Interrupt::new(),
        }
    }

    pub fn id(&self) -> ParticipantId {
        self.id
    }

    pub fn creator_pid(&self) -> u32 {
        self.creator_pid
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Append a message and wake blocked readers. Used for `send`,
    /// reactor dispatch, and call-request/return delivery alike: every
    /// outgoing notification in the system is "append to a FIFO and
    /// wake" (§2).
    pub fn enqueue(&self, msg: Message) {
        let mut state = self.fifo.lock().unwrap();
        if state.destroyed {
            return;
        }
        state.queue.push_back(msg);
        self.sent.fetch_add(1, Ordering::Relaxed);
        self.fifo_cv.notify_all();
    }

    /// Mark this participant gone: wakes every current and future
    /// waiter with `Gone`, and drains the FIFO (§4.1 teardown).
    pub fn mark_destroyed(&self) {
        let mut state = self.fifo.lock().unwrap();
        state.destroyed = true;
        state.queue.clear();
        self.fifo_cv.notify_all();
        self.read_interrupt.signal();
    }

    /// Deliver a signal that interrupts a blocking `read` in progress.
    /// Kill (§4.1) uses this; it does not by itself terminate anything.
    pub fn deliver_signal(&self) {
        self.read_interrupt.signal();
        self.fifo_cv.notify_all();
    }

    pub fn poll(&self) -> bool {
        !self.fifo.lock().unwrap().queue.is_empty()
    }

    /// Read as many whole queued messages as fit in `buf`. If the
    /// first queued message doesn't fit, fails `MessageTooLarge` and
    /// writes nothing (§4.1). With an empty FIFO, `blocking` chooses
    /// between `WouldBlock` and parking on the FIFO's wait queue.
    pub fn read(&self, buf: &mut [u8], blocking: bool) -> FusionResult<usize> {
        let mut state = self.fifo.lock().unwrap();

        if state.queue.is_empty() {
            if !blocking {
                return Err(FusionError::WouldBlock);
            }
            self.read_interrupt.clear();
            state = wait::wait_for(
                state,
                &self.fifo_cv,
                &self.read_interrupt,
                None,
                |s| !s.queue.is_empty(),
                |s| s.destroyed,
            )?;
        }

        if state.destroyed {
            return Err(FusionError::Gone);
        }

        let Some(first) = state.queue.front() else {
            // Woken but another reader drained the FIFO first.
            return Err(FusionError::WouldBlock);
        };
        if first.encoded_len() > buf.len() {
            return Err(FusionError::MessageTooLarge);
        }

        let mut written = 0usize;
        while let Some(msg) = state.queue.front() {
            let len = msg.encoded_len();
            if written + len > buf.len() {
                break;
            }
            let msg = state.queue.pop_front().unwrap();
            let header = MessageHeader::new(msg.kind, msg.msg_id, msg.payload.len() as u32);
            let header_bytes = header.to_bytes();
            buf[written..written + MessageHeader::SIZE].copy_from_slice(&header_bytes);
            written += MessageHeader::SIZE;
            buf[written..written + msg.payload.len()].copy_from_slice(&msg.payload);
            written += msg.payload.len();
        }

        self.received.fetch_add(1, Ordering::Relaxed);
        Ok(written)
    }
}

/// Validate a send/dispatch payload size against §4.1's bounds.
pub fn check_payload_size(len: usize) -> FusionResult<()> {
    if len < MIN_MESSAGE_SIZE || len > MAX_MESSAGE_SIZE {
        Err(FusionError::MessageTooLarge)
    } else {
        Ok(())
    }
}

/// Deadline helper for `kill`'s bounded wait (§4.1): `timeout_ms < 0`
/// means one pass with no wait, `0` means wait forever, `>0` bounds it.
pub enum KillWait {
    NoWait,
    Forever,
    Bounded(Instant),
}

pub fn kill_deadline(timeout_ms: i64) -> KillWait {
    if timeout_ms < 0 {
        KillWait::NoWait
    } else if timeout_ms == 0 {
        KillWait::Forever
    } else {
        KillWait::Bounded(Instant::now() + Duration::from_millis(timeout_ms as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fusion_abi::message::MessageKind;

    #[test]
    fn send_then_read_round_trip() {
        let p = Participant::new(1, 42);
        p.enqueue(Message {
            kind: MessageKind::Send,
            source: 7,
            msg_id: 99,
            payload: vec![1, 2, 3],
        });
        assert!(p.poll());

        let mut buf = [0u8; 64];
        let n = p.read(&mut buf, false).unwrap();
        assert_eq!(n, MessageHeader::SIZE + 3);
        assert!(!p.poll());
    }

    #[test]
    fn empty_nonblocking_read_would_block() {
        let p = Participant::new(1, 42);
        let mut buf = [0u8; 64];
        assert_eq!(p.read(&mut buf, false), Err(FusionError::WouldBlock));
    }

    #[test]
    fn buffer_too_small_for_first_message_leaves_it_queued() {
        let p = Participant::new(1, 42);
        p.enqueue(Message {
            kind: MessageKind::Send,
            source: 0,
            msg_id: 1,
            payload: vec![0u8; 10],
        });
        let mut buf = [0u8; 4];
        assert_eq!(
            p.read(&mut buf, false),
            Err(FusionError::MessageTooLarge)
        );
        assert!(p.poll());
    }

    #[test]
    fn message_size_bounds() {
        assert!(check_payload_size(0).is_err());
        assert!(check_payload_size(1).is_ok());
        assert!(check_payload_size(MAX_MESSAGE_SIZE).is_ok());
        assert!(check_payload_size(MAX_MESSAGE_SIZE + 1).is_err());
    }
}

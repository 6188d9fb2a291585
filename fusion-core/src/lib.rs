//! `fusion-core`: an in-process, multi-world coordination service for
//! cooperating participants sharing memory — message FIFOs, distributed
//! reference counts, recursive cross-process mutexes, tri-state property
//! leases, pub/sub reactors, and synchronous RPC calls built on top of
//! the message substrate.
//!
//! Translated from the Linux `fusion` character-device driver's kernel
//! module into a userspace library: each `World` plays the role of one
//! minor device, each `Participant` the role of one `Fusionee` (the
//! process that opened it), and every blocking primitive that the
//! original parks on a `wait_queue_head_t` parks here on a
//! [`std::sync::Condvar`] instead (see [`wait`]).

pub mod call;
pub mod error;
pub mod ids;
pub mod participant;
pub mod property;
pub mod reactor;
pub mod refs;
pub mod registry;
pub mod skirmish;
pub mod wait;
pub mod world;

pub use error::{FusionError, FusionResult};
pub use ids::{CallId, ParticipantId, PropertyId, ReactorId, RefId, SkirmishId};
pub use wait::Interrupt;
pub use world::{World, WorldSet};

pub use fusion_abi::{ApiVersion, CallHandler, Group, Op, API_MAJOR, API_MINOR, MAX_WORLDS};

//! Id newtypes for each registry, and the monotonic generator behind
//! them. Ids are never reused within a world's lifetime (§3), so each
//! generator is a simple saturating counter rather than a free-list.

use std::sync::atomic::{AtomicU32, Ordering};

macro_rules! id_type {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u32);

        impl $name {
            pub const fn raw(self) -> u32 {
                self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(ParticipantId, "Identifies one participant within a world.");
id_type!(RefId, "Identifies one ref within a world.");
id_type!(SkirmishId, "Identifies one skirmish within a world.");
id_type!(PropertyId, "Identifies one property within a world.");
id_type!(ReactorId, "Identifies one reactor within a world.");
id_type!(CallId, "Identifies one call within a world.");
id_type!(Serial, "A non-zero, monotonic per-call invocation number.");

/// A per-registry, per-world monotonic id source.
///
/// Mirrors the teacher's `HandleTable::next_id` / `ProcessId::new`
/// counters: ids are assigned on insert and never recycled, even
/// across destroy, for the lifetime of the world.
#[derive(Debug, Default)]
pub struct IdGenerator(AtomicU32);

impl IdGenerator {
    pub const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    /// Allocate the next id, starting at 0.
    pub fn next(&self) -> u32 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }

    /// Allocate the next id, starting at 1 (used for call serials, which
    /// reserve 0 to mean "no serial", i.e. a one-way call).
    pub fn next_nonzero(&self) -> u32 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

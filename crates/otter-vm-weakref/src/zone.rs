//! Heap partitions ("zones") and their collection state.
//!
//! Zones are swept independently. A finalization registry and the targets it
//! observes may live in different zones, so the only thing we can rely on when
//! a target dies is the state of the *registry's* zone at that moment.

use std::fmt;

/// Identifier of a heap partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ZoneId(u32);

impl ZoneId {
    /// Create a zone id
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Raw id
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "zone#{}", self.0)
    }
}

/// Collection state of a zone, in the order a cycle walks through them.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ZoneGcState {
    /// Not being collected
    NoGc = 0,
    /// Marking black
    MarkBlackOnly = 1,
    /// Marking black and gray
    MarkBlackAndGray = 2,
    /// Sweeping
    Sweep = 3,
    /// Swept, waiting for the cycle to finish
    Finished = 4,
    /// Compacting
    Compact = 5,
}

/// A heap partition.
#[derive(Debug)]
pub struct Zone {
    id: ZoneId,
    gc_started: bool,
    gc_state: ZoneGcState,
}

impl Zone {
    /// Create an idle zone
    pub fn new(id: ZoneId) -> Self {
        Self {
            id,
            gc_started: false,
            gc_state: ZoneGcState::NoGc,
        }
    }

    /// Zone id
    pub fn id(&self) -> ZoneId {
        self.id
    }

    /// Whether this zone is part of the current collection
    pub fn was_gc_started(&self) -> bool {
        self.gc_started
    }

    /// Current collection state
    pub fn gc_state(&self) -> ZoneGcState {
        self.gc_state
    }

    /// Include this zone in a collection; it starts marking.
    pub fn begin_gc(&mut self) {
        self.gc_started = true;
        self.gc_state = ZoneGcState::MarkBlackOnly;
    }

    /// Advance the collection state
    pub fn set_gc_state(&mut self, state: ZoneGcState) {
        debug_assert!(self.gc_started || state == ZoneGcState::NoGc);
        debug_assert!(state >= self.gc_state || state == ZoneGcState::NoGc);
        self.gc_state = state;
    }

    /// Leave the collection
    pub fn end_gc(&mut self) {
        self.gc_started = false;
        self.gc_state = ZoneGcState::NoGc;
    }

    /// A registry's cleanup may only be scheduled once its own zone has been
    /// swept (or is not being collected at all). Before that we cannot tell
    /// whether the registry itself is garbage.
    pub fn can_schedule_finalization_cleanup(&self) -> bool {
        !self.was_gc_started() || self.gc_state() >= ZoneGcState::Sweep
    }
}

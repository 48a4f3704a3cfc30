//! Finalization records.
//!
//! One record is created per `FinalizationRegistry.prototype.register` call.
//! It pairs the held value with the queue that will deliver it, and lives in
//! the observer list of its target until the target dies or the record is
//! unregistered.
//!
//! ```text
//!               register()
//!                   |
//!                   v
//!   +-------> InRecordMap ---- target dies (sweep) ----> InQueue
//!   |               |                                      |
//!   |          unregister()                     drained / unregister()
//!   |               v                                      v
//!   +---------- Unregistered <-----------------------------+
//! ```

use crate::heap::ArenaIndex;
use crate::observer_list::{ListLinks, ObserverListObject};
use crate::queue::FinalizationQueue;
use crate::value::Value;

/// Handle to a finalization record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FinalizationRecord(pub(crate) ArenaIndex);

/// Lifecycle state of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    /// Cleared: no queue, no held value, no callback will fire
    Unregistered,
    /// Observing its target through the target zone's record map
    InRecordMap,
    /// Target died; waiting in its queue for the cleanup callback
    InQueue,
}

/// Heap data of a finalization record.
#[derive(Debug)]
pub struct FinalizationRecordData {
    /// `None` once unregistered
    queue: Option<FinalizationQueue>,
    /// Strongly held until delivered or unregistered
    held_value: Value,
    in_record_map: bool,
    /// Physically present in the queue's pending list
    in_queue: bool,
    links: Option<ListLinks>,
}

impl FinalizationRecordData {
    pub(crate) fn new(queue: FinalizationQueue, held_value: Value) -> Self {
        Self {
            queue: Some(queue),
            held_value,
            in_record_map: false,
            in_queue: false,
            links: None,
        }
    }

    /// The queue that will deliver this record, `None` once unregistered
    pub fn queue(&self) -> Option<FinalizationQueue> {
        self.queue
    }

    /// The held value (undefined once cleared)
    pub fn held_value(&self) -> &Value {
        &self.held_value
    }

    /// Check if the record can still produce a callback
    pub fn is_registered(&self) -> bool {
        debug_assert!(self.queue.is_some() || self.held_value.is_undefined());
        self.queue.is_some()
    }

    /// Current lifecycle state
    pub fn state(&self) -> RecordState {
        if !self.is_registered() {
            RecordState::Unregistered
        } else if self.in_queue {
            debug_assert!(!self.in_record_map);
            RecordState::InQueue
        } else {
            RecordState::InRecordMap
        }
    }

    /// Check if linked into a target's observer list
    pub fn is_in_record_map(&self) -> bool {
        self.in_record_map
    }

    /// Check if present in a queue's pending list
    pub fn is_in_queue(&self) -> bool {
        self.in_queue
    }

    pub(crate) fn set_in_record_map(&mut self, value: bool) {
        debug_assert_ne!(self.in_record_map, value);
        debug_assert!(!(value && self.in_queue));
        self.in_record_map = value;
    }

    pub(crate) fn set_in_queue(&mut self, value: bool) {
        debug_assert_ne!(self.in_queue, value);
        debug_assert!(!(value && self.in_record_map));
        self.in_queue = value;
    }

    /// Forget the queue and hand back the held value.
    pub(crate) fn clear(&mut self) -> Value {
        debug_assert!(self.queue.is_some());
        self.queue = None;
        std::mem::take(&mut self.held_value)
    }
}

impl ObserverListObject for FinalizationRecordData {
    fn list_links(&self) -> Option<ListLinks> {
        self.links
    }

    fn set_list_links(&mut self, links: Option<ListLinks>) {
        self.links = links;
    }
}

//! Finalization queues.
//!
//! Each registry owns one queue. Records whose targets died are appended to
//! the queue during sweep and drained, oldest first, by the cleanup job or by
//! `cleanupSome`.

use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::error::{WeakRefError, WeakRefResult, oom_unsafe_crash};
use crate::heap::{ArenaIndex, ObserverHeap};
use crate::host::HostHooks;
use crate::record::FinalizationRecord;
use crate::registry::FinalizationRegistry;
use crate::runtime::{WeakRefRuntime, WeakRefStats};
use crate::value::Value;
use crate::zone::{Zone, ZoneId};

/// Cleanup callback: receives the held value of one finalized registration.
///
/// An `Err` is a thrown exception; draining stops and the remaining records
/// stay queued.
pub type CleanupCallback = Rc<dyn Fn(&mut WeakRefRuntime, Value) -> Result<(), Value>>;

/// Handle to a finalization queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FinalizationQueue(pub(crate) ArenaIndex);

/// Heap data of a finalization queue
pub struct FinalizationQueueData {
    /// Zone of the owning registry
    zone: ZoneId,
    registry: Option<FinalizationRegistry>,
    cleanup_callback: CleanupCallback,
    host_defined_data: Option<Value>,
    records_to_be_cleaned_up: VecDeque<FinalizationRecord>,
    is_queued_for_cleanup: bool,
}

impl FinalizationQueueData {
    pub(crate) fn new(
        zone: ZoneId,
        cleanup_callback: CleanupCallback,
        host_defined_data: Option<Value>,
    ) -> Self {
        Self {
            zone,
            registry: None,
            cleanup_callback,
            host_defined_data,
            records_to_be_cleaned_up: VecDeque::new(),
            is_queued_for_cleanup: false,
        }
    }

    /// Zone of the owning registry
    pub fn zone(&self) -> ZoneId {
        self.zone
    }

    /// Owning registry, `None` once it was collected
    pub fn registry(&self) -> Option<FinalizationRegistry> {
        self.registry
    }

    /// Check if a live registry owns this queue
    pub fn has_registry(&self) -> bool {
        self.registry.is_some()
    }

    pub(crate) fn set_registry(&mut self, registry: Option<FinalizationRegistry>) {
        debug_assert_ne!(self.registry.is_some(), registry.is_some());
        self.registry = registry;
    }

    /// The registry's cleanup callback
    pub fn cleanup_callback(&self) -> &CleanupCallback {
        &self.cleanup_callback
    }

    /// Host context captured at registry creation
    pub fn host_defined_data(&self) -> Option<&Value> {
        self.host_defined_data.as_ref()
    }

    /// Check if records are waiting for delivery
    pub fn has_records_to_clean_up(&self) -> bool {
        !self.records_to_be_cleaned_up.is_empty()
    }

    /// Records waiting for delivery, oldest first
    pub fn records_to_be_cleaned_up(&self) -> impl Iterator<Item = FinalizationRecord> + '_ {
        self.records_to_be_cleaned_up.iter().copied()
    }

    /// Check if the host has been asked to run cleanup
    pub fn is_queued_for_cleanup(&self) -> bool {
        self.is_queued_for_cleanup
    }

    pub(crate) fn set_queued_for_cleanup(&mut self, value: bool) {
        debug_assert_ne!(self.is_queued_for_cleanup, value);
        self.is_queued_for_cleanup = value;
    }

    pub(crate) fn pop_record(&mut self) -> Option<FinalizationRecord> {
        self.records_to_be_cleaned_up.pop_front()
    }

    pub(crate) fn take_records(&mut self) -> VecDeque<FinalizationRecord> {
        std::mem::take(&mut self.records_to_be_cleaned_up)
    }
}

impl fmt::Debug for FinalizationQueueData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinalizationQueueData")
            .field("zone", &self.zone)
            .field("registry", &self.registry)
            .field("pending", &self.records_to_be_cleaned_up.len())
            .field("is_queued_for_cleanup", &self.is_queued_for_cleanup)
            .finish_non_exhaustive()
    }
}

impl FinalizationQueue {
    /// Move a record whose target died into this queue.
    ///
    /// Runs during sweep; allocation failure aborts.
    pub(crate) fn queue_record_to_be_cleaned_up(
        self,
        heap: &mut ObserverHeap,
        record: FinalizationRecord,
    ) {
        let (Some(data), Some(queue)) = heap.record_and_queue_mut(record, self) else {
            debug_assert!(false, "queuing a record into a released queue");
            return;
        };
        debug_assert!(queue.has_registry());
        debug_assert!(data.is_registered());

        if queue.records_to_be_cleaned_up.try_reserve(1).is_err() {
            oom_unsafe_crash("FinalizationQueue::queue_record_to_be_cleaned_up");
        }
        data.set_in_queue(true);
        queue.records_to_be_cleaned_up.push_back(record);
    }

    /// A queue may only be handed to the host once the registry's zone has
    /// been swept or is not being collected.
    pub(crate) fn should_queue_for_cleanup(
        self,
        heap: &ObserverHeap,
        zones: &FxHashMap<ZoneId, Zone>,
    ) -> bool {
        heap.queue(self).is_some_and(|queue| {
            zones
                .get(&queue.zone())
                .is_none_or(Zone::can_schedule_finalization_cleanup)
        })
    }

    /// Ask the host to run cleanup for this queue, once.
    pub(crate) fn request_cleanup(
        self,
        heap: &mut ObserverHeap,
        host: &mut dyn HostHooks,
        stats: &mut WeakRefStats,
    ) {
        let Some(queue) = heap.queue_mut(self) else {
            return;
        };
        if queue.is_queued_for_cleanup() {
            return;
        }
        if queue
            .host_defined_data()
            .is_some_and(|data| host.is_dead_wrapper(data))
        {
            return;
        }

        host.queue_cleanup(self);
        queue.set_queued_for_cleanup(true);
        stats.cleanup_requests += 1;

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "otter::gc::weak",
            queue = self.0.index(),
            pending = queue.records_to_be_cleaned_up.len(),
            "finalization cleanup requested"
        );
    }
}

impl FinalizationQueue {
    /// Free the queue and every record still waiting in it.
    pub(crate) fn release(self, heap: &mut ObserverHeap) {
        let Some(mut data) = heap.free_queue(self) else {
            return;
        };
        for record in data.take_records() {
            heap.free_record(record);
        }
    }
}

impl WeakRefRuntime {
    /// Host job for a scheduled queue: clear the scheduled flag and deliver
    /// every pending record with the registry's callback.
    pub fn do_cleanup(&mut self, queue: FinalizationQueue) -> WeakRefResult<()> {
        let data = self
            .heap
            .queue_mut(queue)
            .ok_or(WeakRefError::StaleHandle("FinalizationQueue"))?;
        if data.is_queued_for_cleanup() {
            data.set_queued_for_cleanup(false);
        }
        let callback = Rc::clone(data.cleanup_callback());

        let result = self.cleanup_queued_records(queue, &callback);
        self.finish_orphaned_queue(queue);
        result
    }

    /// A queue that outlived its registry is only reachable from a cleanup
    /// job. Records left behind by a failed callback get another job;
    /// otherwise the queue is freed.
    fn finish_orphaned_queue(&mut self, queue: FinalizationQueue) {
        let Some(data) = self.heap.queue(queue) else {
            return;
        };
        if data.has_registry() || data.is_queued_for_cleanup() {
            return;
        }
        if data.has_records_to_clean_up() {
            queue.request_cleanup(&mut self.heap, &mut *self.host, &mut self.stats);
        }
        // The host may decline, e.g. for a dead wrapper.
        let scheduled = self
            .heap
            .queue(queue)
            .is_some_and(FinalizationQueueData::is_queued_for_cleanup);
        if !scheduled {
            queue.release(&mut self.heap);
        }
    }

    /// Deliver pending records oldest first.
    ///
    /// Each record is popped and cleared before its callback runs, so the
    /// callback may register or unregister freely. Records unregistered while
    /// queued are dropped without a call.
    pub(crate) fn cleanup_queued_records(
        &mut self,
        queue: FinalizationQueue,
        callback: &CleanupCallback,
    ) -> WeakRefResult<()> {
        loop {
            let Some(record) = self.heap.queue_mut(queue).and_then(|q| q.pop_record()) else {
                return Ok(());
            };
            let Some(data) = self.heap.record_mut(record) else {
                continue;
            };
            debug_assert!(!data.is_in_record_map());
            data.set_in_queue(false);

            if !data.is_registered() {
                self.heap.free_record(record);
                continue;
            }

            let held_value = data.clear();
            self.heap.free_record(record);
            self.stats.callbacks_invoked += 1;

            #[cfg(feature = "gc_logging")]
            tracing::debug!(
                target: "otter::gc::weak",
                queue = queue.0.index(),
                held = %held_value,
                "delivering finalization record"
            );

            callback(self, held_value).map_err(WeakRefError::Callback)?;
        }
    }

    /// Records waiting in a registry's queue
    pub fn pending_record_count(&self, registry: FinalizationRegistry) -> usize {
        self.registry_queue(registry)
            .and_then(|queue| self.heap.queue(queue))
            .map_or(0, |queue| queue.records_to_be_cleaned_up.len())
    }

    /// Check if the host has been asked to clean up a registry's queue
    pub fn is_queued_for_cleanup(&self, registry: FinalizationRegistry) -> bool {
        self.registry_queue(registry)
            .and_then(|queue| self.heap.queue(queue))
            .is_some_and(FinalizationQueueData::is_queued_for_cleanup)
    }
}

//! Per-zone weak edge bookkeeping and its sweep.
//!
//! Each zone that owns a weakly observed target, or a registry, gets one
//! [`FinalizationObservers`] the first time it is needed. It maps targets to
//! observer lists (one map for finalization records, one for weak refs) and
//! remembers which registries live in the zone.
//!
//! ## Sweep
//!
//! [`FinalizationObservers::trace_weak_edges`] runs once per zone per cycle,
//! with exclusive access to the zone, in three passes:
//!
//! 1. **Registries.** Dead registries give up their queue and records. Live
//!    ones prune their tables and, if their queue already holds records, ask
//!    for cleanup now that the registry is known to be alive.
//! 2. **Records.** Records whose registry died are dropped. If the target
//!    itself died, every remaining record is moved to its queue (oldest
//!    registration first) and cleanup is requested when the registry's zone
//!    allows it.
//! 3. **Weak refs.** Collected weak refs are dropped, the rest are cleared if
//!    the target died or rewritten if it moved.
//!
//! Registry liveness must be settled before records are queued, since a
//! registry swept in step 1 may be what makes pending callbacks deliverable.

use indexmap::{IndexMap, IndexSet};
use rustc_hash::{FxBuildHasher, FxHashMap};

use crate::error::{WeakRefError, WeakRefResult, oom_unsafe_crash};
use crate::heap::ObserverHeap;
use crate::host::HostHooks;
use crate::observer_list::{ListId, ObserverLinks};
use crate::record::FinalizationRecord;
use crate::registry::FinalizationRegistry;
use crate::runtime::WeakRefStats;
use crate::tracer::{TraceResult, WeakEdgeTracer};
use crate::value::WeakTarget;
use crate::weak_ref::WeakRef;
use crate::zone::{Zone, ZoneId};

type ObserverMap = IndexMap<WeakTarget, ListId, FxBuildHasher>;

/// Everything a sweep may touch outside the zone's own tables.
pub(crate) struct SweepContext<'a> {
    pub(crate) heap: &'a mut ObserverHeap,
    pub(crate) zones: &'a FxHashMap<ZoneId, Zone>,
    pub(crate) host: &'a mut dyn HostHooks,
    pub(crate) stats: &'a mut WeakRefStats,
}

/// Weak edge tables of one zone
#[derive(Debug)]
pub struct FinalizationObservers {
    zone: ZoneId,
    /// Registries living in this zone
    registries: IndexSet<FinalizationRegistry, FxBuildHasher>,
    /// Target → list of finalization records
    record_map: ObserverMap,
    /// Target → list of weak refs
    weak_ref_map: ObserverMap,
}

/// The zone's observers, created on first use.
pub(crate) fn observers_for(
    observers: &mut FxHashMap<ZoneId, FinalizationObservers>,
    zone: ZoneId,
    capacity: usize,
) -> &mut FinalizationObservers {
    observers
        .entry(zone)
        .or_insert_with(|| FinalizationObservers::new(zone, capacity))
}

impl FinalizationObservers {
    /// Create empty tables for `zone`
    pub fn new(zone: ZoneId, capacity: usize) -> Self {
        Self {
            zone,
            registries: IndexSet::with_capacity_and_hasher(capacity, FxBuildHasher),
            record_map: ObserverMap::with_capacity_and_hasher(capacity, FxBuildHasher),
            weak_ref_map: ObserverMap::with_capacity_and_hasher(capacity, FxBuildHasher),
        }
    }

    /// Zone these tables belong to
    pub fn zone(&self) -> ZoneId {
        self.zone
    }

    /// Registries living in this zone
    pub fn registries(&self) -> impl Iterator<Item = FinalizationRegistry> + '_ {
        self.registries.iter().copied()
    }

    /// Targets observed by finalization records, in first-registration order
    pub fn record_targets(&self) -> impl Iterator<Item = WeakTarget> + '_ {
        self.record_map.keys().copied()
    }

    /// Targets observed by weak refs, in first-construction order
    pub fn weak_ref_targets(&self) -> impl Iterator<Item = WeakTarget> + '_ {
        self.weak_ref_map.keys().copied()
    }

    /// Record list of a target
    pub fn records_for(&self, target: &WeakTarget) -> Option<ListId> {
        self.record_map.get(target).copied()
    }

    /// Weak-ref list of a target
    pub fn weak_refs_for(&self, target: &WeakTarget) -> Option<ListId> {
        self.weak_ref_map.get(target).copied()
    }

    pub(crate) fn add_registry(&mut self, registry: FinalizationRegistry) -> WeakRefResult<()> {
        self.registries
            .try_reserve(1)
            .map_err(|_| WeakRefError::OutOfMemory)?;
        self.registries.insert(registry);
        Ok(())
    }

    /// Start observing `target` with `record`. On failure nothing changes.
    pub(crate) fn add_record(
        &mut self,
        heap: &mut ObserverHeap,
        target: WeakTarget,
        record: FinalizationRecord,
    ) -> WeakRefResult<()> {
        debug_assert_eq!(target.zone(), self.zone);
        let list = list_for(&mut self.record_map, heap, target)?;
        heap.insert_front(list.0.index(), record.0.index());
        if let Some(data) = heap.record_mut(record) {
            data.set_in_record_map(true);
        }
        Ok(())
    }

    /// Start observing `target` with `weak_ref`. On failure nothing changes.
    pub(crate) fn add_weak_ref(
        &mut self,
        heap: &mut ObserverHeap,
        target: WeakTarget,
        weak_ref: WeakRef,
    ) -> WeakRefResult<()> {
        debug_assert_eq!(target.zone(), self.zone);
        let list = list_for(&mut self.weak_ref_map, heap, target)?;
        heap.insert_front(list.0.index(), weak_ref.0.index());
        if let Some(data) = heap.weak_ref_mut(weak_ref) {
            data.set_target(target);
        }
        Ok(())
    }

    /// Clear a single weak ref, dropping the target's entry once its list is empty.
    pub(crate) fn remove_weak_ref_target(
        &mut self,
        heap: &mut ObserverHeap,
        target: WeakTarget,
        weak_ref: WeakRef,
    ) {
        if let Some(data) = heap.weak_ref_mut(weak_ref) {
            data.clear_target();
        }
        heap.unlink(weak_ref.0.index());

        if let Some(&list) = self.weak_ref_map.get(&target)
            && heap.is_list_empty(list.0.index())
        {
            self.weak_ref_map.shift_remove(&target);
            heap.free_list(list);
        }
    }

    /// Drop every record observing a target in this zone. No callbacks will
    /// fire for them. Returns the number of records dropped.
    pub(crate) fn clear_records(&mut self, heap: &mut ObserverHeap) -> usize {
        let mut cleared = 0;
        for (_, list) in self.record_map.drain(..) {
            let mut iter = heap.list_iter(list.0.index());
            while let Some(element) = iter.next_element(heap) {
                let Some(record) = heap.record_at(element) else {
                    heap.unlink(element);
                    continue;
                };
                if let Some(data) = heap.record_mut(record) {
                    data.set_in_record_map(false);
                    if data.is_registered() {
                        drop(data.clear());
                    }
                }
                heap.free_record(record);
                cleared += 1;
            }
            heap.free_list(list);
        }
        cleared
    }

    /// Clear every weak ref observing a target in this zone.
    pub(crate) fn clear_weak_refs(&mut self, heap: &mut ObserverHeap) -> usize {
        let mut cleared = 0;
        for (_, list) in self.weak_ref_map.drain(..) {
            cleared += clear_weak_ref_list(heap, list);
            heap.free_list(list);
        }
        cleared
    }

    /// Hand over the zone's registries, leaving none behind.
    pub(crate) fn take_registries(&mut self) -> Vec<FinalizationRegistry> {
        self.registries.drain(..).collect()
    }

    /// Sweep this zone's weak edges. See the module docs for the order.
    pub(crate) fn trace_weak_edges(
        &mut self,
        cx: &mut SweepContext<'_>,
        tracer: &mut dyn WeakEdgeTracer,
    ) {
        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "otter::gc::weak",
            zone = %self.zone,
            registries = self.registries.len(),
            record_targets = self.record_map.len(),
            weak_ref_targets = self.weak_ref_map.len(),
            "weak edge sweep starting"
        );

        self.sweep_registries(cx, tracer);
        self.sweep_records(cx, tracer);
        self.sweep_weak_refs(cx, tracer);
        cx.stats.sweeps += 1;

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "otter::gc::weak",
            zone = %self.zone,
            registries = self.registries.len(),
            record_targets = self.record_map.len(),
            weak_ref_targets = self.weak_ref_map.len(),
            "weak edge sweep complete"
        );
    }

    fn sweep_registries(&mut self, cx: &mut SweepContext<'_>, tracer: &mut dyn WeakEdgeTracer) {
        self.registries.retain(|&registry| {
            if cx.heap.registry(registry).is_none() {
                return false;
            }

            if !tracer.is_registry_alive(registry) {
                registry.release(cx.heap);
                cx.stats.registries_swept += 1;

                #[cfg(feature = "gc_logging")]
                tracing::debug!(
                    target: "otter::gc::weak",
                    registry = registry.0.index(),
                    "finalization registry collected"
                );
                return false;
            }

            registry.trace_weak(cx.heap, tracer);

            // The registry is known to be alive now, so records queued by an
            // earlier sweep of another zone can be delivered.
            if let Some(queue) = cx.heap.registry(registry).map(|data| data.queue())
                && cx
                    .heap
                    .queue(queue)
                    .is_some_and(|queue| queue.has_records_to_clean_up())
                && queue.should_queue_for_cleanup(cx.heap, cx.zones)
            {
                queue.request_cleanup(cx.heap, &mut *cx.host, cx.stats);
            }
            true
        });
    }

    fn sweep_records(&mut self, cx: &mut SweepContext<'_>, tracer: &mut dyn WeakEdgeTracer) {
        let old = std::mem::take(&mut self.record_map);
        let mut map = ObserverMap::with_hasher(FxBuildHasher);
        if map.try_reserve(old.len()).is_err() {
            oom_unsafe_crash("FinalizationObservers::sweep_records");
        }

        for (target, list) in old {
            drop_orphaned_records(cx.heap, list, tracer);
            if cx.heap.is_list_empty(list.0.index()) {
                cx.heap.free_list(list);
                continue;
            }

            match trace_target(tracer, target) {
                TraceResult::Alive(target) => {
                    map.insert(target, list);
                }
                TraceResult::Dead => {
                    queue_records_for_cleanup(cx, list);
                    cx.heap.free_list(list);
                }
            }
        }

        self.record_map = map;
    }

    fn sweep_weak_refs(&mut self, cx: &mut SweepContext<'_>, tracer: &mut dyn WeakEdgeTracer) {
        let old = std::mem::take(&mut self.weak_ref_map);
        let mut map = ObserverMap::with_hasher(FxBuildHasher);
        if map.try_reserve(old.len()).is_err() {
            oom_unsafe_crash("FinalizationObservers::sweep_weak_refs");
        }

        for (target, list) in old {
            // Weak ref objects that were collected themselves
            let mut iter = cx.heap.list_iter(list.0.index());
            while let Some(element) = iter.next_element(cx.heap) {
                if let Some(weak_ref) = cx.heap.weak_ref_at(element)
                    && !tracer.is_weak_ref_alive(weak_ref)
                {
                    cx.heap.free_weak_ref(weak_ref);
                }
            }
            if cx.heap.is_list_empty(list.0.index()) {
                cx.heap.free_list(list);
                continue;
            }

            match trace_target(tracer, target) {
                TraceResult::Dead => {
                    let cleared = clear_weak_ref_list(cx.heap, list);
                    cx.stats.weak_refs_cleared += cleared as u64;
                    cx.heap.free_list(list);

                    #[cfg(feature = "gc_logging")]
                    tracing::debug!(
                        target: "otter::gc::weak",
                        target_cell = %target,
                        cleared,
                        "weak refs cleared"
                    );
                }
                TraceResult::Alive(moved) => {
                    if moved != target {
                        retarget_weak_ref_list(cx.heap, list, moved);
                    }
                    map.insert(moved, list);
                }
            }
        }

        self.weak_ref_map = map;
    }
}

/// Get or create the list for `target`. On failure the map is untouched.
fn list_for(
    map: &mut ObserverMap,
    heap: &mut ObserverHeap,
    target: WeakTarget,
) -> WeakRefResult<ListId> {
    if let Some(&list) = map.get(&target) {
        return Ok(list);
    }
    map.try_reserve(1).map_err(|_| WeakRefError::OutOfMemory)?;
    let list = heap.alloc_list()?;
    map.insert(target, list);
    Ok(list)
}

/// Permanent targets never die and never move.
fn trace_target(tracer: &mut dyn WeakEdgeTracer, target: WeakTarget) -> TraceResult {
    if target.is_permanent() {
        TraceResult::Alive(target)
    } else {
        tracer.trace_target(target)
    }
}

/// Drop records whose registry was collected. The registry may live in a
/// zone that has not been swept yet, so this cannot wait for its sweep.
fn drop_orphaned_records(heap: &mut ObserverHeap, list: ListId, tracer: &mut dyn WeakEdgeTracer) {
    let mut iter = heap.list_iter(list.0.index());
    while let Some(element) = iter.next_element(heap) {
        let Some(record) = heap.record_at(element) else {
            continue;
        };
        let registry = heap
            .record(record)
            .and_then(|data| data.queue())
            .and_then(|queue| heap.queue(queue))
            .and_then(|queue| queue.registry());
        let alive = registry.is_some_and(|registry| tracer.is_registry_alive(registry));
        if !alive {
            if let Some(data) = heap.record_mut(record) {
                data.set_in_record_map(false);
            }
            heap.free_record(record);
        }
    }
}

/// The target died: move each record into its queue, oldest registration
/// first, and ask for cleanup where the registry's zone allows it.
fn queue_records_for_cleanup(cx: &mut SweepContext<'_>, list: ListId) {
    let mut iter = cx.heap.list_iter_back(list.0.index());
    while let Some(element) = iter.next_element(cx.heap) {
        let Some(record) = cx.heap.record_at(element) else {
            continue;
        };
        let queue = match cx.heap.record_mut(record) {
            Some(data) => {
                data.set_in_record_map(false);
                data.queue()
            }
            None => None,
        };
        cx.heap.unlink(element);

        let Some(queue) = queue else {
            cx.heap.free_record(record);
            continue;
        };
        queue.queue_record_to_be_cleaned_up(cx.heap, record);
        cx.stats.records_queued += 1;

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "otter::gc::weak",
            queue = queue.0.index(),
            record = record.0.index(),
            "finalization record queued"
        );

        if queue.should_queue_for_cleanup(cx.heap, cx.zones) {
            queue.request_cleanup(cx.heap, &mut *cx.host, cx.stats);
        }
    }
}

fn clear_weak_ref_list(heap: &mut ObserverHeap, list: ListId) -> usize {
    let mut cleared = 0;
    let mut iter = heap.list_iter(list.0.index());
    while let Some(element) = iter.next_element(heap) {
        if let Some(weak_ref) = heap.weak_ref_at(element)
            && let Some(data) = heap.weak_ref_mut(weak_ref)
        {
            data.clear_target();
            cleared += 1;
        }
        heap.unlink(element);
    }
    cleared
}

fn retarget_weak_ref_list(heap: &mut ObserverHeap, list: ListId, target: WeakTarget) {
    let mut iter = heap.list_iter(list.0.index());
    while let Some(element) = iter.next_element(heap) {
        if let Some(weak_ref) = heap.weak_ref_at(element)
            && let Some(data) = heap.weak_ref_mut(weak_ref)
        {
            data.set_target(target);
        }
    }
}

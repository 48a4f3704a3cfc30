//! The weak reference runtime.
//!
//! Owns the observer heap, zone state, per-zone observer tables and the host
//! hooks. Script-facing entry points are implemented next to the types they
//! operate on (`weak_ref.rs`, `registry.rs`, `queue.rs`); collector-facing
//! entry points live here.

use indexmap::IndexSet;
use rustc_hash::{FxBuildHasher, FxHashMap};

use crate::config::WeakRefConfig;
use crate::heap::ObserverHeap;
use crate::host::{HostHooks, NoopHost};
use crate::observers::{FinalizationObservers, SweepContext};
use crate::tracer::{TraceResult, WeakEdgeTracer};
use crate::value::WeakTarget;
use crate::zone::{Zone, ZoneId};

/// Weak reference statistics
#[derive(Debug, Default, Clone)]
pub struct WeakRefStats {
    /// Zone sweeps run
    pub sweeps: u64,
    /// Weak refs cleared because their target died or was released
    pub weak_refs_cleared: u64,
    /// Finalization records moved to a queue
    pub records_queued: u64,
    /// Registries found dead during sweep
    pub registries_swept: u64,
    /// Cleanup jobs requested from the host
    pub cleanup_requests: u64,
    /// Cleanup callbacks invoked
    pub callbacks_invoked: u64,
}

/// Weak reference and finalization registry runtime
pub struct WeakRefRuntime {
    pub(crate) config: WeakRefConfig,
    pub(crate) heap: ObserverHeap,
    pub(crate) zones: FxHashMap<ZoneId, Zone>,
    pub(crate) observers: FxHashMap<ZoneId, FinalizationObservers>,
    pub(crate) host: Box<dyn HostHooks>,
    /// Targets kept alive until the end of the current job
    pub(crate) kept_objects: IndexSet<WeakTarget, FxBuildHasher>,
    pub(crate) stats: WeakRefStats,
}

impl WeakRefRuntime {
    /// Create a runtime
    pub fn new(config: WeakRefConfig, host: Box<dyn HostHooks>) -> Self {
        Self {
            heap: ObserverHeap::new(config.heap_limit),
            zones: FxHashMap::default(),
            observers: FxHashMap::default(),
            host,
            kept_objects: IndexSet::default(),
            stats: WeakRefStats::default(),
            config,
        }
    }

    /// Create a runtime with the default config
    pub fn with_host(host: Box<dyn HostHooks>) -> Self {
        Self::new(WeakRefConfig::default(), host)
    }

    /// Configuration
    pub fn config(&self) -> &WeakRefConfig {
        &self.config
    }

    /// The observer heap
    pub fn heap(&self) -> &ObserverHeap {
        &self.heap
    }

    /// Statistics
    pub fn stats(&self) -> &WeakRefStats {
        &self.stats
    }

    /// Zone state, if the zone has been touched by the collector
    pub fn zone(&self, zone: ZoneId) -> Option<&Zone> {
        self.zones.get(&zone)
    }

    /// Zone state, created idle on first use
    pub fn zone_mut(&mut self, zone: ZoneId) -> &mut Zone {
        self.zones.entry(zone).or_insert_with(|| Zone::new(zone))
    }

    /// Weak edge tables of a zone, if any were created
    pub fn finalization_observers(&self, zone: ZoneId) -> Option<&FinalizationObservers> {
        self.observers.get(&zone)
    }

    /// Collector entry point: sweep the weak edges of `zone`.
    ///
    /// Must run after marking, once per zone per cycle, with no mutator
    /// activity in the zone.
    pub fn trace_weak_edges(&mut self, zone: ZoneId, tracer: &mut dyn WeakEdgeTracer) {
        self.trace_kept_objects(zone, tracer);

        let Some(observers) = self.observers.get_mut(&zone) else {
            return;
        };
        let mut cx = SweepContext {
            heap: &mut self.heap,
            zones: &self.zones,
            host: &mut *self.host,
            stats: &mut self.stats,
        };
        observers.trace_weak_edges(&mut cx, tracer);
    }

    /// Kept objects are roots, but compaction may still move them: rewrite the
    /// ones in `zone` to their new addresses.
    fn trace_kept_objects(&mut self, zone: ZoneId, tracer: &mut dyn WeakEdgeTracer) {
        if !self.kept_objects.iter().any(|target| target.zone() == zone) {
            return;
        }
        let old = std::mem::take(&mut self.kept_objects);
        let mut kept = IndexSet::with_capacity_and_hasher(old.len(), FxBuildHasher);
        for target in old {
            if target.zone() != zone {
                kept.insert(target);
                continue;
            }
            if let TraceResult::Alive(moved) = tracer.trace_target(target) {
                kept.insert(moved);
            }
        }
        self.kept_objects = kept;
    }

    /// Runtime shutdown: finalization records are dropped without running
    /// callbacks. Weak refs stay usable.
    pub fn shutdown(&mut self) {
        if !self.config.clear_records_on_shutdown {
            return;
        }
        let mut cleared = 0;
        for observers in self.observers.values_mut() {
            cleared += observers.clear_records(&mut self.heap);
        }

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "otter::gc::weak",
            records = cleared,
            "finalization records cleared on shutdown"
        );
        #[cfg(not(feature = "gc_logging"))]
        let _ = cleared;
    }

    /// Zone teardown: release every table of `zone`, the registries living in
    /// it (queues and records included) and the weak refs living in it.
    pub fn destroy_zone(&mut self, zone: ZoneId) {
        if let Some(mut observers) = self.observers.remove(&zone) {
            observers.clear_records(&mut self.heap);
            observers.clear_weak_refs(&mut self.heap);
            for registry in observers.take_registries() {
                let queue = self.heap.registry(registry).map(|data| data.queue());
                registry.release(&mut self.heap);
                // A cleanup job already handed to the host finds a stale queue.
                if let Some(queue) = queue {
                    queue.release(&mut self.heap);
                }
            }
        }

        // Lists these leave empty in other zones are dropped at their next sweep.
        for weak_ref in self.heap.weak_refs_in(zone) {
            self.heap.free_weak_ref(weak_ref);
        }
        self.zones.remove(&zone);
        self.kept_objects.retain(|target| target.zone() != zone);
    }
}

impl Default for WeakRefRuntime {
    fn default() -> Self {
        Self::with_host(Box::new(NoopHost))
    }
}

impl std::fmt::Debug for WeakRefRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakRefRuntime")
            .field("config", &self.config)
            .field("heap", &self.heap)
            .field("zones", &self.zones.len())
            .field("observers", &self.observers.len())
            .field("kept_objects", &self.kept_objects.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mark::MarkTable;
    use crate::value::{CellRef, Value};
    use std::rc::Rc;

    const ZONE: ZoneId = ZoneId::new(0);

    #[test]
    fn test_sweep_of_untouched_zone_is_noop() {
        let mut rt = WeakRefRuntime::default();
        rt.trace_weak_edges(ZoneId::new(9), &mut MarkTable::new());
        assert_eq!(rt.stats().sweeps, 0);
    }

    #[test]
    fn test_shutdown_clears_records_but_not_weak_refs() {
        let mut rt = WeakRefRuntime::default();
        let obj = Value::object(CellRef::new(ZONE, 0x10));
        let registry = rt
            .new_finalization_registry(ZONE, Rc::new(|_, _| Ok(())), None)
            .unwrap();
        let record = rt
            .register(registry, &obj, Value::string("held"), None)
            .unwrap();
        let weak_ref = rt.new_weak_ref(ZONE, &obj).unwrap();

        rt.shutdown();
        assert_eq!(rt.record_state(record), None);
        assert_eq!(rt.finalization_observers(ZONE).unwrap().record_targets().count(), 0);
        assert_eq!(rt.deref(weak_ref).unwrap(), Some(obj));
    }

    #[test]
    fn test_shutdown_can_keep_records() {
        let config = WeakRefConfig {
            clear_records_on_shutdown: false,
            ..WeakRefConfig::default()
        };
        let mut rt = WeakRefRuntime::new(config, Box::new(NoopHost));
        let registry = rt
            .new_finalization_registry(ZONE, Rc::new(|_, _| Ok(())), None)
            .unwrap();
        let record = rt
            .register(
                registry,
                &Value::object(CellRef::new(ZONE, 0x10)),
                Value::string("held"),
                None,
            )
            .unwrap();
        rt.shutdown();
        assert!(rt.record_state(record).is_some());
    }

    #[test]
    fn test_destroy_zone_releases_everything() {
        let mut rt = WeakRefRuntime::default();
        let obj = Value::object(CellRef::new(ZONE, 0x10));
        let registry = rt
            .new_finalization_registry(ZONE, Rc::new(|_, _| Ok(())), None)
            .unwrap();
        rt.register(registry, &obj, Value::string("held"), None)
            .unwrap();
        let weak_ref = rt.new_weak_ref(ZONE, &obj).unwrap();
        let other = ZoneId::new(1);
        let remote = Value::object(CellRef::new(other, 0x20));
        let remote_ref = rt.new_weak_ref(ZONE, &remote).unwrap();
        rt.zone_mut(ZONE).begin_gc();

        rt.destroy_zone(ZONE);
        assert!(rt.finalization_observers(ZONE).is_none());
        assert!(rt.zone(ZONE).is_none());
        assert_eq!(rt.heap().registry_count(), 0);
        assert_eq!(rt.heap().queue_count(), 0);
        assert_eq!(rt.heap().observer_count(), 0);
        assert_eq!(rt.weak_ref_target(weak_ref), None);
        assert!(rt.deref(weak_ref).is_err());
        assert!(rt.deref(remote_ref).is_err());
        assert_eq!(
            rt.kept_objects().collect::<Vec<_>>(),
            vec![WeakTarget::Object(CellRef::new(other, 0x20))]
        );

        // Only the remote target's emptied list is left until its zone sweeps.
        assert_eq!(rt.heap().list_count(), 1);
        rt.trace_weak_edges(other, &mut MarkTable::new());
        assert_eq!(rt.heap().list_count(), 0);
        assert_eq!(
            rt.finalization_observers(other).unwrap().weak_ref_targets().count(),
            0
        );
    }

    #[test]
    fn test_destroy_zone_releases_observers_of_other_zones_targets() {
        let mut rt = WeakRefRuntime::default();
        let other = ZoneId::new(1);
        let remote = Value::object(CellRef::new(other, 0x10));
        let registry = rt
            .new_finalization_registry(ZONE, Rc::new(|_, _| Ok(())), None)
            .unwrap();
        rt.register(registry, &remote, Value::string("held"), None)
            .unwrap();
        let doomed = rt.new_weak_ref(ZONE, &remote).unwrap();
        let survivor = rt.new_weak_ref(other, &remote).unwrap();

        rt.destroy_zone(ZONE);
        assert!(matches!(
            rt.deref(doomed),
            Err(crate::error::WeakRefError::StaleHandle(_))
        ));
        assert_eq!(rt.heap().observer_count(), 1);
        assert_eq!(rt.heap().queue_count(), 0);

        // The emptied record list goes at the other zone's next sweep.
        rt.trace_weak_edges(other, &mut MarkTable::new());
        let observers = rt.finalization_observers(other).unwrap();
        assert_eq!(observers.record_targets().count(), 0);
        assert_eq!(observers.weak_ref_targets().count(), 1);
        assert_eq!(rt.heap().list_count(), 1);
        assert_eq!(rt.deref(survivor).unwrap(), Some(remote));
    }

    #[test]
    fn test_destroy_zone_drops_scheduled_queue() {
        let mut rt = WeakRefRuntime::default();
        let registry = rt
            .new_finalization_registry(ZONE, Rc::new(|_, _| Ok(())), None)
            .unwrap();
        rt.register(
            registry,
            &Value::object(CellRef::new(ZONE, 0x10)),
            Value::string("held"),
            None,
        )
        .unwrap();
        let mut marks = MarkTable::new();
        marks.unmark(CellRef::new(ZONE, 0x10));
        rt.trace_weak_edges(ZONE, &mut marks);
        let queue = rt.registry_queue(registry).unwrap();
        assert!(rt.is_queued_for_cleanup(registry));

        rt.destroy_zone(ZONE);
        assert_eq!(rt.heap().queue_count(), 0);
        assert_eq!(rt.heap().observer_count(), 0);
        assert!(rt.do_cleanup(queue).is_err());
    }
}

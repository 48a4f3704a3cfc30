//! FinalizationRegistry support
//!
//! A registry owns its queue, the list of records it created and the
//! unregister-token index. The records themselves are observed through the
//! record map of each target's zone.

use std::rc::Rc;

use crate::error::{WeakRefError, WeakRefResult};
use crate::heap::{ArenaIndex, ObserverHeap};
use crate::observers::observers_for;
use crate::queue::{CleanupCallback, FinalizationQueue, FinalizationQueueData};
use crate::record::{FinalizationRecord, FinalizationRecordData, RecordState};
use crate::registrations::FinalizationRegistrations;
use crate::runtime::WeakRefRuntime;
use crate::tracer::WeakEdgeTracer;
use crate::value::{Value, WeakTarget, can_be_held_weakly};
use crate::zone::ZoneId;

/// Handle to a finalization registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FinalizationRegistry(pub(crate) ArenaIndex);

/// Heap data of a finalization registry
#[derive(Debug)]
pub struct FinalizationRegistryData {
    zone: ZoneId,
    queue: FinalizationQueue,
    /// Every record created by `register` that may still fire
    records: Vec<FinalizationRecord>,
    registrations: FinalizationRegistrations,
}

impl FinalizationRegistryData {
    pub(crate) fn new(zone: ZoneId, queue: FinalizationQueue) -> Self {
        Self {
            zone,
            queue,
            records: Vec::new(),
            registrations: FinalizationRegistrations::new(),
        }
    }

    /// Zone of the registry object
    pub fn zone(&self) -> ZoneId {
        self.zone
    }

    /// The queue delivering this registry's records
    pub fn queue(&self) -> FinalizationQueue {
        self.queue
    }

    /// Records created by this registry that have not been pruned
    pub fn records(&self) -> &[FinalizationRecord] {
        &self.records
    }

    /// The unregister-token index
    pub fn registrations(&self) -> &FinalizationRegistrations {
        &self.registrations
    }

    pub(crate) fn take_records(&mut self) -> Vec<FinalizationRecord> {
        std::mem::take(&mut self.records)
    }
}

impl FinalizationRegistry {
    /// Sweep the registry's own tables: forget records that can no longer
    /// fire and unregister tokens that died.
    pub(crate) fn trace_weak(self, heap: &mut ObserverHeap, tracer: &mut dyn WeakEdgeTracer) {
        let live: Vec<FinalizationRecord> = match heap.registry(self) {
            Some(data) => data
                .records
                .iter()
                .copied()
                .filter(|r| heap.record(*r).is_some_and(FinalizationRecordData::is_registered))
                .collect(),
            None => return,
        };
        let Some(data) = heap.registry_mut(self) else {
            return;
        };
        data.registrations.retain_records(|r| live.contains(&r));
        data.records = live;
        data.registrations.sweep_tokens(tracer);
    }
}

impl FinalizationRegistry {
    /// The registry was collected: drop the records still observing targets
    /// and detach the queue. A queue the host was already asked to clean up
    /// lives on until that job has run.
    pub(crate) fn release(self, heap: &mut ObserverHeap) {
        let Some(mut data) = heap.free_registry(self) else {
            return;
        };
        let queue = data.queue();
        for record in data.take_records() {
            let queued = heap.record(record).is_some_and(FinalizationRecordData::is_in_queue);
            if !queued {
                heap.free_record(record);
            }
        }

        let Some(queue_data) = heap.queue_mut(queue) else {
            return;
        };
        queue_data.set_registry(None);
        if !queue_data.is_queued_for_cleanup() {
            queue.release(heap);
        }
    }
}

/// Rollback state for a half-finished `register`
struct PendingRegistration {
    registry: FinalizationRegistry,
    record: FinalizationRecord,
    pushed: bool,
    token: Option<WeakTarget>,
}

impl PendingRegistration {
    fn undo(self, heap: &mut ObserverHeap) {
        if let Some(data) = heap.registry_mut(self.registry) {
            if let Some(token) = self.token {
                data.registrations.remove(token, self.record);
            }
            if self.pushed {
                let popped = data.records.pop();
                debug_assert_eq!(popped, Some(self.record));
            }
        }
        heap.free_record(self.record);
    }
}

impl WeakRefRuntime {
    /// `new FinalizationRegistry(callback)` in `zone`.
    pub fn new_finalization_registry(
        &mut self,
        zone: ZoneId,
        cleanup_callback: CleanupCallback,
        host_defined_data: Option<Value>,
    ) -> WeakRefResult<FinalizationRegistry> {
        let queue = self.heap.alloc_queue(FinalizationQueueData::new(
            zone,
            cleanup_callback,
            host_defined_data,
        ))?;
        let registry = match self
            .heap
            .alloc_registry(FinalizationRegistryData::new(zone, queue))
        {
            Ok(registry) => registry,
            Err(err) => {
                self.heap.free_queue(queue);
                return Err(err);
            }
        };

        let observers = observers_for(
            &mut self.observers,
            zone,
            self.config.initial_table_capacity,
        );
        if let Err(err) = observers.add_registry(registry) {
            self.heap.free_registry(registry);
            self.heap.free_queue(queue);
            return Err(err);
        }
        if let Some(queue) = self.heap.queue_mut(queue) {
            queue.set_registry(Some(registry));
        }
        Ok(registry)
    }

    /// `FinalizationRegistry.prototype.register`.
    ///
    /// Either every table is updated or, on error, none is.
    pub fn register(
        &mut self,
        registry: FinalizationRegistry,
        target: &Value,
        held_value: Value,
        unregister_token: Option<&Value>,
    ) -> WeakRefResult<FinalizationRecord> {
        let Some(weak_target) = can_be_held_weakly(target) else {
            return Err(WeakRefError::invalid_target(
                "FinalizationRegistry.prototype.register: invalid target",
            ));
        };
        if held_value == *target {
            return Err(WeakRefError::HeldValueIsTarget);
        }
        let token = match unregister_token {
            None | Some(Value::Undefined) => None,
            Some(token) => Some(
                can_be_held_weakly(token)
                    .ok_or_else(|| WeakRefError::invalid_token("register", token))?,
            ),
        };

        let queue = self
            .heap
            .registry(registry)
            .ok_or(WeakRefError::StaleHandle("FinalizationRegistry"))?
            .queue();

        if !self.host.preserve_wrapper(&weak_target) {
            return Err(WeakRefError::CannotPreserveWrapper);
        }

        let record = self
            .heap
            .alloc_record(FinalizationRecordData::new(queue, held_value))?;
        let mut pending = PendingRegistration {
            registry,
            record,
            pushed: false,
            token: None,
        };

        if let Err(err) = self.add_registration(&mut pending, weak_target, token) {
            #[cfg(feature = "gc_logging")]
            tracing::debug!(
                target: "otter::gc::weak",
                registry = registry.0.index(),
                error = %err,
                "registration rolled back"
            );

            pending.undo(&mut self.heap);
            return Err(err);
        }
        Ok(record)
    }

    fn add_registration(
        &mut self,
        pending: &mut PendingRegistration,
        target: WeakTarget,
        token: Option<WeakTarget>,
    ) -> WeakRefResult<()> {
        let data = self
            .heap
            .registry_mut(pending.registry)
            .ok_or(WeakRefError::StaleHandle("FinalizationRegistry"))?;
        data.records
            .try_reserve(1)
            .map_err(|_| WeakRefError::OutOfMemory)?;
        data.records.push(pending.record);
        pending.pushed = true;

        if let Some(token) = token {
            data.registrations.try_add(token, pending.record)?;
            pending.token = Some(token);
        }

        let observers = observers_for(
            &mut self.observers,
            target.zone(),
            self.config.initial_table_capacity,
        );
        observers.add_record(&mut self.heap, target, pending.record)
    }

    /// `FinalizationRegistry.prototype.unregister`: cancel every registration
    /// made with `token`. Returns whether any was still pending.
    pub fn unregister(
        &mut self,
        registry: FinalizationRegistry,
        token: &Value,
    ) -> WeakRefResult<bool> {
        let Some(token) = can_be_held_weakly(token) else {
            return Err(WeakRefError::invalid_token("unregister", token));
        };
        let data = self
            .heap
            .registry_mut(registry)
            .ok_or(WeakRefError::StaleHandle("FinalizationRegistry"))?;
        let Some(records) = data.registrations.take(&token) else {
            return Ok(false);
        };

        let mut removed = false;
        for &record in &records {
            removed |= self.unregister_record(record);
        }

        if let Some(data) = self.heap.registry_mut(registry) {
            data.records.retain(|r| !records.contains(r));
        }
        Ok(removed)
    }

    /// Clear one record so it never fires. Returns false if it already could not.
    fn unregister_record(&mut self, record: FinalizationRecord) -> bool {
        let Some(data) = self.heap.record_mut(record) else {
            return false;
        };
        if !data.is_registered() {
            return false;
        }

        // An emptied target list is pruned at the next sweep of its zone.
        if data.is_in_record_map() {
            data.set_in_record_map(false);
        }
        drop(data.clear());

        // A queued record stays in the queue until drained, which skips it.
        if !data.is_in_queue() {
            self.heap.free_record(record);
        }
        true
    }

    /// `FinalizationRegistry.prototype.cleanupSome`: synchronously deliver
    /// pending records with `callback`, or the registry's own callback.
    pub fn cleanup_some(
        &mut self,
        registry: FinalizationRegistry,
        callback: Option<CleanupCallback>,
    ) -> WeakRefResult<()> {
        let queue = self
            .registry_queue(registry)
            .ok_or(WeakRefError::StaleHandle("FinalizationRegistry"))?;
        let callback = match callback {
            Some(callback) => callback,
            None => Rc::clone(
                self.heap
                    .queue(queue)
                    .ok_or(WeakRefError::StaleHandle("FinalizationQueue"))?
                    .cleanup_callback(),
            ),
        };
        self.cleanup_queued_records(queue, &callback)
    }

    /// Queue of a registry
    pub fn registry_queue(&self, registry: FinalizationRegistry) -> Option<FinalizationQueue> {
        self.heap.registry(registry).map(FinalizationRegistryData::queue)
    }

    /// Records a registry may still deliver
    pub fn registry_records(&self, registry: FinalizationRegistry) -> Vec<FinalizationRecord> {
        self.heap
            .registry(registry)
            .map(|data| data.records.clone())
            .unwrap_or_default()
    }

    /// State of a record, `None` once its storage was reclaimed
    pub fn record_state(&self, record: FinalizationRecord) -> Option<RecordState> {
        self.heap.record(record).map(FinalizationRecordData::state)
    }

    /// Held value of a pending record
    pub fn record_held_value(&self, record: FinalizationRecord) -> Option<&Value> {
        self.heap
            .record(record)
            .filter(|data| data.is_registered())
            .map(FinalizationRecordData::held_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{CellRef, SymbolKind};

    const ZONE: ZoneId = ZoneId::new(0);

    fn noop() -> CleanupCallback {
        Rc::new(|_, _| Ok(()))
    }

    fn obj(addr: u64) -> Value {
        Value::object(CellRef::new(ZONE, addr))
    }

    #[test]
    fn test_register_validation() {
        let mut rt = WeakRefRuntime::default();
        let registry = rt.new_finalization_registry(ZONE, noop(), None).unwrap();

        let err = rt
            .register(registry, &Value::number(1.0), Value::undefined(), None)
            .unwrap_err();
        assert!(matches!(err, WeakRefError::InvalidTarget(_)));

        let err = rt.register(registry, &obj(1), obj(1), None).unwrap_err();
        assert!(matches!(err, WeakRefError::HeldValueIsTarget));

        let registered = Value::symbol(CellRef::new(ZONE, 2), SymbolKind::Registered);
        let err = rt
            .register(registry, &obj(1), Value::undefined(), Some(&registered))
            .unwrap_err();
        assert!(matches!(
            err,
            WeakRefError::InvalidUnregisterToken { method: "register", .. }
        ));

        // An undefined token means "no token"
        rt.register(registry, &obj(1), Value::undefined(), Some(&Value::undefined()))
            .unwrap();
        assert!(rt.heap().registry(registry).unwrap().registrations().is_empty());
        assert_eq!(rt.registry_records(registry).len(), 1);
    }

    #[test]
    fn test_unregister_clears_and_reports() {
        let mut rt = WeakRefRuntime::default();
        let registry = rt.new_finalization_registry(ZONE, noop(), None).unwrap();
        let token = obj(100);

        let a = rt
            .register(registry, &obj(1), Value::string("a"), Some(&token))
            .unwrap();
        let b = rt
            .register(registry, &obj(2), Value::string("b"), Some(&token))
            .unwrap();
        let c = rt.register(registry, &obj(3), Value::string("c"), None).unwrap();
        assert_eq!(rt.record_state(a), Some(RecordState::InRecordMap));

        assert!(rt.unregister(registry, &token).unwrap());
        assert_eq!(rt.record_state(a), None);
        assert_eq!(rt.record_state(b), None);
        assert_eq!(rt.record_state(c), Some(RecordState::InRecordMap));
        assert_eq!(rt.registry_records(registry), vec![c]);
        let token_target = can_be_held_weakly(&token).unwrap();
        let data = rt.heap().registry(registry).unwrap();
        assert!(!data.registrations().contains(&token_target));

        // Nothing left under the token
        assert!(!rt.unregister(registry, &token).unwrap());

        let err = rt.unregister(registry, &Value::string("x")).unwrap_err();
        assert!(matches!(
            err,
            WeakRefError::InvalidUnregisterToken { method: "unregister", .. }
        ));
    }

    #[test]
    fn test_cleanup_some_with_nothing_queued() {
        let mut rt = WeakRefRuntime::default();
        let calls = Rc::new(std::cell::Cell::new(0));
        let counter = Rc::clone(&calls);
        let registry = rt
            .new_finalization_registry(
                ZONE,
                Rc::new(move |_, _| {
                    counter.set(counter.get() + 1);
                    Ok(())
                }),
                None,
            )
            .unwrap();
        rt.register(registry, &obj(1), Value::string("a"), None).unwrap();

        rt.cleanup_some(registry, None).unwrap();
        assert_eq!(calls.get(), 0);
        assert_eq!(rt.pending_record_count(registry), 0);
    }
}

//! WeakRef support
//!
//! A weak ref stores its target untraced and sits in the observer list for that
//! target in the target zone's weak-ref map. The collector clears it when the
//! target dies and rewrites it when the target moves.

use crate::error::{WeakRefError, WeakRefResult};
use crate::heap::ArenaIndex;
use crate::observer_list::{ListLinks, ObserverListObject};
use crate::observers::observers_for;
use crate::runtime::WeakRefRuntime;
use crate::value::{Value, WeakTarget, can_be_held_weakly};
use crate::zone::ZoneId;

/// Handle to a weak ref
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WeakRef(pub(crate) ArenaIndex);

/// Heap data of a weak ref.
///
/// `target` is `None` exactly when the weak ref is not linked into any list.
#[derive(Debug)]
pub struct WeakRefData {
    /// Zone the weak ref object itself lives in
    zone: ZoneId,
    /// Weak, untraced
    target: Option<WeakTarget>,
    links: Option<ListLinks>,
}

impl WeakRefData {
    pub(crate) fn new(zone: ZoneId) -> Self {
        Self {
            zone,
            target: None,
            links: None,
        }
    }

    /// Zone of the weak ref object
    pub fn zone(&self) -> ZoneId {
        self.zone
    }

    /// Current target, `None` once cleared
    pub fn target(&self) -> Option<WeakTarget> {
        self.target
    }

    pub(crate) fn set_target(&mut self, target: WeakTarget) {
        self.target = Some(target);
    }

    pub(crate) fn clear_target(&mut self) {
        self.target = None;
    }
}

impl ObserverListObject for WeakRefData {
    fn list_links(&self) -> Option<ListLinks> {
        self.links
    }

    fn set_list_links(&mut self, links: Option<ListLinks>) {
        self.links = links;
    }
}

impl WeakRefRuntime {
    /// `new WeakRef(target)`: create a weak ref living in `zone`.
    pub fn new_weak_ref(&mut self, zone: ZoneId, target: &Value) -> WeakRefResult<WeakRef> {
        let Some(target) = can_be_held_weakly(target) else {
            return Err(WeakRefError::invalid_target(
                "WeakRef: invalid target, must be an object or a non-registered symbol",
            ));
        };
        if !self.host.preserve_wrapper(&target) {
            return Err(WeakRefError::CannotPreserveWrapper);
        }

        let weak_ref = self.heap.alloc_weak_ref(WeakRefData::new(zone))?;
        let observers = observers_for(
            &mut self.observers,
            target.zone(),
            self.config.initial_table_capacity,
        );
        if let Err(err) = observers.add_weak_ref(&mut self.heap, target, weak_ref) {
            self.heap.free_weak_ref(weak_ref);
            return Err(err);
        }

        self.add_to_kept_objects(target);
        Ok(weak_ref)
    }

    /// `WeakRef.prototype.deref`: the target, or `None` once it was collected.
    ///
    /// A live target is kept alive until [`clear_kept_objects`](Self::clear_kept_objects).
    pub fn deref(&mut self, weak_ref: WeakRef) -> WeakRefResult<Option<Value>> {
        let target = self
            .heap
            .weak_ref(weak_ref)
            .ok_or(WeakRefError::StaleHandle("WeakRef"))?
            .target();
        let Some(target) = target else {
            return Ok(None);
        };

        if self.host.is_wrapper_released(&target) {
            self.remove_weak_ref_target(weak_ref, target);
            return Ok(None);
        }

        self.add_to_kept_objects(target);
        Ok(Some(target.to_value()))
    }

    /// Clear one weak ref eagerly, outside of collection.
    fn remove_weak_ref_target(&mut self, weak_ref: WeakRef, target: WeakTarget) {
        if let Some(observers) = self.observers.get_mut(&target.zone()) {
            observers.remove_weak_ref_target(&mut self.heap, target, weak_ref);
        }
        self.stats.weak_refs_cleared += 1;

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "otter::gc::weak",
            target_cell = %target,
            "weak ref cleared by read barrier"
        );
    }

    fn add_to_kept_objects(&mut self, target: WeakTarget) {
        if !target.is_permanent() {
            self.kept_objects.insert(target);
        }
    }

    /// Targets kept alive by the current job
    pub fn kept_objects(&self) -> impl Iterator<Item = WeakTarget> + '_ {
        self.kept_objects.iter().copied()
    }

    /// End of a synchronous job: forget the kept-alive targets.
    pub fn clear_kept_objects(&mut self) {
        self.kept_objects.clear();
    }

    /// Current target of a weak ref without the read barrier or keep-alive
    pub fn weak_ref_target(&self, weak_ref: WeakRef) -> Option<WeakTarget> {
        self.heap.weak_ref(weak_ref)?.target()
    }
}

//! Observer heap
//!
//! Weak refs, finalization records, list heads, queues and registries live in
//! generational arenas. Handles are stable for the lifetime of the object, so
//! list links never need fixing up when the collector compacts target cells;
//! only the weak targets themselves move.
//!
//! Weak refs and records share one arena so that an element link is a single
//! index regardless of which kind of observer it points at.

use crate::error::{WeakRefError, WeakRefResult};
use crate::observer_list::{
    ListId, ListLinks, ObserverLinks, ObserverListObject, ObserverListPtr, PtrKind,
};
use crate::queue::{FinalizationQueue, FinalizationQueueData};
use crate::record::{FinalizationRecord, FinalizationRecordData};
use crate::registry::{FinalizationRegistry, FinalizationRegistryData};
use crate::weak_ref::{WeakRef, WeakRefData};
use crate::zone::ZoneId;

/// Generational index into an arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArenaIndex {
    index: u32,
    generation: u32,
}

impl ArenaIndex {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Generation of the slot when this handle was created
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot arena with free-list reuse and generation checks.
#[derive(Debug)]
pub(crate) struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    live: usize,
}

impl<T> Arena<T> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    /// Insert a value, failing instead of aborting if the slot vector cannot grow.
    pub(crate) fn try_insert(&mut self, value: T) -> WeakRefResult<ArenaIndex> {
        let index = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                debug_assert!(slot.value.is_none());
                slot.value = Some(value);
                ArenaIndex::new(index, slot.generation)
            }
            None => {
                let index =
                    u32::try_from(self.slots.len()).map_err(|_| WeakRefError::OutOfMemory)?;
                self.slots
                    .try_reserve(1)
                    .map_err(|_| WeakRefError::OutOfMemory)?;
                self.slots.push(Slot {
                    generation: 0,
                    value: Some(value),
                });
                ArenaIndex::new(index, 0)
            }
        };
        self.live += 1;
        Ok(index)
    }

    pub(crate) fn get(&self, idx: ArenaIndex) -> Option<&T> {
        let slot = self.slots.get(idx.index as usize)?;
        if slot.generation != idx.generation {
            return None;
        }
        slot.value.as_ref()
    }

    pub(crate) fn get_mut(&mut self, idx: ArenaIndex) -> Option<&mut T> {
        let slot = self.slots.get_mut(idx.index as usize)?;
        if slot.generation != idx.generation {
            return None;
        }
        slot.value.as_mut()
    }

    pub(crate) fn contains(&self, idx: ArenaIndex) -> bool {
        self.get(idx).is_some()
    }

    /// Value at a slot, whatever its generation
    pub(crate) fn at(&self, index: u32) -> Option<&T> {
        self.slots.get(index as usize)?.value.as_ref()
    }

    pub(crate) fn at_mut(&mut self, index: u32) -> Option<&mut T> {
        self.slots.get_mut(index as usize)?.value.as_mut()
    }

    /// Current handle of an occupied slot
    pub(crate) fn handle_at(&self, index: u32) -> Option<ArenaIndex> {
        let slot = self.slots.get(index as usize)?;
        slot.value
            .as_ref()
            .map(|_| ArenaIndex::new(index, slot.generation))
    }

    pub(crate) fn remove(&mut self, idx: ArenaIndex) -> Option<T> {
        let slot = self.slots.get_mut(idx.index as usize)?;
        if slot.generation != idx.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(idx.index);
        self.live -= 1;
        Some(value)
    }

    pub(crate) fn len(&self) -> usize {
        self.live
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (ArenaIndex, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.value
                .as_ref()
                .map(|v| (ArenaIndex::new(i as u32, slot.generation), v))
        })
    }
}

/// A list element: either kind of observer.
#[derive(Debug)]
pub(crate) enum Observer {
    WeakRef(WeakRefData),
    Record(FinalizationRecordData),
}

impl Observer {
    fn as_list_object(&self) -> &dyn ObserverListObject {
        match self {
            Self::WeakRef(data) => data,
            Self::Record(data) => data,
        }
    }

    fn as_list_object_mut(&mut self) -> &mut dyn ObserverListObject {
        match self {
            Self::WeakRef(data) => data,
            Self::Record(data) => data,
        }
    }
}

/// Storage for everything this crate allocates.
#[derive(Debug)]
pub struct ObserverHeap {
    observers: Arena<Observer>,
    lists: Arena<ListLinks>,
    queues: Arena<FinalizationQueueData>,
    registries: Arena<FinalizationRegistryData>,
    /// Maximum live observers + list heads
    limit: Option<usize>,
}

impl ObserverHeap {
    /// Create an empty heap with an optional cell budget
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            observers: Arena::new(),
            lists: Arena::new(),
            queues: Arena::new(),
            registries: Arena::new(),
            limit,
        }
    }

    /// Live weak refs + records + list heads
    pub fn cell_count(&self) -> usize {
        self.observers.len() + self.lists.len()
    }

    /// Live weak refs and records
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Live list heads
    pub fn list_count(&self) -> usize {
        self.lists.len()
    }

    /// Live queues
    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    /// Live registries
    pub fn registry_count(&self) -> usize {
        self.registries.len()
    }

    fn check_budget(&self) -> WeakRefResult<()> {
        match self.limit {
            Some(limit) if self.cell_count() >= limit => Err(WeakRefError::OutOfMemory),
            _ => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Weak refs
    // ------------------------------------------------------------------

    pub(crate) fn alloc_weak_ref(&mut self, data: WeakRefData) -> WeakRefResult<WeakRef> {
        self.check_budget()?;
        self.observers
            .try_insert(Observer::WeakRef(data))
            .map(WeakRef)
    }

    /// Weak ref data, `None` for a stale handle
    pub fn weak_ref(&self, weak_ref: WeakRef) -> Option<&WeakRefData> {
        match self.observers.get(weak_ref.0)? {
            Observer::WeakRef(data) => Some(data),
            Observer::Record(_) => None,
        }
    }

    pub(crate) fn weak_ref_mut(&mut self, weak_ref: WeakRef) -> Option<&mut WeakRefData> {
        match self.observers.get_mut(weak_ref.0)? {
            Observer::WeakRef(data) => Some(data),
            Observer::Record(_) => None,
        }
    }

    /// Handle of the weak ref linked at element slot `index`
    pub(crate) fn weak_ref_at(&self, index: u32) -> Option<WeakRef> {
        match self.observers.at(index)? {
            Observer::WeakRef(_) => self.observers.handle_at(index).map(WeakRef),
            Observer::Record(_) => None,
        }
    }

    /// Weak refs whose own object lives in `zone`, wherever their target is
    pub(crate) fn weak_refs_in(&self, zone: ZoneId) -> Vec<WeakRef> {
        self.observers
            .iter()
            .filter_map(|(idx, observer)| match observer {
                Observer::WeakRef(data) if data.zone() == zone => Some(WeakRef(idx)),
                _ => None,
            })
            .collect()
    }

    /// Unlink and release a weak ref
    pub(crate) fn free_weak_ref(&mut self, weak_ref: WeakRef) -> Option<WeakRefData> {
        if !self.observers.contains(weak_ref.0) {
            return None;
        }
        self.unlink(weak_ref.0.index());
        match self.observers.remove(weak_ref.0)? {
            Observer::WeakRef(data) => Some(data),
            Observer::Record(_) => None,
        }
    }

    // ------------------------------------------------------------------
    // Records
    // ------------------------------------------------------------------

    pub(crate) fn alloc_record(
        &mut self,
        data: FinalizationRecordData,
    ) -> WeakRefResult<FinalizationRecord> {
        self.check_budget()?;
        self.observers
            .try_insert(Observer::Record(data))
            .map(FinalizationRecord)
    }

    /// Record data, `None` if the record has been released
    pub fn record(&self, record: FinalizationRecord) -> Option<&FinalizationRecordData> {
        match self.observers.get(record.0)? {
            Observer::Record(data) => Some(data),
            Observer::WeakRef(_) => None,
        }
    }

    pub(crate) fn record_mut(
        &mut self,
        record: FinalizationRecord,
    ) -> Option<&mut FinalizationRecordData> {
        match self.observers.get_mut(record.0)? {
            Observer::Record(data) => Some(data),
            Observer::WeakRef(_) => None,
        }
    }

    /// Handle of the record linked at element slot `index`
    pub(crate) fn record_at(&self, index: u32) -> Option<FinalizationRecord> {
        match self.observers.at(index)? {
            Observer::Record(_) => self.observers.handle_at(index).map(FinalizationRecord),
            Observer::WeakRef(_) => None,
        }
    }

    /// Unlink and release a record
    pub(crate) fn free_record(
        &mut self,
        record: FinalizationRecord,
    ) -> Option<FinalizationRecordData> {
        if !self.observers.contains(record.0) {
            return None;
        }
        self.unlink(record.0.index());
        match self.observers.remove(record.0)? {
            Observer::Record(data) => Some(data),
            Observer::WeakRef(_) => None,
        }
    }

    /// Record and queue at once, for moving a record into its queue
    pub(crate) fn record_and_queue_mut(
        &mut self,
        record: FinalizationRecord,
        queue: FinalizationQueue,
    ) -> (
        Option<&mut FinalizationRecordData>,
        Option<&mut FinalizationQueueData>,
    ) {
        let record = match self.observers.get_mut(record.0) {
            Some(Observer::Record(data)) => Some(data),
            _ => None,
        };
        (record, self.queues.get_mut(queue.0))
    }

    // ------------------------------------------------------------------
    // List heads
    // ------------------------------------------------------------------

    pub(crate) fn alloc_list(&mut self) -> WeakRefResult<ListId> {
        self.check_budget()?;
        let idx = self.lists.try_insert(ListLinks::empty(ObserverListPtr::list_head(0)))?;
        // Now that the slot is known, make the head point at itself.
        let head = ObserverListPtr::list_head(idx.index());
        if let Some(links) = self.lists.get_mut(idx) {
            *links = ListLinks::empty(head);
        }
        Ok(ListId(idx))
    }

    pub(crate) fn free_list(&mut self, list: ListId) {
        debug_assert!(self.is_list_empty(list.0.index()));
        self.lists.remove(list.0);
    }

    // ------------------------------------------------------------------
    // Queues and registries
    // ------------------------------------------------------------------

    pub(crate) fn alloc_queue(
        &mut self,
        data: FinalizationQueueData,
    ) -> WeakRefResult<FinalizationQueue> {
        self.queues.try_insert(data).map(FinalizationQueue)
    }

    /// Queue data, `None` if released
    pub fn queue(&self, queue: FinalizationQueue) -> Option<&FinalizationQueueData> {
        self.queues.get(queue.0)
    }

    pub(crate) fn queue_mut(
        &mut self,
        queue: FinalizationQueue,
    ) -> Option<&mut FinalizationQueueData> {
        self.queues.get_mut(queue.0)
    }

    pub(crate) fn free_queue(&mut self, queue: FinalizationQueue) -> Option<FinalizationQueueData> {
        self.queues.remove(queue.0)
    }

    pub(crate) fn alloc_registry(
        &mut self,
        data: FinalizationRegistryData,
    ) -> WeakRefResult<FinalizationRegistry> {
        self.registries.try_insert(data).map(FinalizationRegistry)
    }

    /// Registry data, `None` if released
    pub fn registry(&self, registry: FinalizationRegistry) -> Option<&FinalizationRegistryData> {
        self.registries.get(registry.0)
    }

    pub(crate) fn registry_mut(
        &mut self,
        registry: FinalizationRegistry,
    ) -> Option<&mut FinalizationRegistryData> {
        self.registries.get_mut(registry.0)
    }

    pub(crate) fn free_registry(
        &mut self,
        registry: FinalizationRegistry,
    ) -> Option<FinalizationRegistryData> {
        self.registries.remove(registry.0)
    }

    /// All live registries
    pub fn registries(&self) -> impl Iterator<Item = FinalizationRegistry> + '_ {
        self.registries.iter().map(|(idx, _)| FinalizationRegistry(idx))
    }
}

impl ObserverLinks for ObserverHeap {
    fn links(&self, ptr: ObserverListPtr) -> Option<ListLinks> {
        match ptr.kind() {
            PtrKind::Element => self
                .observers
                .at(ptr.index())
                .and_then(|o| o.as_list_object().list_links()),
            PtrKind::ListHead => self.lists.at(ptr.index()).copied(),
        }
    }

    fn set_links(&mut self, ptr: ObserverListPtr, links: Option<ListLinks>) {
        match ptr.kind() {
            PtrKind::Element => {
                if let Some(observer) = self.observers.at_mut(ptr.index()) {
                    observer.as_list_object_mut().set_list_links(links);
                }
            }
            PtrKind::ListHead => {
                if let (Some(slot), Some(links)) = (self.lists.at_mut(ptr.index()), links) {
                    *slot = links;
                }
            }
        }
    }
}

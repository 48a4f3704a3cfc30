//! Shared fixtures: a recording host and small value helpers.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use otter_vm_weakref::{
    CellRef, CleanupCallback, FinalizationQueue, HostHooks, MarkTable, SymbolKind, Value,
    WeakRefConfig, WeakRefRuntime, WeakTarget, ZoneGcState, ZoneId,
};

/// What the host saw and how it should answer
#[derive(Debug, Default)]
pub struct HostState {
    /// Every scheduling request, in order
    pub cleanup_requests: Vec<FinalizationQueue>,
    /// Wrapper targets whose owner let go of them
    pub released_wrappers: Vec<WeakTarget>,
    /// Host-defined data values that are dead wrappers
    pub dead_wrappers: Vec<Value>,
    /// Refuse wrapper preservation
    pub refuse_preserve: bool,
}

/// Host whose state is shared with the test
#[derive(Debug, Clone, Default)]
pub struct RecordingHost(pub Rc<RefCell<HostState>>);

impl HostHooks for RecordingHost {
    fn queue_cleanup(&mut self, queue: FinalizationQueue) {
        self.0.borrow_mut().cleanup_requests.push(queue);
    }

    fn is_dead_wrapper(&self, data: &Value) -> bool {
        self.0.borrow().dead_wrappers.contains(data)
    }

    fn is_wrapper_released(&self, target: &WeakTarget) -> bool {
        self.0.borrow().released_wrappers.contains(target)
    }

    fn preserve_wrapper(&mut self, _target: &WeakTarget) -> bool {
        !self.0.borrow().refuse_preserve
    }
}

/// Runtime wired to a recording host
pub fn runtime() -> (WeakRefRuntime, Rc<RefCell<HostState>>) {
    runtime_with(WeakRefConfig::default())
}

/// Runtime with a custom config wired to a recording host
pub fn runtime_with(config: WeakRefConfig) -> (WeakRefRuntime, Rc<RefCell<HostState>>) {
    let host = RecordingHost::default();
    let state = Rc::clone(&host.0);
    (WeakRefRuntime::new(config, Box::new(host)), state)
}

/// Object cell
pub fn cell(zone: u32, addr: u64) -> CellRef {
    CellRef::new(ZoneId::new(zone), addr)
}

/// Object value
pub fn object(zone: u32, addr: u64) -> Value {
    Value::object(cell(zone, addr))
}

/// Unique symbol value
pub fn symbol(zone: u32, addr: u64, kind: SymbolKind) -> Value {
    Value::symbol(cell(zone, addr), kind)
}

/// Callback that records every held value it receives
pub fn recording_callback() -> (CleanupCallback, Rc<RefCell<Vec<Value>>>) {
    let calls = Rc::new(RefCell::new(Vec::new()));
    let seen = Rc::clone(&calls);
    let callback: CleanupCallback = Rc::new(move |_, held| {
        seen.borrow_mut().push(held);
        Ok(())
    });
    (callback, calls)
}

/// Run one full collection over `zones`, sweeping them in the given order.
///
/// Kept objects are treated as roots.
pub fn collect(rt: &mut WeakRefRuntime, zones: &[ZoneId], marks: &mut MarkTable) {
    marks.mark_roots(rt.kept_objects().collect::<Vec<_>>());
    for &zone in zones {
        rt.zone_mut(zone).begin_gc();
    }
    for &zone in zones {
        rt.zone_mut(zone).set_gc_state(ZoneGcState::Sweep);
        rt.trace_weak_edges(zone, marks);
    }
    for &zone in zones {
        rt.zone_mut(zone).end_gc();
    }
}

/// Held values as strings, for compact assertions
pub fn strings(values: &[Value]) -> Vec<String> {
    values
        .iter()
        .map(|v| match v {
            Value::String(s) => s.to_string(),
            other => other.to_string(),
        })
        .collect()
}

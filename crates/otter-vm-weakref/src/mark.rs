//! Mark table: collector results in a form the weak edge sweep can query.
//!
//! A collector records the final color of each cell it cares about, any
//! forwarding addresses produced by compaction, and which registry and weak
//! ref objects it found unreachable. The table then answers
//! [`WeakEdgeTracer`] queries.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::registry::FinalizationRegistry;
use crate::tracer::{TraceResult, WeakEdgeTracer};
use crate::value::{CellRef, WeakTarget};
use crate::weak_ref::WeakRef;

/// Mark color for tri-color marking
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkColor {
    /// Not visited: dead once marking is done
    White = 0,
    /// Reachable only through gray roots
    Gray = 1,
    /// Fully scanned
    Black = 2,
}

impl MarkColor {
    /// Anything but white survives
    pub fn is_marked(self) -> bool {
        self != Self::White
    }
}

/// Final mark state of one collection.
#[derive(Debug, Clone)]
pub struct MarkTable {
    colors: FxHashMap<CellRef, MarkColor>,
    /// Color of cells never recorded
    default_color: MarkColor,
    forwarding: FxHashMap<CellRef, CellRef>,
    dead_registries: FxHashSet<FinalizationRegistry>,
    dead_weak_refs: FxHashSet<WeakRef>,
}

impl MarkTable {
    /// Table where unrecorded cells are live; cells die only when unmarked
    pub fn new() -> Self {
        Self::with_default(MarkColor::Black)
    }

    /// Table where only marked cells survive
    pub fn strict() -> Self {
        Self::with_default(MarkColor::White)
    }

    fn with_default(default_color: MarkColor) -> Self {
        Self {
            colors: FxHashMap::default(),
            default_color,
            forwarding: FxHashMap::default(),
            dead_registries: FxHashSet::default(),
            dead_weak_refs: FxHashSet::default(),
        }
    }

    /// Get mark color
    pub fn color(&self, cell: CellRef) -> MarkColor {
        self.colors.get(&cell).copied().unwrap_or(self.default_color)
    }

    /// Set mark color
    pub fn set_color(&mut self, cell: CellRef, color: MarkColor) {
        self.colors.insert(cell, color);
    }

    /// Mark a cell black
    pub fn mark(&mut self, cell: CellRef) {
        self.set_color(cell, MarkColor::Black);
    }

    /// Leave a cell white so it is finalized
    pub fn unmark(&mut self, cell: CellRef) {
        self.set_color(cell, MarkColor::White);
    }

    /// Mark every target as a root (e.g. the runtime's kept objects)
    pub fn mark_roots(&mut self, roots: impl IntoIterator<Item = WeakTarget>) {
        for target in roots {
            self.mark(target.cell());
        }
    }

    /// Record that compaction moved a cell to `addr` within its zone
    pub fn relocate(&mut self, cell: CellRef, addr: u64) {
        self.forwarding.insert(cell, cell.moved_to(addr));
    }

    /// Where a cell lives after compaction
    pub fn forwarded(&self, cell: CellRef) -> CellRef {
        self.forwarding.get(&cell).copied().unwrap_or(cell)
    }

    /// Record that a registry object was not reached
    pub fn collect_registry(&mut self, registry: FinalizationRegistry) {
        self.dead_registries.insert(registry);
    }

    /// Record that a weak ref object was not reached
    pub fn collect_weak_ref(&mut self, weak_ref: WeakRef) {
        self.dead_weak_refs.insert(weak_ref);
    }

    /// Forget all results, keeping the default color
    pub fn reset(&mut self) {
        self.colors.clear();
        self.forwarding.clear();
        self.dead_registries.clear();
        self.dead_weak_refs.clear();
    }
}

impl Default for MarkTable {
    fn default() -> Self {
        Self::new()
    }
}

impl WeakEdgeTracer for MarkTable {
    fn trace_target(&mut self, target: WeakTarget) -> TraceResult {
        let cell = target.cell();
        if !self.color(cell).is_marked() {
            return TraceResult::Dead;
        }
        TraceResult::Alive(target.with_cell(self.forwarded(cell)))
    }

    fn is_registry_alive(&mut self, registry: FinalizationRegistry) -> bool {
        !self.dead_registries.contains(&registry)
    }

    fn is_weak_ref_alive(&mut self, weak_ref: WeakRef) -> bool {
        !self.dead_weak_refs.contains(&weak_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{SymbolKind, SymbolRef};
    use crate::zone::ZoneId;

    fn cell(addr: u64) -> CellRef {
        CellRef::new(ZoneId::new(1), addr)
    }

    #[test]
    fn test_colors() {
        let mut table = MarkTable::new();
        assert_eq!(table.color(cell(1)), MarkColor::Black);
        table.unmark(cell(1));
        assert_eq!(table.color(cell(1)), MarkColor::White);
        table.set_color(cell(1), MarkColor::Gray);
        assert!(table.color(cell(1)).is_marked());

        let mut strict = MarkTable::strict();
        assert_eq!(strict.color(cell(2)), MarkColor::White);
        strict.mark_roots([WeakTarget::Object(cell(2))]);
        assert_eq!(strict.color(cell(2)), MarkColor::Black);
    }

    #[test]
    fn test_trace_target() {
        let mut table = MarkTable::new();
        let obj = WeakTarget::Object(cell(1));
        let sym = WeakTarget::Symbol(SymbolRef::new(cell(2), SymbolKind::Unique));

        assert_eq!(table.trace_target(obj), TraceResult::Alive(obj));

        table.unmark(cell(1));
        assert!(table.trace_target(obj).is_dead());

        table.relocate(cell(2), 0x200);
        assert_eq!(
            table.trace_target(sym),
            TraceResult::Alive(WeakTarget::Symbol(SymbolRef::new(
                cell(0x200),
                SymbolKind::Unique
            )))
        );

        table.reset();
        assert_eq!(table.trace_target(obj), TraceResult::Alive(obj));
    }
}

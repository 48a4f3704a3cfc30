//! Collector interface used while sweeping weak edges.

use crate::registry::FinalizationRegistry;
use crate::value::WeakTarget;
use crate::weak_ref::WeakRef;

/// Outcome of tracing one weak edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceResult {
    /// The target was not marked and is being finalized
    Dead,
    /// The target survives, possibly at a new address
    Alive(WeakTarget),
}

impl TraceResult {
    /// Check if the edge's target died
    pub fn is_dead(self) -> bool {
        matches!(self, Self::Dead)
    }
}

/// Liveness queries answered by the collector during sweep.
///
/// Implementations must only be used while the zone being swept is not
/// mutated by anything else.
pub trait WeakEdgeTracer {
    /// Trace a weak edge to `target`
    fn trace_target(&mut self, target: WeakTarget) -> TraceResult;

    /// Whether a registry object survived this collection
    fn is_registry_alive(&mut self, registry: FinalizationRegistry) -> bool;

    /// Whether a weak ref object survived this collection
    fn is_weak_ref_alive(&mut self, weak_ref: WeakRef) -> bool;
}

//! # Otter VM Weak References
//!
//! Collector support for `WeakRef` and `FinalizationRegistry`.
//!
//! ## Design
//!
//! - **Observer lists**: every weakly observed target owns an intrusive,
//!   circular list of the weak refs (or finalization records) observing it.
//!   Links are tagged arena indices and are never traced.
//! - **Per-zone tables**: each zone maps its targets to observer lists and
//!   records the registries living in it.
//! - **Sweep**: the collector calls [`WeakRefRuntime::trace_weak_edges`] once
//!   per zone; dead targets clear their weak refs and move their records into
//!   the registry's [`FinalizationQueue`], and the host is asked to run
//!   cleanup.
//! - **Handles**: weak refs, records, queues and registries live in a
//!   generational arena, so handles stay valid across compaction and stale
//!   handles are detected.

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod heap;
pub mod host;
pub mod mark;
pub mod observer_list;
pub mod observers;
pub mod queue;
pub mod record;
pub mod registrations;
pub mod registry;
pub mod runtime;
pub mod tracer;
pub mod value;
pub mod weak_ref;
pub mod zone;

pub use config::WeakRefConfig;
pub use error::{WeakRefError, WeakRefResult};
pub use heap::{ArenaIndex, ObserverHeap};
pub use host::{HostHooks, NoopHost};
pub use mark::{MarkColor, MarkTable};
pub use observer_list::{ListId, ObserverLinks, ObserverListObject, ObserverListPtr, PtrKind};
pub use observers::FinalizationObservers;
pub use queue::{CleanupCallback, FinalizationQueue, FinalizationQueueData};
pub use record::{FinalizationRecord, FinalizationRecordData, RecordState};
pub use registrations::FinalizationRegistrations;
pub use registry::{FinalizationRegistry, FinalizationRegistryData};
pub use runtime::{WeakRefRuntime, WeakRefStats};
pub use tracer::{TraceResult, WeakEdgeTracer};
pub use value::{CellRef, SymbolKind, SymbolRef, Value, WeakTarget, can_be_held_weakly};
pub use weak_ref::{WeakRef, WeakRefData};
pub use zone::{Zone, ZoneGcState, ZoneId};

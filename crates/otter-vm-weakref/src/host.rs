//! Embedding hooks.
//!
//! The runtime never schedules jobs or inspects wrappers itself; it asks the
//! host through [`HostHooks`].

use crate::queue::FinalizationQueue;
use crate::value::{Value, WeakTarget};

/// Services provided by the embedding.
pub trait HostHooks {
    /// Arrange for [`WeakRefRuntime::do_cleanup`](crate::WeakRefRuntime::do_cleanup)
    /// to run for `queue` later, outside of collection.
    ///
    /// Called at most once per queue until that cleanup has started.
    fn queue_cleanup(&mut self, queue: FinalizationQueue);

    /// Whether host-defined data refers to a wrapper whose target is gone.
    /// Cleanup is not scheduled for such queues.
    fn is_dead_wrapper(&self, _data: &Value) -> bool {
        false
    }

    /// Read barrier: whether a wrapper target has been released by its owner
    /// and should be treated as dead.
    fn is_wrapper_released(&self, _target: &WeakTarget) -> bool {
        false
    }

    /// Called when a target becomes weakly observed. Returning false fails
    /// the operation.
    fn preserve_wrapper(&mut self, _target: &WeakTarget) -> bool {
        true
    }
}

/// Host that drops every scheduling request.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHost;

impl HostHooks for NoopHost {
    fn queue_cleanup(&mut self, _queue: FinalizationQueue) {}
}

//! Runtime configuration

/// Weak reference runtime configuration
#[derive(Debug, Clone)]
pub struct WeakRefConfig {
    /// Maximum live observer cells: weak refs, records and list heads
    /// (default: unlimited)
    pub heap_limit: Option<usize>,
    /// Initial capacity of per-zone observer tables (default: 8)
    pub initial_table_capacity: usize,
    /// Drop all finalization records on shutdown (default: true)
    pub clear_records_on_shutdown: bool,
}

impl Default for WeakRefConfig {
    fn default() -> Self {
        Self {
            heap_limit: None,
            initial_table_capacity: 8,
            clear_records_on_shutdown: true,
        }
    }
}

impl WeakRefConfig {
    /// Config with a cell budget
    pub fn with_heap_limit(limit: usize) -> Self {
        Self {
            heap_limit: Some(limit),
            ..Self::default()
        }
    }
}

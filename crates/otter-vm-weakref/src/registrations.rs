//! Unregister-token index of a registry.
//!
//! Maps each unregister token to the records registered with it. Tokens are
//! held weakly: they are traced during sweep and dropped once dead. An entry is
//! never left with an empty record vector.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::error::{WeakRefError, WeakRefResult};
use crate::record::FinalizationRecord;
use crate::tracer::{TraceResult, WeakEdgeTracer};
use crate::value::WeakTarget;

/// Records registered under one token. Most tokens guard a single record.
pub type RecordVector = SmallVec<[FinalizationRecord; 1]>;

/// Token → records index
#[derive(Debug, Default)]
pub struct FinalizationRegistrations {
    map: FxHashMap<WeakTarget, RecordVector>,
}

impl FinalizationRegistrations {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Index `record` under `token`. On failure nothing changes.
    pub fn try_add(&mut self, token: WeakTarget, record: FinalizationRecord) -> WeakRefResult<()> {
        if let Some(records) = self.map.get_mut(&token) {
            records
                .try_reserve(1)
                .map_err(|_| WeakRefError::OutOfMemory)?;
            records.push(record);
            return Ok(());
        }

        self.map
            .try_reserve(1)
            .map_err(|_| WeakRefError::OutOfMemory)?;
        let mut records = RecordVector::new();
        records.push(record);
        self.map.insert(token, records);
        Ok(())
    }

    /// Undo an earlier `try_add`.
    pub fn remove(&mut self, token: WeakTarget, record: FinalizationRecord) {
        let Some(records) = self.map.get_mut(&token) else {
            return;
        };
        if let Some(pos) = records.iter().position(|r| *r == record) {
            records.remove(pos);
        }
        if records.is_empty() {
            self.map.remove(&token);
        }
    }

    /// Remove and return every record under `token`
    pub fn take(&mut self, token: &WeakTarget) -> Option<RecordVector> {
        self.map.remove(token)
    }

    /// Records under `token`
    pub fn get(&self, token: &WeakTarget) -> Option<&[FinalizationRecord]> {
        self.map.get(token).map(|records| records.as_slice())
    }

    /// Check if `token` has an entry
    pub fn contains(&self, token: &WeakTarget) -> bool {
        self.map.contains_key(token)
    }

    /// Number of tokens
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Check if no tokens are indexed
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Keep only records matching `keep`, dropping tokens left empty.
    pub fn retain_records(&mut self, mut keep: impl FnMut(FinalizationRecord) -> bool) {
        self.map.retain(|_, records| {
            records.retain(|r| keep(*r));
            !records.is_empty()
        });
    }

    /// Trace every token: drop dead ones, re-key relocated ones.
    pub fn sweep_tokens(&mut self, tracer: &mut dyn WeakEdgeTracer) {
        let needs_trace = self.map.keys().any(|token| !token.is_permanent());
        if !needs_trace {
            return;
        }

        let old = std::mem::take(&mut self.map);
        let mut map = FxHashMap::with_capacity_and_hasher(old.len(), Default::default());
        for (token, records) in old {
            if token.is_permanent() {
                map.insert(token, records);
                continue;
            }
            match tracer.trace_target(token) {
                TraceResult::Dead => {}
                TraceResult::Alive(token) => {
                    map.entry(token)
                        .or_insert_with(RecordVector::new)
                        .extend(records);
                }
            }
        }
        self.map = map;
    }
}

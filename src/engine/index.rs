use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use ulid::Ulid;

use crate::model::Span;

pub type SharedSlots = Arc<Mutex<ResourceSlots>>;

/// An active reservation's footprint on a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub reservation_id: Ulid,
    pub span: Span,
}

/// Active intervals of one resource, sorted by `span.start`.
///
/// Only active reservations live here; cancelling removes the slot so the
/// time frees up.
#[derive(Debug, Default)]
pub struct ResourceSlots {
    slots: Vec<Slot>,
}

impl ResourceSlots {
    /// Insert maintaining sort order. Callers check `first_overlap` first,
    /// under the same lock.
    pub fn insert(&mut self, reservation_id: Ulid, span: Span) {
        let pos = self
            .slots
            .binary_search_by_key(&span.start, |s| s.span.start)
            .unwrap_or_else(|e| e);
        self.slots.insert(pos, Slot { reservation_id, span });
    }

    pub fn remove(&mut self, reservation_id: Ulid) -> Option<Slot> {
        let pos = self.slots.iter().position(|s| s.reservation_id == reservation_id)?;
        Some(self.slots.remove(pos))
    }

    /// Slots whose span overlaps the query window. Binary search skips
    /// everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Slot> {
        let right_bound = self.slots.partition_point(|s| s.span.start < query.end);
        self.slots[..right_bound]
            .iter()
            .filter(move |s| s.span.end > query.start)
    }

    /// The first active reservation that overlaps `span`, if any.
    pub fn first_overlap(&self, span: &Span) -> Option<Ulid> {
        self.overlapping(span).next().map(|s| s.reservation_id)
    }

    pub fn would_overlap(&self, span: &Span) -> bool {
        self.first_overlap(span).is_some()
    }

    pub fn spans(&self) -> Vec<Span> {
        self.slots.iter().map(|s| s.span).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Per-resource active interval sets, each behind its own lock. Locks are
/// never global: distinct tables admit in parallel.
#[derive(Default)]
pub struct IntervalOverlapIndex {
    resources: DashMap<Ulid, SharedSlots>,
}

impl IntervalOverlapIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock cell for a resource, created on first use.
    pub fn slots(&self, resource_id: Ulid) -> SharedSlots {
        self.resources.entry(resource_id).or_default().value().clone()
    }

    pub async fn lock(&self, resource_id: Ulid) -> OwnedMutexGuard<ResourceSlots> {
        self.slots(resource_id).lock_owned().await
    }

    pub async fn would_overlap(&self, resource_id: Ulid, span: &Span) -> bool {
        match self.resources.get(&resource_id).map(|e| e.value().clone()) {
            Some(slots) => slots.lock().await.would_overlap(span),
            None => false,
        }
    }

    pub async fn active_spans(&self, resource_id: Ulid) -> Vec<Span> {
        match self.resources.get(&resource_id).map(|e| e.value().clone()) {
            Some(slots) => slots.lock().await.spans(),
            None => Vec::new(),
        }
    }
}

//! Run-wide component deduplication.
//!
//! One store is shared by every worker of a run. When several workers emit
//! the same [`DedupKey`], whichever takes the lock first keeps its component.
//! A unit that claims keys and then fails to persist them gives them back,
//! so a later unit can still write those components.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use crate::model::{ComponentDefinition, DedupKey};

#[derive(Debug, Default)]
pub struct DedupStore {
    seen: Mutex<HashSet<DedupKey>>,
}

impl DedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `key` was not seen before in this run.
    pub fn insert(&self, key: DedupKey) -> bool {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key)
    }

    /// Keeps only components whose key is new, returning them with the
    /// number of duplicates dropped.
    pub fn retain_new(
        &self,
        components: Vec<ComponentDefinition>,
    ) -> (Vec<ComponentDefinition>, usize) {
        let before = components.len();
        let kept: Vec<_> = components
            .into_iter()
            .filter(|c| self.insert(c.dedup_key()))
            .collect();
        let dropped = before - kept.len();
        (kept, dropped)
    }

    /// Claims the keys of `components` like [`DedupStore::retain_new`], but
    /// the claim is undone when the reservation is dropped uncommitted.
    pub fn reserve(&self, components: Vec<ComponentDefinition>) -> (DedupReservation<'_>, usize) {
        let (kept, dropped) = self.retain_new(components);
        let reservation = DedupReservation {
            store: self,
            components: kept,
            committed: false,
        };
        (reservation, dropped)
    }

    /// Forgets `keys`, letting them be inserted again.
    pub fn release(&self, keys: &[DedupKey]) {
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        for key in keys {
            seen.remove(key);
        }
    }

    pub fn contains(&self, key: &DedupKey) -> bool {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Components whose keys one unit has claimed but not yet persisted.
///
/// Dropping it without [`commit`](DedupReservation::commit) (an error
/// return, or the unit task being aborted at its deadline) releases the keys.
#[must_use]
pub struct DedupReservation<'a> {
    store: &'a DedupStore,
    components: Vec<ComponentDefinition>,
    committed: bool,
}

impl DedupReservation<'_> {
    pub fn components(&self) -> &[ComponentDefinition] {
        &self.components
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Keeps the keys claimed for the rest of the run.
    pub fn commit(mut self) -> Vec<ComponentDefinition> {
        self.committed = true;
        std::mem::take(&mut self.components)
    }
}

impl Drop for DedupReservation<'_> {
    fn drop(&mut self) {
        if !self.committed && !self.components.is_empty() {
            let keys: Vec<DedupKey> = self.components.iter().map(|c| c.dedup_key()).collect();
            self.store.release(&keys);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelMetadata;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn key(i: usize) -> DedupKey {
        DedupKey::new(&format!("Kind{i}"), "example.io/v1", "model", "1.0.0")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_key_from_many_tasks_survives_once() {
        let store = Arc::new(DedupStore::new());
        let winners = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..64 {
            let store = store.clone();
            let winners = winners.clone();
            handles.push(tokio::spawn(async move {
                if store.insert(key(0)) {
                    winners.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_distinct_keys_repeated_yield_exactly_k() {
        let store = Arc::new(DedupStore::new());
        let mut handles = Vec::new();
        for task in 0..40 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..10 {
                    store.insert(key((task + i) % 10));
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.len(), 10);
        assert!(store.contains(&key(9)));
    }

    fn component(kind: &str) -> ComponentDefinition {
        ComponentDefinition {
            kind: kind.to_string(),
            api_version: "v1".to_string(),
            schema: serde_json::Value::Null,
            model: ModelMetadata {
                name: "m".to_string(),
                version: "1".to_string(),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_dropped_reservation_releases_keys() {
        let store = DedupStore::new();
        let (reservation, _) = store.reserve(vec![component("A"), component("B")]);
        assert_eq!(reservation.components().len(), 2);
        drop(reservation);
        assert!(store.is_empty());

        let (reservation, dropped) = store.reserve(vec![component("A")]);
        assert_eq!(dropped, 0);
        let kept = reservation.commit();
        assert_eq!(kept.len(), 1);
        assert!(store.contains(&component("A").dedup_key()));

        let (reservation, dropped) = store.reserve(vec![component("A")]);
        assert!(reservation.is_empty());
        assert_eq!(dropped, 1);
    }

    #[test]
    fn test_retain_new_drops_duplicates() {
        let store = DedupStore::new();

        let (kept, dropped) = store.retain_new(vec![component("A"), component("B"), component("A")]);
        assert_eq!(kept.len(), 2);
        assert_eq!(dropped, 1);

        let (kept, dropped) = store.retain_new(vec![component("B"), component("C")]);
        assert_eq!(kept.iter().map(|c| c.kind.as_str()).collect::<Vec<_>>(), vec!["C"]);
        assert_eq!(dropped, 1);
        assert!(!store.is_empty());
    }
}

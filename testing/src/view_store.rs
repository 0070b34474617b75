//! In-memory read-model storage.
//!
//! [`InMemoryViewStore`] implements [`ViewStore`] over a `HashMap` and records every
//! `bulk_load` call so tests can assert on batching and eager-load hints. Commits can
//! be made to fail on demand.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on poisoned locks

use catchup_core::projection::{ProjectionError, Result, ViewChange, ViewStore};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Arguments of one recorded `bulk_load` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadCall {
    /// Requested ids, in request order.
    pub ids: Vec<String>,
    /// Eager-load hint passed by the projection.
    pub related: Vec<&'static str>,
}

/// In-memory [`ViewStore`] for fast, deterministic tests.
///
/// Cloning shares the rows.
///
/// # Example
///
/// ```
/// use catchup_core::projection::{ViewChange, ViewStore};
/// use catchup_testing::InMemoryViewStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryViewStore::<u32>::new();
/// store.commit(vec![ViewChange::Upsert { id: "a".to_string(), view: 1 }]).await?;
///
/// assert_eq!(store.get("a"), Some(1));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct InMemoryViewStore<V> {
    rows: Arc<RwLock<HashMap<String, V>>>,
    loads: Arc<Mutex<Vec<LoadCall>>>,
    commits: Arc<AtomicUsize>,
    failing_commits: Arc<AtomicUsize>,
}

impl<V> Clone for InMemoryViewStore<V> {
    fn clone(&self) -> Self {
        Self {
            rows: Arc::clone(&self.rows),
            loads: Arc::clone(&self.loads),
            commits: Arc::clone(&self.commits),
            failing_commits: Arc::clone(&self.failing_commits),
        }
    }
}

impl<V> Default for InMemoryViewStore<V> {
    fn default() -> Self {
        Self {
            rows: Arc::new(RwLock::new(HashMap::new())),
            loads: Arc::new(Mutex::new(Vec::new())),
            commits: Arc::new(AtomicUsize::new(0)),
            failing_commits: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl<V: Clone> InMemoryViewStore<V> {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a row directly, bypassing commit accounting.
    pub fn insert(&self, id: impl Into<String>, view: V) {
        self.rows.write().unwrap().insert(id.into(), view);
    }

    /// Current content of row `id`.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<V> {
        self.rows.read().unwrap().get(id).cloned()
    }

    /// Check if row `id` exists.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.rows.read().unwrap().contains_key(id)
    }

    /// All rows, keyed by id.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, V> {
        self.rows.read().unwrap().clone()
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().unwrap().len()
    }

    /// Check if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every `bulk_load` call so far.
    #[must_use]
    pub fn load_calls(&self) -> Vec<LoadCall> {
        self.loads.lock().unwrap().clone()
    }

    /// Number of successful commits so far.
    #[must_use]
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Make the next `count` commits fail with a storage error, applying nothing.
    pub fn fail_next_commits(&self, count: usize) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }
}

impl<V> ViewStore<V> for InMemoryViewStore<V>
where
    V: Clone + Send + Sync,
{
    async fn bulk_load(
        &self,
        ids: &[String],
        related: &[&'static str],
    ) -> Result<HashMap<String, V>> {
        self.loads.lock().unwrap().push(LoadCall {
            ids: ids.to_vec(),
            related: related.to_vec(),
        });

        let rows = self.rows.read().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| rows.get(id).map(|view| (id.clone(), view.clone())))
            .collect())
    }

    async fn commit(&self, changes: Vec<ViewChange<V>>) -> Result<()> {
        let failing = self
            .failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ProjectionError::Storage("injected commit failure".to_string()));
        }

        let mut rows = self.rows.write().unwrap();
        for change in changes {
            match change {
                ViewChange::Upsert { id, view } => {
                    rows.insert(id, view);
                }
                ViewChange::Delete { id } => {
                    rows.remove(&id);
                }
            }
        }
        drop(rows);

        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bulk_load_returns_only_existing_rows() {
        let store = InMemoryViewStore::new();
        store.insert("a", 1);

        let rows = store
            .bulk_load(&["a".to_string(), "b".to_string()], &["items"])
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows.get("a"), Some(&1));
        assert_eq!(store.load_calls()[0].related, vec!["items"]);
    }

    #[tokio::test]
    async fn commit_applies_upserts_and_deletes() {
        let store = InMemoryViewStore::new();
        store.insert("gone", 0);

        store
            .commit(vec![
                ViewChange::Upsert {
                    id: "a".to_string(),
                    view: 2,
                },
                ViewChange::Delete {
                    id: "gone".to_string(),
                },
            ])
            .await
            .unwrap();

        assert_eq!(store.get("a"), Some(2));
        assert!(!store.contains("gone"));
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test]
    async fn failing_commit_applies_nothing() {
        let store = InMemoryViewStore::new();
        store.fail_next_commits(1);

        let result = store
            .commit(vec![ViewChange::Upsert {
                id: "a".to_string(),
                view: 1,
            }])
            .await;

        assert!(matches!(result, Err(ProjectionError::Storage(_))));
        assert!(store.is_empty());
        assert_eq!(store.commit_count(), 0);
    }
}

//! In-memory key-value storage shared by request handlers and pool jobs.
//!
//! Handlers read and write items synchronously; jobs running on the worker pool
//! write their results here once they finish.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// A stored value and the key it lives under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub key: String,
    pub value: String,
}

impl Item {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepoError {
    #[error("key '{key}' not found")]
    NotFound { key: String },

    #[error("operation cancelled")]
    Cancelled,
}

/// Basic CRUD over string items.
///
/// Implementations hand out copies; callers never hold a reference into the
/// underlying storage.
pub trait Repository: Send + Sync {
    /// Inserts or overwrites `item`.
    ///
    /// Fails with [`RepoError::Cancelled`] if `cancel` has already fired when the
    /// call starts. A write that has begun is never interrupted.
    fn put(&self, cancel: &CancellationToken, item: Item) -> Result<(), RepoError>;

    /// Returns a copy of the item stored under `key`.
    fn get(&self, key: &str) -> Result<Item, RepoError>;

    /// Removes `key`. Removing an absent key succeeds.
    fn delete(&self, key: &str) -> Result<(), RepoError>;

    /// Snapshot of every item at the moment of the call, in no particular order.
    fn list(&self) -> Vec<Item>;
}

/// Thread-safe map-backed repository.
///
/// One `RwLock` guards the whole map: readers proceed concurrently, writers
/// serialize against each other and against readers.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    data: RwLock<HashMap<String, String>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl Repository for InMemoryRepository {
    fn put(&self, cancel: &CancellationToken, item: Item) -> Result<(), RepoError> {
        if cancel.is_cancelled() {
            return Err(RepoError::Cancelled);
        }
        self.data.write().insert(item.key, item.value);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Item, RepoError> {
        let value = self.data.read().get(key).cloned();
        value
            .map(|value| Item::new(key, value))
            .ok_or_else(|| RepoError::NotFound {
                key: key.to_string(),
            })
    }

    fn delete(&self, key: &str) -> Result<(), RepoError> {
        self.data.write().remove(key);
        Ok(())
    }

    fn list(&self) -> Vec<Item> {
        // Copy out under the read lock so callers never iterate while holding it.
        let data = self.data.read();
        data.iter()
            .map(|(key, value)| Item::new(key.clone(), value.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    use super::*;

    fn live() -> CancellationToken {
        CancellationToken::new()
    }

    #[test]
    fn get_reflects_latest_put() {
        let repo = InMemoryRepository::new();
        repo.put(&live(), Item::new("a", "1")).expect("first put");
        repo.put(&live(), Item::new("a", "2")).expect("overwrite");

        assert_eq!(repo.get("a"), Ok(Item::new("a", "2")));
        assert_eq!(repo.len(), 1);
    }

    #[test]
    fn get_missing_key_is_not_found() {
        let repo = InMemoryRepository::new();
        assert_eq!(
            repo.get("missing"),
            Err(RepoError::NotFound {
                key: "missing".into()
            })
        );
    }

    #[test]
    fn delete_is_idempotent() {
        let repo = InMemoryRepository::new();
        repo.put(&live(), Item::new("a", "1")).expect("put");

        repo.delete("a").expect("first delete");
        repo.delete("a").expect("second delete");
        repo.delete("never-existed").expect("absent delete");

        assert!(matches!(repo.get("a"), Err(RepoError::NotFound { .. })));
        assert!(repo.is_empty());
    }

    #[test]
    fn put_after_delete_restores_key() {
        let repo = InMemoryRepository::new();
        repo.put(&live(), Item::new("a", "1")).expect("put");
        repo.delete("a").expect("delete");
        repo.put(&live(), Item::new("a", "3")).expect("put again");

        assert_eq!(repo.get("a").expect("get").value, "3");
    }

    #[test]
    fn put_on_cancelled_token_is_rejected() {
        let repo = InMemoryRepository::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(
            repo.put(&cancel, Item::new("a", "1")),
            Err(RepoError::Cancelled)
        );
        assert!(repo.is_empty());
    }

    #[test]
    fn list_returns_exact_set() {
        let repo = InMemoryRepository::new();
        repo.put(&live(), Item::new("a", "1")).expect("put a");
        repo.put(&live(), Item::new("b", "2")).expect("put b");

        let listed: HashSet<(String, String)> = repo
            .list()
            .into_iter()
            .map(|item| (item.key, item.value))
            .collect();
        let expected: HashSet<(String, String)> = [("a", "1"), ("b", "2")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        assert_eq!(listed, expected);
    }

    #[test]
    fn list_is_a_snapshot() {
        let repo = InMemoryRepository::new();
        repo.put(&live(), Item::new("a", "1")).expect("put");

        let snapshot = repo.list();
        repo.put(&live(), Item::new("b", "2")).expect("put b");
        repo.delete("a").expect("delete a");

        assert_eq!(snapshot, vec![Item::new("a", "1")]);
    }

    #[test]
    fn concurrent_writers_and_readers() {
        let repo = Arc::new(InMemoryRepository::new());
        let mut handles = Vec::new();

        for writer in 0..8 {
            let repo = Arc::clone(&repo);
            handles.push(thread::spawn(move || {
                let cancel = CancellationToken::new();
                for i in 0..100 {
                    let key = format!("w{writer}-{i}");
                    repo.put(&cancel, Item::new(key.clone(), i.to_string()))
                        .expect("put");
                    assert_eq!(repo.get(&key).expect("read own write").value, i.to_string());
                }
            }));
        }
        for _ in 0..4 {
            let repo = Arc::clone(&repo);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    let _ = repo.list();
                }
            }));
        }

        for handle in handles {
            handle.join().expect("thread panicked");
        }
        assert_eq!(repo.len(), 800);
    }
}

//! Key-value store seam.
//!
//! Records, counters and group indices all live behind [`KvStore`]. The
//! production backend is Redis ([`crate::redis_store::RedisKvStore`]); the
//! in-process [`MemoryKvStore`] backs local runs and tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Errors reported by a key-value backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("operation error: {0}")]
    Operation(String),
}

/// Operations the record and sequence layers need from the store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch a string value
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Fetch several values in one round trip, in key order
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError>;

    /// Overwrite a string value
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Set a value only if the key is absent; returns whether it was set
    async fn set_nx(&self, key: &str, value: &str) -> Result<bool, StoreError>;

    /// Atomically increment an integer value, returning the new value.
    /// A missing key counts as zero.
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;

    /// Enumerate keys starting with `prefix`
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Members of a set, empty when the set does not exist
    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Write `value` under `key` and add `member` to the set at `index_key`
    /// as one atomic unit
    async fn set_and_index(
        &self,
        key: &str,
        value: &str,
        index_key: &str,
        member: &str,
    ) -> Result<(), StoreError>;

    /// Connectivity probe
    async fn ping(&self) -> Result<(), StoreError>;
}

#[derive(Default)]
struct MemoryState {
    values: BTreeMap<String, String>,
    sets: BTreeMap<String, BTreeSet<String>>,
}

/// In-process store with Redis-like semantics
#[derive(Default)]
pub struct MemoryKvStore {
    state: Mutex<MemoryState>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of string keys currently stored
    pub fn len(&self) -> usize {
        self.state.lock().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::Operation(format!(
        "WRONGTYPE Operation against a key holding the wrong kind of value: {}",
        key
    ))
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let state = self.state.lock();
        if state.sets.contains_key(key) {
            return Err(wrong_type(key));
        }
        Ok(state.values.get(key).cloned())
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        let state = self.state.lock();
        // MGET reports non-string keys as nil rather than failing
        Ok(keys.iter().map(|k| state.values.get(k).cloned()).collect())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.sets.remove(key);
        state.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        if state.values.contains_key(key) || state.sets.contains_key(key) {
            return Ok(false);
        }
        state.values.insert(key.to_string(), value.to_string());
        Ok(true)
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut state = self.state.lock();
        if state.sets.contains_key(key) {
            return Err(wrong_type(key));
        }

        let current = match state.values.get(key) {
            Some(raw) => raw.parse::<i64>().map_err(|_| {
                StoreError::Operation("ERR value is not an integer or out of range".to_string())
            })?,
            None => 0,
        };
        let next = current + 1;
        state.values.insert(key.to_string(), next.to_string());
        Ok(next)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let state = self.state.lock();
        let keys = state
            .values
            .keys()
            .chain(state.sets.keys())
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        Ok(keys)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let state = self.state.lock();
        if state.values.contains_key(key) {
            return Err(wrong_type(key));
        }
        Ok(state
            .sets
            .get(key)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn set_and_index(
        &self,
        key: &str,
        value: &str,
        index_key: &str,
        member: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        // Validate before mutating so a failure leaves nothing behind
        if state.values.contains_key(index_key) {
            return Err(wrong_type(index_key));
        }

        state.sets.remove(key);
        state.values.insert(key.to_string(), value.to_string());
        state
            .sets
            .entry(index_key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_incr_starts_from_zero() {
        let store = MemoryKvStore::new();
        assert_eq!(store.incr("id:gifs").await.unwrap(), 1);
        assert_eq!(store.incr("id:gifs").await.unwrap(), 2);
        assert_eq!(store.get("id:gifs").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_incr_rejects_non_integer() {
        let store = MemoryKvStore::new();
        store.set("id:groups", "abc").await.unwrap();
        assert!(matches!(
            store.incr("id:groups").await,
            Err(StoreError::Operation(_))
        ));
    }

    #[tokio::test]
    async fn test_set_nx_keeps_existing_value() {
        let store = MemoryKvStore::new();
        assert!(store.set_nx("id:groups", "1").await.unwrap());
        store.incr("id:groups").await.unwrap();
        assert!(!store.set_nx("id:groups", "1").await.unwrap());
        assert_eq!(store.get("id:groups").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_scan_prefix_does_not_match_index_keys() {
        let store = MemoryKvStore::new();
        store.set("group:1", "{}").await.unwrap();
        store
            .set_and_index("gif:1", "{}", "gifsForGroup:1", "gif:1")
            .await
            .unwrap();

        let keys = store.scan_prefix("group:").await.unwrap();
        assert_eq!(keys, vec!["group:1".to_string()]);
    }

    #[tokio::test]
    async fn test_set_and_index_is_all_or_nothing() {
        let store = MemoryKvStore::new();
        store.set("gifsForGroup:9", "oops").await.unwrap();

        let res = store
            .set_and_index("gif:1", "{}", "gifsForGroup:9", "gif:1")
            .await;
        assert!(res.is_err());
        assert_eq!(store.get("gif:1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_smembers_missing_set_is_empty() {
        let store = MemoryKvStore::new();
        assert!(store.smembers("gifsForGroup:42").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_many_preserves_order() {
        let store = MemoryKvStore::new();
        store.set("a", "1").await.unwrap();
        store.set("c", "3").await.unwrap();

        let values = store
            .get_many(&["c".to_string(), "b".to_string(), "a".to_string()])
            .await
            .unwrap();
        assert_eq!(values, vec![Some("3".to_string()), None, Some("1".to_string())]);
    }
}

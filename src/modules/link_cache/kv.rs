//! Key-value primitives backing the shared link cache mode.

use super::error::LinkCacheResult;
use futures_util::future::BoxFuture;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

/// Hash, set and counter primitives of a shared key-value store.
///
/// Every replica of a service talks to the same store, so everything kept
/// here is visible cluster-wide.
pub trait KvStore: Send + Sync {
    /// Value of `field` in hash `key`.
    fn hget<'a>(&'a self, key: &'a str, field: &'a str)
        -> BoxFuture<'a, LinkCacheResult<Option<String>>>;

    /// Set `field` in hash `key` and return the value it replaced, as one
    /// atomic step.
    fn hswap<'a>(
        &'a self,
        key: &'a str,
        field: &'a str,
        value: String,
    ) -> BoxFuture<'a, LinkCacheResult<Option<String>>>;

    /// Delete `field` from hash `key`. Returns `true` if it existed.
    fn hdel<'a>(&'a self, key: &'a str, field: &'a str) -> BoxFuture<'a, LinkCacheResult<bool>>;

    /// All field/value pairs of hash `key`.
    fn hgetall<'a>(&'a self, key: &'a str) -> BoxFuture<'a, LinkCacheResult<Vec<(String, String)>>>;

    /// Add `member` to set `key`. Returns `true` if it was new.
    fn sadd<'a>(&'a self, key: &'a str, member: &'a str) -> BoxFuture<'a, LinkCacheResult<bool>>;

    /// Remove `member` from set `key`. Returns `true` if it was present.
    fn srem<'a>(&'a self, key: &'a str, member: &'a str) -> BoxFuture<'a, LinkCacheResult<bool>>;

    /// Members of set `key`.
    fn smembers<'a>(&'a self, key: &'a str) -> BoxFuture<'a, LinkCacheResult<Vec<String>>>;

    /// Add `delta` to counter `key` and return the new value.
    fn incr_by<'a>(&'a self, key: &'a str, delta: i64) -> BoxFuture<'a, LinkCacheResult<i64>>;

    /// Current value of counter `key`, zero if absent.
    fn counter<'a>(&'a self, key: &'a str) -> BoxFuture<'a, LinkCacheResult<i64>>;

    /// Delete `key` whatever its kind. Returns `true` if it existed.
    fn del<'a>(&'a self, key: &'a str) -> BoxFuture<'a, LinkCacheResult<bool>>;
}

#[derive(Debug, Default)]
struct KvState {
    hashes: HashMap<String, HashMap<String, String>>,
    sets: HashMap<String, BTreeSet<String>>,
    counters: HashMap<String, i64>,
}

/// In-process [`KvStore`].
///
/// Several link caches sharing one `MemoryKv` behave like replicas sharing
/// a remote store.
#[derive(Debug, Default)]
pub struct MemoryKv {
    state: Mutex<KvState>,
}

impl MemoryKv {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut KvState) -> T) -> T {
        let mut state = self.state.lock().expect("kv lock poisoned");
        f(&mut state)
    }

    /// Number of keys of any kind.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.with_state(|s| s.hashes.len() + s.sets.len() + s.counters.len())
    }
}

impl KvStore for MemoryKv {
    fn hget<'a>(
        &'a self,
        key: &'a str,
        field: &'a str,
    ) -> BoxFuture<'a, LinkCacheResult<Option<String>>> {
        Box::pin(async move {
            Ok(self.with_state(|s| s.hashes.get(key).and_then(|h| h.get(field)).cloned()))
        })
    }

    fn hswap<'a>(
        &'a self,
        key: &'a str,
        field: &'a str,
        value: String,
    ) -> BoxFuture<'a, LinkCacheResult<Option<String>>> {
        Box::pin(async move {
            Ok(self.with_state(|s| {
                s.hashes
                    .entry(key.to_string())
                    .or_default()
                    .insert(field.to_string(), value)
            }))
        })
    }

    fn hdel<'a>(&'a self, key: &'a str, field: &'a str) -> BoxFuture<'a, LinkCacheResult<bool>> {
        Box::pin(async move {
            Ok(self.with_state(|s| {
                let Some(hash) = s.hashes.get_mut(key) else {
                    return false;
                };
                let removed = hash.remove(field).is_some();
                if hash.is_empty() {
                    s.hashes.remove(key);
                }
                removed
            }))
        })
    }

    fn hgetall<'a>(&'a self, key: &'a str) -> BoxFuture<'a, LinkCacheResult<Vec<(String, String)>>> {
        Box::pin(async move {
            Ok(self.with_state(|s| {
                s.hashes
                    .get(key)
                    .map(|h| h.iter().map(|(f, v)| (f.clone(), v.clone())).collect())
                    .unwrap_or_default()
            }))
        })
    }

    fn sadd<'a>(&'a self, key: &'a str, member: &'a str) -> BoxFuture<'a, LinkCacheResult<bool>> {
        Box::pin(async move {
            Ok(self.with_state(|s| {
                s.sets
                    .entry(key.to_string())
                    .or_default()
                    .insert(member.to_string())
            }))
        })
    }

    fn srem<'a>(&'a self, key: &'a str, member: &'a str) -> BoxFuture<'a, LinkCacheResult<bool>> {
        Box::pin(async move {
            Ok(self.with_state(|s| {
                let Some(set) = s.sets.get_mut(key) else {
                    return false;
                };
                let removed = set.remove(member);
                if set.is_empty() {
                    s.sets.remove(key);
                }
                removed
            }))
        })
    }

    fn smembers<'a>(&'a self, key: &'a str) -> BoxFuture<'a, LinkCacheResult<Vec<String>>> {
        Box::pin(async move {
            Ok(self.with_state(|s| {
                s.sets
                    .get(key)
                    .map(|set| set.iter().cloned().collect())
                    .unwrap_or_default()
            }))
        })
    }

    fn incr_by<'a>(&'a self, key: &'a str, delta: i64) -> BoxFuture<'a, LinkCacheResult<i64>> {
        Box::pin(async move {
            Ok(self.with_state(|s| {
                let value = s.counters.entry(key.to_string()).or_insert(0);
                *value += delta;
                *value
            }))
        })
    }

    fn counter<'a>(&'a self, key: &'a str) -> BoxFuture<'a, LinkCacheResult<i64>> {
        Box::pin(async move { Ok(self.with_state(|s| s.counters.get(key).copied().unwrap_or(0))) })
    }

    fn del<'a>(&'a self, key: &'a str) -> BoxFuture<'a, LinkCacheResult<bool>> {
        Box::pin(async move {
            Ok(self.with_state(|s| {
                let hash = s.hashes.remove(key).is_some();
                let set = s.sets.remove(key).is_some();
                let counter = s.counters.remove(key).is_some();
                hash || set || counter
            }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_ops() {
        let kv = MemoryKv::new();
        assert_eq!(kv.hswap("route-a-b", "t1", "v1".to_string()).await.unwrap(), None);
        assert_eq!(
            kv.hswap("route-a-b", "t1", "v2".to_string())
                .await
                .unwrap()
                .as_deref(),
            Some("v1")
        );
        assert_eq!(
            kv.hget("route-a-b", "t1").await.unwrap().as_deref(),
            Some("v2")
        );
        assert_eq!(kv.hgetall("route-a-b").await.unwrap().len(), 1);

        assert!(kv.hdel("route-a-b", "t1").await.unwrap());
        assert!(!kv.hdel("route-a-b", "t1").await.unwrap());
        assert_eq!(kv.key_count(), 0);
    }

    #[tokio::test]
    async fn test_set_and_counter_ops() {
        let kv = MemoryKv::new();
        assert!(kv.sadd("s", "x").await.unwrap());
        assert!(!kv.sadd("s", "x").await.unwrap());
        kv.sadd("s", "a").await.unwrap();
        assert_eq!(kv.smembers("s").await.unwrap(), vec!["a", "x"]);
        assert!(kv.srem("s", "a").await.unwrap());

        assert_eq!(kv.counter("c").await.unwrap(), 0);
        assert_eq!(kv.incr_by("c", 2).await.unwrap(), 2);
        assert_eq!(kv.incr_by("c", -1).await.unwrap(), 1);

        assert!(kv.del("c").await.unwrap());
        assert!(kv.del("s").await.unwrap());
        assert!(!kv.del("missing").await.unwrap());
        assert_eq!(kv.key_count(), 0);
    }
}

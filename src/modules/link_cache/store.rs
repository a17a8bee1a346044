//! Binding and relation storage behind one interface.
//!
//! [`LocalLinkStore`] keeps typed maps owned by one replica.
//! [`SharedLinkStore`] persists the same data in a [`KvStore`] using the
//! `route-{parent}-{child}` hashes and `relation-{parent}-{child}-{id}`
//! counters every replica of the parent service reads.

use super::binding::{relation_set_key, route_key, LinkBinding, RelationKey};
use super::error::LinkCacheResult;
use super::kv::KvStore;
use futures_util::future::BoxFuture;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Storage for bindings and relation counts.
pub trait LinkStore: Send + Sync {
    /// Binding of `token` from `parent` to `child`.
    fn get<'a>(
        &'a self,
        parent: &'a str,
        child: &'a str,
        token: &'a str,
    ) -> BoxFuture<'a, LinkCacheResult<Option<LinkBinding>>>;

    /// Insert or replace the binding of `binding.token` to `binding.name`.
    /// Returns the binding it replaced.
    fn put<'a>(
        &'a self,
        parent: &'a str,
        binding: &'a LinkBinding,
    ) -> BoxFuture<'a, LinkCacheResult<Option<LinkBinding>>>;

    /// Remove the binding of `token` from `parent` to `child`.
    fn remove<'a>(
        &'a self,
        parent: &'a str,
        child: &'a str,
        token: &'a str,
    ) -> BoxFuture<'a, LinkCacheResult<Option<LinkBinding>>>;

    /// Every decodable binding from `parent` to `child`.
    fn bindings<'a>(
        &'a self,
        parent: &'a str,
        child: &'a str,
    ) -> BoxFuture<'a, LinkCacheResult<Vec<LinkBinding>>>;

    /// Increment a relation count, registering the relation if new.
    fn incr_relation<'a>(&'a self, key: &'a RelationKey) -> BoxFuture<'a, LinkCacheResult<i64>>;

    /// Decrement a relation count. Never goes below zero.
    fn decr_relation<'a>(&'a self, key: &'a RelationKey) -> BoxFuture<'a, LinkCacheResult<i64>>;

    /// Current count of a relation.
    fn relation_count<'a>(&'a self, key: &'a RelationKey) -> BoxFuture<'a, LinkCacheResult<i64>>;

    /// Relations registered for `parent`, sorted.
    fn relation_keys<'a>(
        &'a self,
        parent: &'a str,
    ) -> BoxFuture<'a, LinkCacheResult<Vec<RelationKey>>>;

    /// Forget a relation and its count.
    fn remove_relation<'a>(&'a self, key: &'a RelationKey) -> BoxFuture<'a, LinkCacheResult<()>>;
}

type Route = (String, String);

#[derive(Debug, Default)]
struct LocalState {
    routes: HashMap<Route, HashMap<String, LinkBinding>>,
    relations: HashMap<String, BTreeMap<RelationKey, i64>>,
}

/// Single-replica store; nothing survives the process.
#[derive(Debug, Default)]
pub struct LocalLinkStore {
    state: Mutex<LocalState>,
}

impl LocalLinkStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut LocalState) -> T) -> T {
        let mut state = self.state.lock().expect("link store lock poisoned");
        f(&mut state)
    }
}

impl LinkStore for LocalLinkStore {
    fn get<'a>(
        &'a self,
        parent: &'a str,
        child: &'a str,
        token: &'a str,
    ) -> BoxFuture<'a, LinkCacheResult<Option<LinkBinding>>> {
        Box::pin(async move {
            Ok(self.with_state(|s| {
                s.routes
                    .get(&(parent.to_string(), child.to_string()))
                    .and_then(|route| route.get(token))
                    .cloned()
            }))
        })
    }

    fn put<'a>(
        &'a self,
        parent: &'a str,
        binding: &'a LinkBinding,
    ) -> BoxFuture<'a, LinkCacheResult<Option<LinkBinding>>> {
        Box::pin(async move {
            Ok(self.with_state(|s| {
                s.routes
                    .entry((parent.to_string(), binding.name.clone()))
                    .or_default()
                    .insert(binding.token.clone(), binding.clone())
            }))
        })
    }

    fn remove<'a>(
        &'a self,
        parent: &'a str,
        child: &'a str,
        token: &'a str,
    ) -> BoxFuture<'a, LinkCacheResult<Option<LinkBinding>>> {
        Box::pin(async move {
            Ok(self.with_state(|s| {
                let route_id = (parent.to_string(), child.to_string());
                let route = s.routes.get_mut(&route_id)?;
                let removed = route.remove(token);
                if route.is_empty() {
                    s.routes.remove(&route_id);
                }
                removed
            }))
        })
    }

    fn bindings<'a>(
        &'a self,
        parent: &'a str,
        child: &'a str,
    ) -> BoxFuture<'a, LinkCacheResult<Vec<LinkBinding>>> {
        Box::pin(async move {
            Ok(self.with_state(|s| {
                s.routes
                    .get(&(parent.to_string(), child.to_string()))
                    .map(|route| route.values().cloned().collect())
                    .unwrap_or_default()
            }))
        })
    }

    fn incr_relation<'a>(&'a self, key: &'a RelationKey) -> BoxFuture<'a, LinkCacheResult<i64>> {
        Box::pin(async move {
            Ok(self.with_state(|s| {
                let count = s
                    .relations
                    .entry(key.parent.clone())
                    .or_default()
                    .entry(key.clone())
                    .or_insert(0);
                *count += 1;
                *count
            }))
        })
    }

    fn decr_relation<'a>(&'a self, key: &'a RelationKey) -> BoxFuture<'a, LinkCacheResult<i64>> {
        Box::pin(async move {
            Ok(self.with_state(|s| {
                match s.relations.get_mut(&key.parent).and_then(|r| r.get_mut(key)) {
                    Some(count) => {
                        *count = (*count - 1).max(0);
                        *count
                    },
                    None => 0,
                }
            }))
        })
    }

    fn relation_count<'a>(&'a self, key: &'a RelationKey) -> BoxFuture<'a, LinkCacheResult<i64>> {
        Box::pin(async move {
            Ok(self.with_state(|s| {
                s.relations
                    .get(&key.parent)
                    .and_then(|r| r.get(key))
                    .copied()
                    .unwrap_or(0)
            }))
        })
    }

    fn relation_keys<'a>(
        &'a self,
        parent: &'a str,
    ) -> BoxFuture<'a, LinkCacheResult<Vec<RelationKey>>> {
        Box::pin(async move {
            Ok(self.with_state(|s| {
                s.relations
                    .get(parent)
                    .map(|r| r.keys().cloned().collect())
                    .unwrap_or_default()
            }))
        })
    }

    fn remove_relation<'a>(&'a self, key: &'a RelationKey) -> BoxFuture<'a, LinkCacheResult<()>> {
        Box::pin(async move {
            self.with_state(|s| {
                if let Some(relations) = s.relations.get_mut(&key.parent) {
                    relations.remove(key);
                    if relations.is_empty() {
                        s.relations.remove(&key.parent);
                    }
                }
            });
            Ok(())
        })
    }
}

/// Store shared by every replica of the parent service.
pub struct SharedLinkStore {
    kv: Arc<dyn KvStore>,
}

impl std::fmt::Debug for SharedLinkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedLinkStore").finish_non_exhaustive()
    }
}

impl SharedLinkStore {
    /// Persist through `kv`.
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }
}

impl LinkStore for SharedLinkStore {
    fn get<'a>(
        &'a self,
        parent: &'a str,
        child: &'a str,
        token: &'a str,
    ) -> BoxFuture<'a, LinkCacheResult<Option<LinkBinding>>> {
        Box::pin(async move {
            match self.kv.hget(&route_key(parent, child), token).await? {
                Some(value) => LinkBinding::decode(token, &value).map(Some),
                None => Ok(None),
            }
        })
    }

    fn put<'a>(
        &'a self,
        parent: &'a str,
        binding: &'a LinkBinding,
    ) -> BoxFuture<'a, LinkCacheResult<Option<LinkBinding>>> {
        Box::pin(async move {
            let route = route_key(parent, &binding.name);
            let value = binding.encode()?;
            // Concurrent puts of one token each see a distinct previous value.
            match self.kv.hswap(&route, &binding.token, value).await? {
                Some(value) => match LinkBinding::decode(&binding.token, &value) {
                    Ok(previous) => Ok(Some(previous)),
                    Err(e) => {
                        warn!(route = %route, error = %e, "Overwrote malformed binding");
                        Ok(None)
                    },
                },
                None => Ok(None),
            }
        })
    }

    fn remove<'a>(
        &'a self,
        parent: &'a str,
        child: &'a str,
        token: &'a str,
    ) -> BoxFuture<'a, LinkCacheResult<Option<LinkBinding>>> {
        Box::pin(async move {
            let route = route_key(parent, child);
            let Some(value) = self.kv.hget(&route, token).await? else {
                return Ok(None);
            };
            if !self.kv.hdel(&route, token).await? {
                // Another replica removed it first.
                return Ok(None);
            }
            match LinkBinding::decode(token, &value) {
                Ok(binding) => Ok(Some(binding)),
                Err(e) => {
                    warn!(route = %route, error = %e, "Removed malformed binding");
                    Ok(None)
                },
            }
        })
    }

    fn bindings<'a>(
        &'a self,
        parent: &'a str,
        child: &'a str,
    ) -> BoxFuture<'a, LinkCacheResult<Vec<LinkBinding>>> {
        Box::pin(async move {
            let route = route_key(parent, child);
            let entries = self.kv.hgetall(&route).await?;
            Ok(entries
                .into_iter()
                .filter_map(|(token, value)| match LinkBinding::decode(&token, &value) {
                    Ok(binding) => Some(binding),
                    Err(e) => {
                        warn!(route = %route, error = %e, "Skipping malformed binding");
                        None
                    },
                })
                .collect())
        })
    }

    fn incr_relation<'a>(&'a self, key: &'a RelationKey) -> BoxFuture<'a, LinkCacheResult<i64>> {
        Box::pin(async move {
            let name = key.to_string();
            self.kv.sadd(&relation_set_key(&key.parent), &name).await?;
            self.kv.incr_by(&name, 1).await
        })
    }

    fn decr_relation<'a>(&'a self, key: &'a RelationKey) -> BoxFuture<'a, LinkCacheResult<i64>> {
        Box::pin(async move {
            let name = key.to_string();
            let count = self.kv.incr_by(&name, -1).await?;
            if count < 0 {
                // Add back only the overshoot; a concurrent increment may have landed.
                return Ok(self.kv.incr_by(&name, -count).await?.max(0));
            }
            Ok(count)
        })
    }

    fn relation_count<'a>(&'a self, key: &'a RelationKey) -> BoxFuture<'a, LinkCacheResult<i64>> {
        Box::pin(async move { Ok(self.kv.counter(&key.to_string()).await?.max(0)) })
    }

    fn relation_keys<'a>(
        &'a self,
        parent: &'a str,
    ) -> BoxFuture<'a, LinkCacheResult<Vec<RelationKey>>> {
        Box::pin(async move {
            let members = self.kv.smembers(&relation_set_key(parent)).await?;
            let keys: BTreeSet<RelationKey> = members
                .iter()
                .filter_map(|member| match RelationKey::parse(member, parent) {
                    Ok(key) => Some(key),
                    Err(e) => {
                        warn!(error = %e, "Skipping relation key");
                        None
                    },
                })
                .collect();
            Ok(keys.into_iter().collect())
        })
    }

    fn remove_relation<'a>(&'a self, key: &'a RelationKey) -> BoxFuture<'a, LinkCacheResult<()>> {
        Box::pin(async move {
            let name = key.to_string();
            self.kv.srem(&relation_set_key(&key.parent), &name).await?;
            self.kv.del(&name).await?;
            Ok(())
        })
    }
}

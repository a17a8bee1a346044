//! Mutual-exclusion backends.

use super::error::{ElectionError, ElectionResult};
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Session-scoped locks.
///
/// A session lives for its TTL unless refreshed. When a session expires or is
/// deleted, every lock it holds is released.
pub trait LockBackend: Send + Sync {
    /// Open a session for `owner`, returning its id.
    fn create_session<'a>(
        &'a self,
        owner: &'a str,
        ttl: Duration,
    ) -> BoxFuture<'a, ElectionResult<String>>;

    /// Try to take lock `name` for `session`. `Ok(false)` if someone else holds it.
    fn acquire<'a>(&'a self, name: &'a str, session: &'a str) -> BoxFuture<'a, ElectionResult<bool>>;

    /// Extend `session` by its TTL.
    fn refresh<'a>(&'a self, session: &'a str) -> BoxFuture<'a, ElectionResult<()>>;

    /// Release lock `name` if `session` holds it.
    fn release<'a>(&'a self, name: &'a str, session: &'a str) -> BoxFuture<'a, ElectionResult<()>>;

    /// Delete `session`, releasing its locks.
    fn delete_session<'a>(&'a self, session: &'a str) -> BoxFuture<'a, ElectionResult<()>>;

    /// Session currently holding lock `name`.
    fn holder<'a>(&'a self, name: &'a str) -> BoxFuture<'a, ElectionResult<Option<String>>>;
}

#[derive(Debug)]
struct Session {
    owner: String,
    ttl: Duration,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct State {
    sessions: HashMap<String, Session>,
    locks: HashMap<String, String>,
    next_id: u64,
}

impl State {
    fn purge_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.expires_at <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            self.drop_session(&id);
        }
    }

    fn drop_session(&mut self, id: &str) {
        self.sessions.remove(id);
        self.locks.retain(|_, holder| holder != id);
    }
}

/// In-process lock backend shared by every elector holding a clone of its `Arc`.
#[derive(Debug, Default)]
pub struct MemoryLockBackend {
    state: Mutex<State>,
}

impl MemoryLockBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        let mut state = self.state.lock().expect("lock backend poisoned");
        state.purge_expired(Instant::now());
        state.sessions.len()
    }

    /// Owner of a live session.
    #[must_use]
    pub fn session_owner(&self, session: &str) -> Option<String> {
        let mut state = self.state.lock().expect("lock backend poisoned");
        state.purge_expired(Instant::now());
        state.sessions.get(session).map(|s| s.owner.clone())
    }

    /// Drop a session as if its TTL ran out.
    pub fn expire_session(&self, session: &str) {
        self.state
            .lock()
            .expect("lock backend poisoned")
            .drop_session(session);
    }
}

impl LockBackend for MemoryLockBackend {
    fn create_session<'a>(
        &'a self,
        owner: &'a str,
        ttl: Duration,
    ) -> BoxFuture<'a, ElectionResult<String>> {
        Box::pin(async move {
            let mut state = self.state.lock().expect("lock backend poisoned");
            state.next_id += 1;
            let id = format!("session-{}", state.next_id);
            state.sessions.insert(
                id.clone(),
                Session {
                    owner: owner.to_string(),
                    ttl,
                    expires_at: Instant::now() + ttl,
                },
            );
            Ok(id)
        })
    }

    fn acquire<'a>(&'a self, name: &'a str, session: &'a str) -> BoxFuture<'a, ElectionResult<bool>> {
        Box::pin(async move {
            let mut state = self.state.lock().expect("lock backend poisoned");
            state.purge_expired(Instant::now());
            if !state.sessions.contains_key(session) {
                return Err(ElectionError::SessionExpired(session.to_string()));
            }
            match state.locks.get(name) {
                Some(holder) => Ok(holder == session),
                None => {
                    state.locks.insert(name.to_string(), session.to_string());
                    Ok(true)
                },
            }
        })
    }

    fn refresh<'a>(&'a self, session: &'a str) -> BoxFuture<'a, ElectionResult<()>> {
        Box::pin(async move {
            let now = Instant::now();
            let mut state = self.state.lock().expect("lock backend poisoned");
            state.purge_expired(now);
            let entry = state
                .sessions
                .get_mut(session)
                .ok_or_else(|| ElectionError::SessionExpired(session.to_string()))?;
            entry.expires_at = now + entry.ttl;
            Ok(())
        })
    }

    fn release<'a>(&'a self, name: &'a str, session: &'a str) -> BoxFuture<'a, ElectionResult<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().expect("lock backend poisoned");
            if state.locks.get(name).is_some_and(|holder| holder == session) {
                state.locks.remove(name);
            }
            Ok(())
        })
    }

    fn delete_session<'a>(&'a self, session: &'a str) -> BoxFuture<'a, ElectionResult<()>> {
        Box::pin(async move {
            self.state
                .lock()
                .expect("lock backend poisoned")
                .drop_session(session);
            Ok(())
        })
    }

    fn holder<'a>(&'a self, name: &'a str) -> BoxFuture<'a, ElectionResult<Option<String>>> {
        Box::pin(async move {
            let mut state = self.state.lock().expect("lock backend poisoned");
            state.purge_expired(Instant::now());
            Ok(state.locks.get(name).cloned())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(10);

    #[tokio::test]
    async fn test_one_holder_per_lock() {
        let backend = MemoryLockBackend::new();
        let a = backend.create_session("a", TTL).await.unwrap();
        let b = backend.create_session("b", TTL).await.unwrap();

        assert!(backend.acquire("leader", &a).await.unwrap());
        assert!(backend.acquire("leader", &a).await.unwrap());
        assert!(!backend.acquire("leader", &b).await.unwrap());
        assert_eq!(backend.holder("leader").await.unwrap(), Some(a.clone()));

        backend.release("leader", &b).await.unwrap();
        assert_eq!(backend.holder("leader").await.unwrap(), Some(a.clone()));

        backend.release("leader", &a).await.unwrap();
        assert!(backend.acquire("leader", &b).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_session_releases_locks() {
        let backend = MemoryLockBackend::new();
        let a = backend.create_session("a", TTL).await.unwrap();
        assert!(backend.acquire("leader", &a).await.unwrap());

        backend.delete_session(&a).await.unwrap();
        assert_eq!(backend.holder("leader").await.unwrap(), None);
        assert!(matches!(
            backend.acquire("leader", &a).await,
            Err(ElectionError::SessionExpired(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry_and_refresh() {
        let backend = MemoryLockBackend::new();
        let a = backend.create_session("a", TTL).await.unwrap();
        assert!(backend.acquire("leader", &a).await.unwrap());
        assert_eq!(backend.session_owner(&a).as_deref(), Some("a"));

        tokio::time::advance(Duration::from_secs(8)).await;
        backend.refresh(&a).await.unwrap();

        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(backend.holder("leader").await.unwrap(), Some(a.clone()));

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(backend.holder("leader").await.unwrap(), None);
        assert!(matches!(
            backend.refresh(&a).await,
            Err(ElectionError::SessionExpired(_))
        ));
        assert_eq!(backend.session_count(), 0);
    }
}

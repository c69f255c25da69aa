//! Registry of live sessions.
//!
//! The registry is the only shared structure touched by both the broadcast
//! path (reads) and session tasks (insert on open, remove on close).  It is a
//! `parking_lot::RwLock` around a `HashMap`; the lock is only held long enough
//! to clone out `Arc`s, never across an `.await` or a socket write.

use std::collections::HashMap;
use std::sync::Arc;

use camcast_core::SessionId;
use parking_lot::RwLock;

use crate::infrastructure::session::SessionHandle;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `handle`.  Returns the previous handle with the same id, which
    /// should never happen with random ids.
    pub fn insert(&self, handle: Arc<SessionHandle>) -> Option<Arc<SessionHandle>> {
        self.sessions.write().insert(handle.id(), handle)
    }

    /// Removes and returns the session, if it was still registered.
    pub fn remove(&self, id: &SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.write().remove(id)
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.read().get(id).cloned()
    }

    /// Clones every handle out under one read lock.
    ///
    /// The snapshot may include sessions that close while the caller iterates
    /// it; delivery to those reports [`Delivery::Closed`](crate::infrastructure::session::Delivery::Closed).
    pub fn snapshot(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions.read().values().cloned().collect()
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Removes every session and returns them.
    pub fn drain(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions.write().drain().map(|(_, h)| h).collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn handle() -> Arc<SessionHandle> {
        let peer = "127.0.0.1:5000".parse().expect("addr");
        let (h, _rx) = SessionHandle::new(peer, 4, &CancellationToken::new());
        h
    }

    #[test]
    fn test_insert_get_remove() {
        // Arrange
        let registry = SessionRegistry::new();
        let h = handle();
        let id = h.id();

        // Act
        assert!(registry.insert(h).is_none());

        // Assert
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&id).map(|h| h.id()), Some(id));
        assert!(registry.remove(&id).is_some());
        assert!(registry.remove(&id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_is_independent_of_later_removals() {
        let registry = SessionRegistry::new();
        let a = handle();
        let b = handle();
        let a_id = a.id();
        registry.insert(a);
        registry.insert(b);

        let snapshot = registry.snapshot();
        registry.remove(&a_id);

        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_drain_empties_registry() {
        let registry = SessionRegistry::new();
        registry.insert(handle());
        registry.insert(handle());

        let drained = registry.drain();

        assert_eq!(drained.len(), 2);
        assert!(registry.is_empty());
        assert!(registry.ids().is_empty());
    }
}

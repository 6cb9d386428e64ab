//! Live connection storage.
//!
//! [`Registry`] maps each open connection's [`ConnectionId`] to its handle.
//! It is owned by the dispatcher task, which serializes every engine
//! callback, so no locking is needed here.

use std::collections::HashMap;

use super::WebSocket;
use crate::domain::ConnectionId;

/// Map of open connections.
#[derive(Debug, Default)]
pub struct Registry {
    clients: HashMap<ConnectionId, WebSocket>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `handle`. Returns `false` if the id is already present, which
    /// cannot happen with UUID v4 ids.
    pub fn insert(&mut self, handle: WebSocket) -> bool {
        let id = handle.id();
        if self.clients.contains_key(&id) {
            return false;
        }
        self.clients.insert(id, handle);
        true
    }

    /// Looks up a handle.
    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<&WebSocket> {
        self.clients.get(&id)
    }

    /// Removes and returns a handle.
    pub fn remove(&mut self, id: ConnectionId) -> Option<WebSocket> {
        self.clients.remove(&id)
    }

    /// Snapshot of every handle, in no particular order.
    #[must_use]
    pub fn handles(&self) -> Vec<WebSocket> {
        self.clients.values().cloned().collect()
    }

    /// Number of open connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// `true` when no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::engine::EngineSocket;
    use crate::engine::mock::MockSocket;

    fn handle() -> WebSocket {
        let socket: Arc<dyn EngineSocket> = Arc::new(MockSocket::new());
        WebSocket::new(ConnectionId::new(), socket, 0).0
    }

    #[test]
    fn insert_get_remove() {
        let mut registry = Registry::new();
        assert!(registry.is_empty());

        let ws = handle();
        assert!(registry.insert(ws.clone()));
        assert!(!registry.insert(ws.clone()));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(ws.id()), Some(&ws));

        assert_eq!(registry.remove(ws.id()), Some(ws.clone()));
        assert!(registry.remove(ws.id()).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn handles_snapshots_all_clients() {
        let mut registry = Registry::new();
        let a = handle();
        let b = handle();
        registry.insert(a.clone());
        registry.insert(b.clone());

        let handles = registry.handles();
        assert_eq!(handles.len(), 2);
        assert!(handles.contains(&a));
        assert!(handles.contains(&b));
    }
}

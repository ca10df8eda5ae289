//! Live connections of one locality, indexed by session id.
//!
//! The reverse direction (connection → id) is carried by the
//! [`PeerConnection`] itself.

use std::collections::HashMap;
use std::sync::Arc;

use dcnt_core::SessionId;

use crate::session::PeerConnection;

/// Session id → connection for one locality.
#[derive(Default)]
pub struct ConnectionRegistry {
    by_id: HashMap<SessionId, Arc<PeerConnection>>,
}

impl ConnectionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a connection under its session id.
    pub fn insert(&mut self, connection: Arc<PeerConnection>) {
        let _ = self.by_id.insert(connection.id().clone(), connection);
    }

    /// Remove and return the connection for `id`.
    pub fn remove(&mut self, id: &SessionId) -> Option<Arc<PeerConnection>> {
        self.by_id.remove(id)
    }

    /// Connection for `id`, if live.
    pub fn get(&self, id: &SessionId) -> Option<&Arc<PeerConnection>> {
        self.by_id.get(id)
    }

    /// Whether `id` is live.
    pub fn contains(&self, id: &SessionId) -> bool {
        self.by_id.contains_key(id)
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether there are no live connections.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Iterate live connections.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<PeerConnection>> {
        self.by_id.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dcnt_core::Locality;
    use tokio::sync::mpsc;

    fn conn(id: &str) -> Arc<PeerConnection> {
        let (tx, _rx) = mpsc::channel(1);
        Arc::new(PeerConnection::new(
            SessionId::from_raw(id),
            Locality::Remote,
            "198.51.100.7:1",
            tx,
        ))
    }

    #[test]
    fn insert_get_remove() {
        let mut reg = ConnectionRegistry::new();
        assert!(reg.is_empty());

        reg.insert(conn("a"));
        reg.insert(conn("b"));
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.get(&SessionId::from_raw("a")).unwrap().id().as_str(), "a");

        let removed = reg.remove(&SessionId::from_raw("a")).unwrap();
        assert_eq!(removed.id().as_str(), "a");
        assert!(!reg.contains(&SessionId::from_raw("a")));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn lookup_of_unknown_id_is_none() {
        let reg = ConnectionRegistry::new();
        assert!(reg.get(&SessionId::from_raw("missing")).is_none());
    }
}

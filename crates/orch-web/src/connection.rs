//! Connected hub clients and the groups they belong to.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Serialized frame shared by every recipient of a broadcast.
pub type Frame = Arc<String>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(format!("conn_{}", Uuid::new_v4().simple()))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    tx: mpsc::Sender<Frame>,
    groups: Mutex<HashSet<String>>,
    dropped: AtomicU64,
}

impl Connection {
    /// Queue a frame without waiting. A full queue drops the frame.
    pub fn send(&self, frame: Frame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(frame)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    conn_id = %self.id,
                    frame_len = frame.len(),
                    dropped,
                    "send queue full, dropping frame"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn groups(&self) -> Vec<String> {
        let mut groups = self.groups.lock().iter().cloned().collect::<Vec<_>>();
        groups.sort();
        groups
    }
}

pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<Connection>>,
    groups: DashMap<String, HashSet<ConnectionId>>,
    max_send_queue: usize,
}

impl ConnectionRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            connections: DashMap::new(),
            groups: DashMap::new(),
            max_send_queue: max_send_queue.max(1),
        }
    }

    pub fn register(&self) -> (Arc<Connection>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let connection = Arc::new(Connection {
            id: ConnectionId::new(),
            tx,
            groups: Mutex::new(HashSet::new()),
            dropped: AtomicU64::new(0),
        });
        self.connections
            .insert(connection.id.clone(), connection.clone());
        (connection, rx)
    }

    /// Remove the connection and its memberships. Returns the groups it
    /// left, or `None` when the id was unknown.
    pub fn unregister(&self, conn_id: &ConnectionId) -> Option<Vec<String>> {
        let (_, connection) = self.connections.remove(conn_id)?;
        let mut groups = std::mem::take(&mut *connection.groups.lock())
            .into_iter()
            .collect::<Vec<_>>();
        groups.sort();
        for group in &groups {
            self.remove_member(group, conn_id);
        }
        debug!(%conn_id, "connection unregistered");
        Some(groups)
    }

    pub fn get(&self, conn_id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(conn_id).map(|entry| entry.value().clone())
    }

    pub fn join(&self, conn_id: &ConnectionId, group: &str) -> bool {
        let Some(connection) = self.get(conn_id) else {
            return false;
        };
        connection.groups.lock().insert(group.to_string());
        self.groups
            .entry(group.to_string())
            .or_default()
            .insert(conn_id.clone());
        true
    }

    pub fn leave(&self, conn_id: &ConnectionId, group: &str) {
        if let Some(connection) = self.get(conn_id) {
            connection.groups.lock().remove(group);
        }
        self.remove_member(group, conn_id);
    }

    pub fn members(&self, group: &str) -> Vec<Arc<Connection>> {
        let ids = match self.groups.get(group) {
            Some(members) => members.iter().cloned().collect::<Vec<_>>(),
            None => return Vec::new(),
        };
        ids.iter().filter_map(|id| self.get(id)).collect()
    }

    /// Best-effort fan-out; returns how many connections accepted the frame.
    pub fn broadcast(&self, group: &str, frame: &Frame) -> usize {
        self.members(group)
            .iter()
            .filter(|connection| connection.send(frame.clone()))
            .count()
    }

    pub fn broadcast_all(&self, frame: &Frame) -> usize {
        let connections = self
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect::<Vec<_>>();
        connections
            .iter()
            .filter(|connection| connection.send(frame.clone()))
            .count()
    }

    pub fn send_to(&self, conn_id: &ConnectionId, frame: Frame) -> bool {
        self.get(conn_id)
            .is_some_and(|connection| connection.send(frame))
    }

    pub fn count(&self) -> usize {
        self.connections.len()
    }

    fn remove_member(&self, group: &str, conn_id: &ConnectionId) {
        if let Some(mut members) = self.groups.get_mut(group) {
            members.remove(conn_id);
        }
        self.groups.remove_if(group, |_, members| members.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(text: &str) -> Frame {
        Arc::new(text.to_string())
    }

    #[test]
    fn connection_ids_are_unique() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b);
        assert!(a.0.starts_with("conn_"));
    }

    #[test]
    fn broadcast_reaches_only_group_members() {
        let registry = ConnectionRegistry::new(8);
        let (member, mut member_rx) = registry.register();
        let (outsider, mut outsider_rx) = registry.register();
        registry.join(&member.id, "ticket-TKT-1");

        let delivered = registry.broadcast("ticket-TKT-1", &frame("hello"));

        assert_eq!(delivered, 1);
        assert_eq!(member_rx.try_recv().unwrap().as_str(), "hello");
        assert!(outsider_rx.try_recv().is_err());
        assert_eq!(outsider.groups(), Vec::<String>::new());
    }

    #[test]
    fn unregister_leaves_every_group() {
        let registry = ConnectionRegistry::new(8);
        let (conn, _rx) = registry.register();
        registry.join(&conn.id, "ticket-TKT-1");
        registry.join(&conn.id, "worker-TKT-1");
        assert_eq!(conn.groups(), vec!["ticket-TKT-1", "worker-TKT-1"]);

        assert_eq!(
            registry.unregister(&conn.id),
            Some(vec!["ticket-TKT-1".to_string(), "worker-TKT-1".to_string()])
        );
        assert!(registry.unregister(&conn.id).is_none());
        assert!(registry.members("ticket-TKT-1").is_empty());
        assert!(registry.members("worker-TKT-1").is_empty());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let registry = ConnectionRegistry::new(1);
        let (conn, mut rx) = registry.register();

        assert!(registry.send_to(&conn.id, frame("first")));
        assert!(!registry.send_to(&conn.id, frame("second")));
        assert_eq!(conn.dropped(), 1);
        assert_eq!(rx.try_recv().unwrap().as_str(), "first");
    }

    #[test]
    fn leave_stops_delivery() {
        let registry = ConnectionRegistry::new(8);
        let (conn, mut rx) = registry.register();
        registry.join(&conn.id, "ticket-TKT-9");
        registry.leave(&conn.id, "ticket-TKT-9");

        assert_eq!(registry.broadcast("ticket-TKT-9", &frame("x")), 0);
        assert!(rx.try_recv().is_err());
    }
}

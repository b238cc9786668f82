//! Registry of live client connections.
//!
//! Broadcast snapshots the set under the lock, then enqueues outside it, so
//! a registration mid-broadcast never affects the pass and a slow client
//! costs nothing beyond its own queue-enqueue step.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use super::connection::ClientConnection;

#[derive(Default)]
pub struct ConnectionManager {
    connections: RwLock<HashMap<Uuid, Arc<ClientConnection>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, conn: Arc<ClientConnection>) {
        let total = {
            let mut connections = self.connections.write();
            connections.insert(conn.conn_id, conn.clone());
            connections.len()
        };
        metrics::gauge!("ws_connections_active", total as f64);
        info!(
            client = conn.client_id,
            session = %conn.session_id,
            total,
            "Client connected"
        );
    }

    pub fn deregister(&self, conn: &Arc<ClientConnection>) {
        let total = {
            let mut connections = self.connections.write();
            connections.remove(&conn.conn_id);
            connections.len()
        };
        metrics::gauge!("ws_connections_active", total as f64);
        info!(
            client = conn.client_id,
            session = %conn.session_id,
            total,
            "Client disconnected"
        );
    }

    pub fn count(&self) -> usize {
        self.connections.read().len()
    }

    /// Deliver a serialized envelope to every live connection. Never blocks
    /// on any single client: enqueue is non-blocking by construction.
    pub fn broadcast(&self, message: &str) {
        let targets: Vec<Arc<ClientConnection>> =
            self.connections.read().values().cloned().collect();
        if targets.is_empty() {
            debug!("Broadcast with no active connections");
            return;
        }
        debug!(clients = targets.len(), "Broadcasting message");
        for conn in targets {
            if conn.is_active() {
                conn.enqueue(message.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_reaches_every_registered_client() {
        let manager = ConnectionManager::new();
        let (a, mut rx_a) = ClientConnection::new(Uuid::new_v4(), 8);
        let (b, mut rx_b) = ClientConnection::new(Uuid::new_v4(), 8);
        manager.register(a);
        manager.register(b);

        manager.broadcast("hello");
        assert_eq!(rx_a.try_recv().unwrap(), "hello");
        assert_eq!(rx_b.try_recv().unwrap(), "hello");
    }

    #[test]
    fn slow_client_does_not_block_the_pass() {
        let manager = ConnectionManager::new();
        // Capacity zero: the pathological always-full client.
        let (stuck, _stuck_rx) = ClientConnection::new(Uuid::new_v4(), 0);
        let (healthy, mut healthy_rx) = ClientConnection::new(Uuid::new_v4(), 8);
        manager.register(stuck.clone());
        manager.register(healthy);

        manager.broadcast("payload");
        assert_eq!(healthy_rx.try_recv().unwrap(), "payload");
        assert_eq!(stuck.dropped_count(), 1);
    }

    #[test]
    fn deregistered_client_is_skipped() {
        let manager = ConnectionManager::new();
        let (conn, mut rx) = ClientConnection::new(Uuid::new_v4(), 8);
        manager.register(conn.clone());
        manager.deregister(&conn);
        assert_eq!(manager.count(), 0);

        manager.broadcast("gone");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_connection_is_not_enqueued() {
        let manager = ConnectionManager::new();
        let (conn, mut rx) = ClientConnection::new(Uuid::new_v4(), 8);
        manager.register(conn.clone());
        conn.close(axum::extract::ws::close_code::NORMAL, "bye");

        manager.broadcast("late");
        assert!(rx.try_recv().is_err());
    }
}

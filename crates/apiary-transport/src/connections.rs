//! Registry of authorized client connections.

use dashmap::DashMap;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Outbound frame queue of one connection.
pub type Outbound = mpsc::UnboundedSender<String>;

#[derive(Debug)]
struct Connection {
    session_id: String,
    outbound: Outbound,
}

/// Authorized connections, addressable by the owning session's id.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<Uuid, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, connection_id: Uuid, session_id: impl Into<String>, outbound: Outbound) {
        let session_id = session_id.into();
        debug!(%connection_id, session = %session_id, "Connection registered");
        self.connections.insert(
            connection_id,
            Connection {
                session_id,
                outbound,
            },
        );
    }

    pub fn remove(&self, connection_id: &Uuid) {
        if self.connections.remove(connection_id).is_some() {
            debug!(%connection_id, "Connection removed");
        }
    }

    /// Send a JSON-RPC notification to every connection of `session_id`.
    /// Returns how many connections it was queued on.
    pub fn notify(&self, session_id: &str, method: &str, params: Value) -> usize {
        let frame = notification(method, params);
        self.connections
            .iter()
            .filter(|entry| entry.session_id == session_id)
            .filter(|entry| entry.outbound.send(frame.clone()).is_ok())
            .count()
    }

    /// Send a JSON-RPC notification to every registered connection.
    pub fn broadcast(&self, method: &str, params: Value) -> usize {
        let frame = notification(method, params);
        self.connections
            .iter()
            .filter(|entry| entry.outbound.send(frame.clone()).is_ok())
            .count()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.connections
            .iter()
            .any(|entry| entry.session_id == session_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Forget every connection.
    pub fn clear(&self) {
        self.connections.clear();
    }
}

fn notification(method: &str, params: Value) -> String {
    json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
    })
    .to_string()
}

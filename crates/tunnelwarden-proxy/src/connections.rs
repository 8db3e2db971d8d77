//! Active connection tracking
//!
//! Purely observational: nothing in the forwarding path reads this set to
//! make decisions.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;

/// Concurrent set of connections currently being forwarded.
///
/// Cloning is cheap and every clone observes the same set.
#[derive(Clone, Default)]
pub struct ActiveConnections {
    connections: Arc<DashMap<String, DateTime<Utc>>>,
}

impl ActiveConnections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identifier for a connection from `peer` forwarded to `target`
    pub fn connection_id(peer: &SocketAddr, target: &str) -> String {
        format!("{}->{}", peer, target)
    }

    /// Register a connection, returning its identifier
    pub fn insert(&self, peer: &SocketAddr, target: &str) -> String {
        let id = Self::connection_id(peer, target);
        self.connections.insert(id.clone(), Utc::now());
        id
    }

    pub fn remove(&self, connection_id: &str) {
        self.connections.remove(connection_id);
    }

    pub fn contains(&self, connection_id: &str) -> bool {
        self.connections.contains_key(connection_id)
    }

    /// When the connection was accepted, if it is still active
    pub fn connected_at(&self, connection_id: &str) -> Option<DateTime<Utc>> {
        self.connections.get(connection_id).map(|entry| *entry)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

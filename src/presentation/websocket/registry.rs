//! Connection Registry
//!
//! Tracks live connections per user and room membership for broadcast.
//! All maps are concurrency-safe; no lock is held across an await point
//! because senders are unbounded channels.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::events::{Outbound, ServerEvent};
use crate::infrastructure::metrics::CONNECTIONS_ACTIVE;

/// A registered connection with its outbound channel.
pub struct LiveConnection {
    pub connection_id: String,
    pub user_id: i64,
    pub tenant_id: i64,
    pub sender: mpsc::UnboundedSender<Outbound>,
}

/// Registry of live connections, user mappings, and rooms.
pub struct ConnectionRegistry {
    /// Active connections by connection id
    connections: DashMap<String, Arc<LiveConnection>>,
    /// User id to connection ids, oldest first
    user_connections: DashMap<i64, Vec<String>>,
    /// Room name to connection ids
    rooms: DashMap<String, Vec<String>>,
    /// Soft cap on concurrent connections per user
    max_connections_per_user: usize,
}

impl ConnectionRegistry {
    pub fn new(max_connections_per_user: usize) -> Self {
        Self {
            connections: DashMap::new(),
            user_connections: DashMap::new(),
            rooms: DashMap::new(),
            max_connections_per_user,
        }
    }

    /// Register a connection and join its personal room.
    ///
    /// When the per-user cap is exceeded the oldest connection is closed
    /// and unregistered, so one user cannot hold sockets without bound.
    pub fn register(&self, connection: LiveConnection) {
        let user_id = connection.user_id;
        let connection_id = connection.connection_id.clone();

        let evict = {
            let mut ids = self.user_connections.entry(user_id).or_default();
            ids.push(connection_id.clone());
            if ids.len() > self.max_connections_per_user {
                Some(ids.remove(0))
            } else {
                None
            }
        };

        self.connections
            .insert(connection_id.clone(), Arc::new(connection));
        self.join_room(&connection_id, &super::events::user_room(user_id));
        CONNECTIONS_ACTIVE.inc();

        if let Some(oldest) = evict {
            tracing::warn!(
                user_id,
                evicted = %oldest,
                cap = self.max_connections_per_user,
                "Connection cap exceeded, closing oldest connection"
            );
            if let Some(conn) = self.connections.get(&oldest) {
                let _ = conn.sender.send(Outbound::Close);
            }
            self.unregister(&oldest);
        }

        tracing::info!(user_id, connection_id = %connection_id, "Connection registered");
    }

    /// Remove a connection from every map. Empty user entries and rooms
    /// are dropped so the maps do not grow with connection churn.
    pub fn unregister(&self, connection_id: &str) {
        let Some((_, connection)) = self.connections.remove(connection_id) else {
            return;
        };
        CONNECTIONS_ACTIVE.dec();

        if let Some(mut ids) = self.user_connections.get_mut(&connection.user_id) {
            ids.retain(|id| id != connection_id);
        }
        // Emptiness is re-checked under the shard lock so a registration
        // landing in between is never wiped.
        self.user_connections
            .remove_if(&connection.user_id, |_, ids| ids.is_empty());

        self.rooms.retain(|_, members| {
            members.retain(|id| id != connection_id);
            !members.is_empty()
        });

        tracing::info!(
            user_id = connection.user_id,
            connection_id,
            "Connection unregistered"
        );
    }

    pub fn get(&self, connection_id: &str) -> Option<Arc<LiveConnection>> {
        self.connections.get(connection_id).map(|c| c.clone())
    }

    pub fn join_room(&self, connection_id: &str, room: &str) {
        let mut members = self.rooms.entry(room.to_string()).or_default();
        if !members.iter().any(|id| id == connection_id) {
            members.push(connection_id.to_string());
        }
    }

    pub fn leave_room(&self, connection_id: &str, room: &str) {
        if let Some(mut members) = self.rooms.get_mut(room) {
            members.retain(|id| id != connection_id);
        }
        self.rooms.remove_if(room, |_, members| members.is_empty());
    }

    /// Join all live connections of a user into a room (participant added
    /// while online).
    pub fn force_join_user(&self, user_id: i64, room: &str) {
        let ids = self
            .user_connections
            .get(&user_id)
            .map(|ids| ids.clone())
            .unwrap_or_default();
        for connection_id in ids {
            self.join_room(&connection_id, room);
        }
    }

    /// Remove all live connections of a user from a room (participant
    /// removed while online).
    pub fn force_leave_user(&self, user_id: i64, room: &str) {
        let ids = self
            .user_connections
            .get(&user_id)
            .map(|ids| ids.clone())
            .unwrap_or_default();
        for connection_id in ids {
            self.leave_room(&connection_id, room);
        }
    }

    /// Broadcast an event to every connection in a room. Send failures mean
    /// the connection is tearing down; its cleanup removes it from rooms.
    pub fn broadcast(&self, room: &str, event: &ServerEvent) {
        let members = self
            .rooms
            .get(room)
            .map(|m| m.clone())
            .unwrap_or_default();
        for connection_id in members {
            if let Some(connection) = self.connections.get(&connection_id) {
                let _ = connection.sender.send(Outbound::Event(event.clone()));
            }
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn user_connection_count(&self, user_id: i64) -> usize {
        self.user_connections
            .get(&user_id)
            .map(|ids| ids.len())
            .unwrap_or(0)
    }

    pub fn room_size(&self, room: &str) -> usize {
        self.rooms.get(room).map(|m| m.len()).unwrap_or(0)
    }
}

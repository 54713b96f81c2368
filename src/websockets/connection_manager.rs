use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use super::messages::Outbound;

/// Identifies one connection of a player, so a stale session cannot
/// unregister the connection that replaced it
pub type ConnectionId = u64;

#[async_trait]
pub trait ConnectionManager: Send + Sync {
    /// Registers the player's outbound channel, replacing any previous one
    async fn add_connection(
        &self,
        player_id: Uuid,
        sender: mpsc::UnboundedSender<Outbound>,
    ) -> ConnectionId;

    /// Unregisters the player if `connection_id` is still the current connection
    async fn remove_connection(&self, player_id: Uuid, connection_id: ConnectionId) -> bool;

    /// Sends to every registered player except `from`; returns how many were reached
    async fn send_to_others(&self, from: Uuid, message: &str) -> usize;

    /// Asks every connection to close and forgets them
    async fn close_all(&self, code: u16, reason: &str);

    async fn connection_count(&self) -> usize;
}

pub struct InMemoryConnectionManager {
    // player_id -> (connection id, sender)
    connections: Arc<RwLock<HashMap<Uuid, (ConnectionId, mpsc::UnboundedSender<Outbound>)>>>,
    next_id: AtomicU64,
}

impl Default for InMemoryConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl ConnectionManager for InMemoryConnectionManager {
    async fn add_connection(
        &self,
        player_id: Uuid,
        sender: mpsc::UnboundedSender<Outbound>,
    ) -> ConnectionId {
        let connection_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut connections = self.connections.write().await;
        // Dropping the previous sender ends the older session
        connections.insert(player_id, (connection_id, sender));
        connection_id
    }

    async fn remove_connection(&self, player_id: Uuid, connection_id: ConnectionId) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get(&player_id) {
            Some((current, _)) if *current == connection_id => {
                connections.remove(&player_id);
                true
            }
            _ => false,
        }
    }

    async fn send_to_others(&self, from: Uuid, message: &str) -> usize {
        let connections = self.connections.read().await;
        connections
            .iter()
            .filter(|(player_id, _)| **player_id != from)
            .filter(|(_, (_, sender))| sender.send(Outbound::Text(message.to_string())).is_ok())
            .count()
    }

    async fn close_all(&self, code: u16, reason: &str) {
        let mut connections = self.connections.write().await;
        for (_, (_, sender)) in connections.drain() {
            let _ = sender.send(Outbound::Close {
                code,
                reason: reason.to_string(),
            });
        }
    }

    async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

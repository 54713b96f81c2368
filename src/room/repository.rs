use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::cleanup_task::{run_cleanup_task, CleanupConfig};
use super::models::{RoomModel, RoomStats};
use crate::metrics::Metrics;
use crate::websockets::{
    messages::CLOSE_GOING_AWAY, run_session, ConnectionManager, InMemoryConnectionManager,
    SocketWrapper,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoomError {
    #[error("room already exists")]
    RoomExists,

    #[error("too many rooms")]
    TooManyRooms,

    #[error("room directory failure: {0}")]
    Internal(String),
}

/// Owner of every active room. Implementations must be safe to call from many
/// gateway tasks at once; callers do no locking of their own.
#[async_trait]
pub trait RoomDirectory {
    async fn create_room(&self, name: &str, password: &str) -> Result<RoomModel, RoomError>;
    async fn find_room(&self, name: &str) -> Option<RoomModel>;
    async fn find_room_by_id(&self, room_id: &str) -> Option<RoomModel>;
    async fn stats(&self) -> RoomStats;

    /// Runs one player's session in the room. Returns when the client goes away.
    async fn handle_conn(
        &self,
        room_id: &str,
        player_id: Uuid,
        nickname: String,
        socket: Box<dyn SocketWrapper>,
    );

    /// Background housekeeping, until `cancel` fires
    async fn run(&self, cancel: CancellationToken) -> Result<(), RoomError>;
}

struct RoomEntry {
    model: RoomModel,
    connections: Arc<dyn ConnectionManager>,
    clients: usize,
    idle_since: Option<Instant>,
}

#[derive(Default)]
struct RoomTable {
    by_id: HashMap<String, RoomEntry>,
    ids_by_name: HashMap<String, String>,
}

/// A session's place in a room, given up on drop
struct Membership<'a> {
    directory: &'a InMemoryRoomDirectory,
    room_id: &'a str,
}

impl Drop for Membership<'_> {
    fn drop(&mut self) {
        self.directory.leave(self.room_id);
    }
}

/// In-memory implementation of RoomDirectory
pub struct InMemoryRoomDirectory {
    rooms: Mutex<RoomTable>,
    max_rooms: usize,
    metrics: Arc<Metrics>,
    cleanup: CleanupConfig,
}

impl InMemoryRoomDirectory {
    pub fn new(max_rooms: usize, metrics: Arc<Metrics>) -> Self {
        Self::with_cleanup(max_rooms, metrics, CleanupConfig::default())
    }

    pub fn with_cleanup(max_rooms: usize, metrics: Arc<Metrics>, cleanup: CleanupConfig) -> Self {
        Self {
            rooms: Mutex::new(RoomTable::default()),
            max_rooms,
            metrics,
            cleanup,
        }
    }

    fn table(&self) -> MutexGuard<'_, RoomTable> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a session with the room and returns its connection manager
    fn join(&self, room_id: &str) -> Option<Arc<dyn ConnectionManager>> {
        let mut table = self.table();
        let entry = table.by_id.get_mut(room_id)?;
        entry.clients += 1;
        entry.idle_since = None;
        self.metrics.clients.inc();
        Some(Arc::clone(&entry.connections))
    }

    fn leave(&self, room_id: &str) {
        let mut table = self.table();
        self.metrics.clients.dec();
        if let Some(entry) = table.by_id.get_mut(room_id) {
            entry.clients = entry.clients.saturating_sub(1);
            if entry.clients == 0 {
                entry.idle_since = Some(Instant::now());
            }
        }
    }

    /// Removes rooms that have had no clients for at least `threshold`.
    /// Returns the IDs of the removed rooms.
    pub fn prune_idle_rooms(&self, threshold: Duration) -> Vec<String> {
        let mut table = self.table();
        let now = Instant::now();

        let idle: Vec<String> = table
            .by_id
            .iter()
            .filter(|(_, entry)| {
                entry.clients == 0
                    && entry
                        .idle_since
                        .is_some_and(|since| now.duration_since(since) >= threshold)
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &idle {
            if let Some(entry) = table.by_id.remove(id) {
                table.ids_by_name.remove(&entry.model.name);
                debug!(room_id = %id, room_name = %entry.model.name, "Pruned idle room");
            }
        }

        self.metrics.rooms.set(table.by_id.len() as i64);
        idle
    }

    /// Asks every live session in every room to close
    pub async fn close_all_sessions(&self) {
        let managers: Vec<Arc<dyn ConnectionManager>> = self
            .table()
            .by_id
            .values()
            .map(|entry| Arc::clone(&entry.connections))
            .collect();

        for connections in managers {
            connections
                .close_all(CLOSE_GOING_AWAY, "server shutting down")
                .await;
        }
    }
}

#[async_trait]
impl RoomDirectory for InMemoryRoomDirectory {
    #[instrument(skip(self, password))]
    async fn create_room(&self, name: &str, password: &str) -> Result<RoomModel, RoomError> {
        let mut table = self.table();

        if table.ids_by_name.contains_key(name) {
            debug!(room_name = %name, "Room name already taken");
            return Err(RoomError::RoomExists);
        }
        if table.by_id.len() >= self.max_rooms {
            warn!(max_rooms = self.max_rooms, "Room limit reached");
            return Err(RoomError::TooManyRooms);
        }

        let model = RoomModel::new(name.to_string(), password.to_string());
        table.ids_by_name.insert(model.name.clone(), model.id.clone());
        table.by_id.insert(
            model.id.clone(),
            RoomEntry {
                model: model.clone(),
                connections: Arc::new(InMemoryConnectionManager::new()),
                clients: 0,
                idle_since: Some(Instant::now()),
            },
        );
        self.metrics.rooms.set(table.by_id.len() as i64);

        info!(room_id = %model.id, room_name = %model.name, "Room created");
        Ok(model)
    }

    async fn find_room(&self, name: &str) -> Option<RoomModel> {
        let table = self.table();
        let id = table.ids_by_name.get(name)?;
        table.by_id.get(id).map(|entry| entry.model.clone())
    }

    async fn find_room_by_id(&self, room_id: &str) -> Option<RoomModel> {
        self.table()
            .by_id
            .get(room_id)
            .map(|entry| entry.model.clone())
    }

    async fn stats(&self) -> RoomStats {
        let table = self.table();
        RoomStats {
            rooms: table.by_id.len(),
            clients: table.by_id.values().map(|entry| entry.clients).sum(),
        }
    }

    #[instrument(skip(self, nickname, socket))]
    async fn handle_conn(
        &self,
        room_id: &str,
        player_id: Uuid,
        nickname: String,
        mut socket: Box<dyn SocketWrapper>,
    ) {
        let Some(connections) = self.join(room_id) else {
            warn!(room_id = %room_id, "Room vanished before the session started");
            if let Err(e) = socket.close(CLOSE_GOING_AWAY, "Room not found.").await {
                debug!(room_id = %room_id, error = %e, "Failed to send close frame");
            }
            return;
        };
        // Leaves the room even if the session unwinds
        let _membership = Membership {
            directory: self,
            room_id,
        };

        run_session(
            room_id,
            player_id,
            nickname,
            socket,
            connections,
            Arc::clone(&self.metrics),
        )
        .await;
    }

    async fn run(&self, cancel: CancellationToken) -> Result<(), RoomError> {
        run_cleanup_task(self, &self.cleanup, cancel).await;
        self.close_all_sessions().await;
        Ok(())
    }
}

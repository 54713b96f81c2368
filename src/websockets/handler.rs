use async_trait::async_trait;
use axum::{
    extract::{
        rejection::QueryRejection,
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures::FutureExt;
use serde::Deserialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::connection_manager::ConnectionManager;
use super::messages::RelayMessage;
use super::socket::{Connection, MessageHandler, SocketWrapper};
use super::upgrade;
use crate::metrics::Metrics;
use crate::shared::{AppError, AppState};

const MAX_NICKNAME_CHARS: usize = 16;

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketQuery {
    pub room_id: String,
    pub player_id: Uuid,
    pub nickname: String,
}

impl WebSocketQuery {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.room_id.is_empty() {
            return Err("Room ID cannot be empty.");
        }
        if self.player_id.is_nil() {
            return Err("Player ID cannot be empty.");
        }
        if self.nickname.is_empty() {
            return Err("Nickname cannot be empty.");
        }
        if self.nickname.chars().count() > MAX_NICKNAME_CHARS {
            return Err("Nickname too long.");
        }
        Ok(())
    }
}

/// WebSocket upgrade handler
///
/// GET /api/ws?roomId=X&playerId=Y&nickname=Z
/// Validates the query and the room, then upgrades and hands the socket to the room.
/// The session is tracked by the task group rather than run inline.
#[instrument(name = "websocket_handler", skip_all)]
pub async fn websocket_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<WebSocketQuery>, QueryRejection>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, AppError> {
    let Query(query) = query.map_err(|rejection| {
        debug!(error = %rejection, "Malformed WebSocket query");
        AppError::BadRequest(rejection.body_text())
    })?;
    query
        .validate()
        .map_err(|msg| AppError::BadRequest(msg.to_string()))?;

    let room = state
        .room_directory
        .find_room_by_id(&query.room_id)
        .await
        .ok_or_else(|| {
            warn!(room_id = %query.room_id, "Room not found, rejecting WebSocket connection");
            AppError::NotFound("Room not found.".to_string())
        })?;

    let ws = match state.upgrader.accept(ws, &headers) {
        Ok(ws) => ws,
        Err(e) => {
            warn!(room_id = %room.id, error = %e, "WebSocket handshake refused");
            return Ok(e.into_response());
        }
    };

    info!(
        room_id = %room.id,
        player_id = %query.player_id,
        nickname = %query.nickname,
        "Room verified, establishing WebSocket connection"
    );

    let directory = Arc::clone(&state.room_directory);
    let WebSocketQuery {
        player_id,
        nickname,
        ..
    } = query;

    Ok(upgrade::hand_off(ws, state.tasks.track(), move |socket| async move {
        directory
            .handle_conn(&room.id, player_id, nickname, Box::new(socket))
            .await;
    }))
}

/// Relays every message a player sends to the rest of the room
pub struct RoomRelay {
    nickname: String,
    connections: Arc<dyn ConnectionManager>,
    metrics: Arc<Metrics>,
}

impl RoomRelay {
    pub fn new(
        nickname: String,
        connections: Arc<dyn ConnectionManager>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            nickname,
            connections,
            metrics,
        }
    }
}

#[async_trait]
impl MessageHandler for RoomRelay {
    async fn handle_message(&self, player_id: Uuid, room_id: &str, message: String) {
        self.metrics.received.inc();

        let envelope = RelayMessage {
            player_id,
            nickname: self.nickname.clone(),
            payload: message,
        };
        let json = match serde_json::to_string(&envelope) {
            Ok(json) => json,
            Err(e) => {
                warn!(room_id = %room_id, error = %e, "Failed to encode relay message");
                return;
            }
        };

        let delivered = self.connections.send_to_others(player_id, &json).await;
        self.metrics.sent.inc_by(delivered as u64);
        debug!(room_id = %room_id, player_id = %player_id, delivered, "Relayed message");
    }
}

/// Runs one player's session until either side goes away
pub async fn run_session(
    room_id: &str,
    player_id: Uuid,
    nickname: String,
    socket: Box<dyn SocketWrapper>,
    connections: Arc<dyn ConnectionManager>,
    metrics: Arc<Metrics>,
) {
    info!(room_id = %room_id, player_id = %player_id, "WebSocket connection established");

    // Create the outbound channel (room -> client)
    let (outbound_sender, outbound_receiver) = mpsc::unbounded_channel();
    let connection_id = connections
        .add_connection(player_id, outbound_sender)
        .await;

    let message_handler = Arc::new(RoomRelay::new(nickname, Arc::clone(&connections), metrics));
    let connection = Connection::new(
        player_id,
        room_id.to_string(),
        socket,
        outbound_receiver,
        message_handler,
    );

    let outcome = AssertUnwindSafe(connection.run()).catch_unwind().await;

    connections
        .remove_connection(player_id, connection_id)
        .await;

    match outcome {
        Ok(Ok(())) => {
            info!(room_id = %room_id, player_id = %player_id, "WebSocket connection closed cleanly");
        }
        Ok(Err(e)) => {
            warn!(room_id = %room_id, player_id = %player_id, error = %e, "WebSocket connection error");
        }
        // Unregistered above; the caller decides what a panic means
        Err(panic) => panic::resume_unwind(panic),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn query(room_id: &str, player_id: Uuid, nickname: &str) -> WebSocketQuery {
        WebSocketQuery {
            room_id: room_id.to_string(),
            player_id,
            nickname: nickname.to_string(),
        }
    }

    #[rstest]
    #[case("", Uuid::new_v4(), "ana", "Room ID cannot be empty.")]
    #[case("room", Uuid::nil(), "ana", "Player ID cannot be empty.")]
    #[case("room", Uuid::new_v4(), "", "Nickname cannot be empty.")]
    #[case("room", Uuid::new_v4(), "a-nickname-far-too-long", "Nickname too long.")]
    fn test_invalid_queries(
        #[case] room_id: &str,
        #[case] player_id: Uuid,
        #[case] nickname: &str,
        #[case] message: &str,
    ) {
        assert_eq!(query(room_id, player_id, nickname).validate(), Err(message));
    }

    #[test]
    fn test_valid_query() {
        assert!(query("room", Uuid::new_v4(), "ana").validate().is_ok());
    }
}

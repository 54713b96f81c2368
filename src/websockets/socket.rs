use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::StreamExt;
use std::borrow::Cow;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::messages::{Outbound, CLOSE_NORMAL};

/// Simple WebSocket abstraction - all we care about is send/receive
#[async_trait]
pub trait SocketWrapper: Send {
    /// Send a text message to the client
    async fn send_message(&mut self, message: String) -> Result<(), SocketError>;

    /// Receive the next text message from the client (None if connection closed)
    async fn receive_message(&mut self) -> Result<Option<String>, SocketError>;

    /// Close the connection with the given close code and reason
    async fn close(&mut self, code: u16, reason: &str) -> Result<(), SocketError>;
}

/// Handler for incoming WebSocket messages
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle an incoming message from the client
    async fn handle_message(&self, player_id: Uuid, room_id: &str, message: String);
}

#[derive(Error, Debug)]
pub enum SocketError {
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("receive failed: {0}")]
    ReceiveFailed(String),
}

/// Direct implementation on axum's WebSocket
#[async_trait]
impl SocketWrapper for WebSocket {
    async fn send_message(&mut self, message: String) -> Result<(), SocketError> {
        self.send(Message::Text(message))
            .await
            .map_err(|e| SocketError::SendFailed(e.to_string()))
    }

    async fn receive_message(&mut self) -> Result<Option<String>, SocketError> {
        loop {
            match self.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // Binary, ping and pong carry nothing for the room
                Some(Err(e)) => return Err(SocketError::ReceiveFailed(e.to_string())),
            }
        }
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), SocketError> {
        self.send(Message::Close(Some(CloseFrame {
            code,
            reason: Cow::Owned(reason.to_string()),
        })))
        .await
        .map_err(|e| SocketError::SendFailed(e.to_string()))
    }
}

/// Connection represents a managed WebSocket connection
/// It is used to send and receive messages to and from the client
/// The outbound receiver is fed by the room's ConnectionManager
pub struct Connection {
    pub player_id: Uuid,
    pub room_id: String,
    socket: Box<dyn SocketWrapper>,
    outbound_receiver: mpsc::UnboundedReceiver<Outbound>,
    message_handler: Arc<dyn MessageHandler>,
}

impl Connection {
    pub fn new(
        player_id: Uuid,
        room_id: String,
        socket: Box<dyn SocketWrapper>,
        outbound_receiver: mpsc::UnboundedReceiver<Outbound>,
        message_handler: Arc<dyn MessageHandler>,
    ) -> Self {
        Self {
            player_id,
            room_id,
            socket,
            outbound_receiver,
            message_handler,
        }
    }

    /// Run the connection - handles both sending and receiving until disconnect
    pub async fn run(mut self) -> Result<(), SocketError> {
        let (code, reason) = loop {
            tokio::select! {
                // Handle outbound messages (from the room to the client)
                msg = self.outbound_receiver.recv() => {
                    match msg {
                        Some(Outbound::Text(message)) => {
                            self.socket.send_message(message).await?
                        }
                        Some(Outbound::Close { code, reason }) => break (code, reason),
                        // Dropped by the room, e.g. replaced by a newer connection
                        None => break (CLOSE_NORMAL, String::new()),
                    }
                }

                // Handle inbound messages (from the client to the room)
                msg = self.socket.receive_message() => {
                    match msg {
                        Ok(Some(message)) => {
                            self.message_handler
                                .handle_message(self.player_id, &self.room_id, message)
                                .await;
                        }
                        Ok(None) => return Ok(()), // Client disconnected
                        Err(e) => return Err(e),
                    }
                }
            }
        };

        if let Err(e) = self.socket.close(code, &reason).await {
            debug!(room_id = %self.room_id, player_id = %self.player_id, error = %e, "Failed to send close frame");
        }
        Ok(())
    }
}

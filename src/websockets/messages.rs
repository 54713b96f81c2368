use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Sent right after the handshake when the client runs another protocol version
pub const CLOSE_VERSION_MISMATCH: u16 = 4418;

/// What the room sends down a player's outbound channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

/// Envelope used when relaying one player's message to the rest of the room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayMessage {
    pub player_id: Uuid,
    pub nickname: String,
    pub payload: String,
}

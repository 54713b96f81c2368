use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const MAX_ROOM_NAME_CHARS: usize = 20;

/// Request payload for creating or looking up a room
///
/// Missing fields decode to their empty values so the validity check reports them.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoomRequest {
    pub create: bool,
    pub room_name: String,
    pub room_pass: String,
}

impl RoomRequest {
    /// Returns the user-facing reason when the request is not acceptable
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.room_name.is_empty() {
            return Err("Room name cannot be empty.");
        }
        if self.room_name.chars().count() > MAX_ROOM_NAME_CHARS {
            return Err("Room name too long.");
        }
        if self.room_name.chars().any(char::is_control) {
            return Err("Room name contains invalid characters.");
        }
        if self.room_pass.is_empty() {
            return Err("Password cannot be empty.");
        }
        Ok(())
    }
}

/// Response for room creation and lookup. Exactly one field is set.
#[derive(Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RoomResponse {
    pub fn success(id: String) -> Self {
        Self {
            id: Some(id),
            error: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ExistsQuery {
    #[serde(rename = "roomId")]
    pub room_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TimeResponse {
    pub time: DateTime<Utc>,
}

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A room as the directory stores it
#[derive(Debug, Clone)]
pub struct RoomModel {
    pub id: String,       // Random UUID, assigned at creation
    pub name: String,     // Unique among active rooms
    pub password: String, // Compared as plain text
}

impl RoomModel {
    /// Creates a new room model with a generated ID
    pub fn new(name: String, password: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            password,
        }
    }

    pub fn password_matches(&self, password: &str) -> bool {
        self.password == password
    }
}

/// Point-in-time aggregate counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomStats {
    pub rooms: usize,
    pub clients: usize,
}

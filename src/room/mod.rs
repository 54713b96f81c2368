// Public API - what other modules can use
pub use handlers::{get_stats, room_exists, room_request, ROOM_LOOKUP_FAILED};
pub use models::{RoomModel, RoomStats};
pub use repository::{InMemoryRoomDirectory, RoomDirectory, RoomError};

// Internal modules
pub mod cleanup_task;
mod handlers;
pub mod models;
pub mod repository;
pub mod types;

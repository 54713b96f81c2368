// Library crate for the codies game server gateway
// This file exposes the public API for the binary and integration tests

pub mod config;
pub mod metrics;
pub mod room;
pub mod router;
pub mod shared;
pub mod supervisor;
pub mod version;
pub mod version_gate;
pub mod websockets;

// Re-export commonly used types for easier access in tests
pub use config::{Config, ConfigError, Mode};
pub use metrics::Metrics;
pub use room::{InMemoryRoomDirectory, RoomDirectory, RoomError, RoomModel, RoomStats};
pub use router::{create_router, RouterOptions};
pub use shared::{AppError, AppState};
pub use supervisor::{Listener, SupervisorError, TaskGroup};
pub use websockets::{ConnectionManager, MessageHandler, SocketWrapper, Upgrader};

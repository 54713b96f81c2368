// Public API
pub use connection_manager::{ConnectionId, ConnectionManager, InMemoryConnectionManager};
pub use handler::{run_session, websocket_handler, RoomRelay, WebSocketQuery};
pub use messages::{Outbound, RelayMessage};
pub use socket::{Connection, MessageHandler, SocketError, SocketWrapper};
pub use upgrade::{HandshakeError, Upgrader};

// Internal modules
mod connection_manager;
mod handler;
pub mod messages;
mod socket;
pub mod upgrade;

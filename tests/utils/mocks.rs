use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

use codies::websockets::{SocketError, SocketWrapper};

// ============================================================================
// Mock Infrastructure
// ============================================================================

/// In-process stand-in for a client's WebSocket
pub struct MockSocket {
    inbound: mpsc::UnboundedReceiver<String>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<Mutex<Option<(u16, String)>>>,
}

/// The test's end of a [`MockSocket`]. Dropping it disconnects the client.
pub struct MockSocketHandle {
    inbound: mpsc::UnboundedSender<String>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<Mutex<Option<(u16, String)>>>,
}

impl MockSocket {
    pub fn pair() -> (Box<dyn SocketWrapper>, MockSocketHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(Mutex::new(None));

        let socket = MockSocket {
            inbound: rx,
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        };
        let handle = MockSocketHandle {
            inbound: tx,
            sent,
            closed,
        };
        (Box::new(socket), handle)
    }
}

#[async_trait]
impl SocketWrapper for MockSocket {
    async fn send_message(&mut self, message: String) -> Result<(), SocketError> {
        self.sent.lock().await.push(message);
        Ok(())
    }

    async fn receive_message(&mut self) -> Result<Option<String>, SocketError> {
        Ok(self.inbound.recv().await)
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), SocketError> {
        *self.closed.lock().await = Some((code, reason.to_string()));
        Ok(())
    }
}

impl MockSocketHandle {
    /// Sends a text frame as the client
    pub fn send(&self, message: &str) {
        let _ = self.inbound.send(message.to_string());
    }

    pub async fn sent_messages(&self) -> Vec<String> {
        self.sent.lock().await.clone()
    }

    pub async fn close_frame(&self) -> Option<(u16, String)> {
        self.closed.lock().await.clone()
    }

    /// Polls until the server has sent `count` messages to this client
    pub async fn wait_for_messages(&self, count: usize) -> Vec<String> {
        for _ in 0..100 {
            let sent = self.sent_messages().await;
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.sent_messages().await
    }
}

/// A socket whose read path hits a bug as soon as the session starts
pub struct PanickingSocket;

#[async_trait]
impl SocketWrapper for PanickingSocket {
    async fn send_message(&mut self, _message: String) -> Result<(), SocketError> {
        Ok(())
    }

    async fn receive_message(&mut self) -> Result<Option<String>, SocketError> {
        panic!("socket read bug")
    }

    async fn close(&mut self, _code: u16, _reason: &str) -> Result<(), SocketError> {
        Ok(())
    }
}

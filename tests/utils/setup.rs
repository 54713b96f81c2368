use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use codies::{
    create_router,
    room::{InMemoryRoomDirectory, RoomDirectory, RoomModel},
    supervisor::{Listener, SupervisorError},
    AppState, Metrics, RouterOptions, TaskGroup, Upgrader,
};

pub const TEST_VERSION: &str = "integration-version";

// ============================================================================
// Test Setup Infrastructure
// ============================================================================

/// A gateway serving on a real loopback listener
pub struct TestServer {
    pub addr: SocketAddr,
    pub tasks: TaskGroup,
    pub directory: Arc<InMemoryRoomDirectory>,
    pub metrics: Arc<Metrics>,
}

pub struct TestServerBuilder {
    enforce_version: bool,
    max_rooms: usize,
    run_directory: bool,
}

impl TestServerBuilder {
    pub fn new() -> Self {
        Self {
            enforce_version: true,
            max_rooms: 100,
            run_directory: true,
        }
    }

    /// Debug mode: no version gate
    pub fn without_version_gate(mut self) -> Self {
        self.enforce_version = false;
        self
    }

    /// Leaves the directory's background task out, so nothing closes sessions on shutdown
    pub fn without_directory_task(mut self) -> Self {
        self.run_directory = false;
        self
    }

    pub async fn build(self) -> TestServer {
        let metrics = Arc::new(Metrics::new().unwrap());
        let directory = Arc::new(InMemoryRoomDirectory::new(
            self.max_rooms,
            Arc::clone(&metrics),
        ));
        let tasks = TaskGroup::new(CancellationToken::new());

        if self.run_directory {
            let directory = Arc::clone(&directory);
            let cancel = tasks.cancellation_token();
            tasks.spawn("rooms", async move {
                directory
                    .run(cancel)
                    .await
                    .map_err(|e| SupervisorError::Task {
                        task: "rooms",
                        message: e.to_string(),
                    })
            });
        }

        let state = AppState::new(
            directory.clone(),
            Arc::clone(&metrics),
            Upgrader::insecure(),
            tasks.clone(),
            TEST_VERSION,
        );
        let router = create_router(
            state,
            RouterOptions {
                static_dir: PathBuf::from("./does-not-exist"),
                enforce_version: self.enforce_version,
            },
        );

        let listener = Listener::bind("gateway", "127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        tasks.serve(listener, router);

        TestServer {
            addr,
            tasks,
            directory,
            metrics,
        }
    }
}

impl TestServer {
    pub async fn create_room(&self, name: &str) -> RoomModel {
        self.directory.create_room(name, "secret").await.unwrap()
    }

    pub fn ws_url(&self, room_id: &str, player_id: Uuid, nickname: &str, version: &str) -> String {
        format!(
            "ws://{}/api/ws?roomId={room_id}&playerId={player_id}&nickname={nickname}&codiesVersion={version}",
            self.addr
        )
    }

    /// Polls the directory until `count` clients are connected
    pub async fn wait_for_clients(&self, count: usize) {
        for _ in 0..200 {
            if self.directory.stats().await.clients == count {
                // Let the session finish registering its outbound channel
                tokio::time::sleep(Duration::from_millis(50)).await;
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {count} connected clients");
    }

    pub fn shutdown(&self) {
        self.tasks.cancellation_token().cancel();
    }
}

use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::repository::InMemoryRoomDirectory;

/// Configuration for the cleanup task
#[derive(Debug, Clone)]
pub struct CleanupConfig {
    /// How often to run the cleanup task
    pub cleanup_interval: Duration,
    /// How long a room must have no clients before deletion
    pub inactivity_threshold: Duration,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(60),
            inactivity_threshold: Duration::from_secs(10 * 60),
        }
    }
}

/// Periodically removes rooms nobody is connected to, until `cancel` fires
#[instrument(skip_all)]
pub async fn run_cleanup_task(
    directory: &InMemoryRoomDirectory,
    config: &CleanupConfig,
    cancel: CancellationToken,
) {
    info!(
        cleanup_interval_secs = config.cleanup_interval.as_secs(),
        inactivity_threshold_secs = config.inactivity_threshold.as_secs(),
        "Starting room cleanup background task"
    );

    let mut cleanup_interval = interval(config.cleanup_interval);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = cleanup_interval.tick() => {
                let pruned = directory.prune_idle_rooms(config.inactivity_threshold);
                if pruned.is_empty() {
                    debug!("No idle rooms to clean up");
                } else {
                    info!(deleted_count = pruned.len(), "Room cleanup completed");
                }
            }
        }
    }

    info!("Room cleanup task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use crate::room::repository::RoomDirectory;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_cleanup_removes_idle_rooms_until_cancelled() {
        let directory = Arc::new(InMemoryRoomDirectory::with_cleanup(
            10,
            Arc::new(Metrics::new().unwrap()),
            CleanupConfig {
                cleanup_interval: Duration::from_millis(10),
                inactivity_threshold: Duration::ZERO,
            },
        ));
        directory.create_room("idle", "pw").await.unwrap();

        let cancel = CancellationToken::new();
        let task = {
            let directory = Arc::clone(&directory);
            let cancel = cancel.clone();
            tokio::spawn(async move { directory.run(cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(directory.stats().await.rooms, 0);

        cancel.cancel();
        assert!(task.await.unwrap().is_ok());
    }
}

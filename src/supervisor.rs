//! Task group that owns every listener and long-lived connection of the process.
//!
//! A single [`CancellationToken`] is shared by all supervised tasks. Any task that
//! returns an error (or panics) records the error if it is the first one and fires the
//! token; [`TaskGroup::wait`] then blocks until every task, including upgraded
//! connections tracked through [`TaskGroup::track`], has returned.

use axum::Router;
use futures::FutureExt;
use std::future::{Future, IntoFuture};
use std::io;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::{task_tracker::TaskTrackerToken, TaskTracker};
use tracing::{debug, error, info, warn};

/// How long a listener gets to finish in-flight requests once draining starts
pub const GRACE_PERIOD: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("failed to bind {listener} listener on {addr}: {source}")]
    Bind {
        listener: &'static str,
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("{listener} listener failed: {source}")]
    Serve {
        listener: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("{listener} listener stopped without being asked to")]
    ListenerExited { listener: &'static str },

    #[error("{listener} listener did not drain within {grace:?}")]
    DrainTimeout {
        listener: &'static str,
        grace: Duration,
    },

    #[error("task {0} panicked")]
    Panicked(&'static str),

    #[error("task {task} failed: {message}")]
    Task {
        task: &'static str,
        message: String,
    },
}

/// A TCP listener bound ahead of serving, so bind failures surface before startup
pub struct Listener {
    name: &'static str,
    inner: TcpListener,
}

impl Listener {
    pub async fn bind(name: &'static str, addr: SocketAddr) -> Result<Self, SupervisorError> {
        let inner = TcpListener::bind(addr)
            .await
            .map_err(|source| SupervisorError::Bind {
                listener: name,
                addr,
                source,
            })?;
        Ok(Self { name, inner })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

#[derive(Clone)]
pub struct TaskGroup {
    cancel: CancellationToken,
    tracker: TaskTracker,
    first_error: Arc<Mutex<Option<SupervisorError>>>,
    grace: Duration,
}

impl TaskGroup {
    pub fn new(cancel: CancellationToken) -> Self {
        Self::with_grace_period(cancel, GRACE_PERIOD)
    }

    pub fn with_grace_period(cancel: CancellationToken, grace: Duration) -> Self {
        Self {
            cancel,
            tracker: TaskTracker::new(),
            first_error: Arc::new(Mutex::new(None)),
            grace,
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawns a fallible task. An error or panic cancels the whole group.
    pub fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = Result<(), SupervisorError>> + Send + 'static,
    {
        let group = self.clone();
        self.tracker.spawn(async move {
            match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(())) => debug!(task = name, "Task finished"),
                Ok(Err(e)) => group.fail(e),
                Err(_) => group.fail(SupervisorError::Panicked(name)),
            }
        });
    }

    /// Registers a unit of work that runs outside [`TaskGroup::spawn`]. The group
    /// counts it as running until the returned token is dropped.
    pub fn track(&self) -> TaskTrackerToken {
        self.tracker.token()
    }

    /// Number of tasks and tokens still outstanding
    pub fn len(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }

    fn fail(&self, error: SupervisorError) {
        error!(error = %error, "Supervised task failed");
        let mut slot = self
            .first_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_none() {
            *slot = Some(error);
        }
        drop(slot);
        self.cancel.cancel();
    }

    /// Serves `router` on `listener` until the group is cancelled, then drains it.
    ///
    /// Two tasks are spawned: the accept loop, and a watcher that waits for
    /// cancellation, stops acceptance and gives in-flight requests the grace period
    /// to complete. Upgraded connections are not part of the drain.
    pub fn serve(&self, listener: Listener, router: Router) {
        let Listener { name, inner } = listener;
        let stop = CancellationToken::new();
        let stopped = CancellationToken::new();
        let force = CancellationToken::new();

        {
            let stop = stop.clone();
            let stopped = stopped.clone();
            let force = force.clone();
            self.spawn(name, async move {
                if let Ok(addr) = inner.local_addr() {
                    info!(listener = name, %addr, "Listener serving");
                }

                let server = axum::serve(inner, router)
                    .with_graceful_shutdown(stop.clone().cancelled_owned())
                    .into_future();

                let result = tokio::select! {
                    result = server => match result {
                        Ok(()) if stop.is_cancelled() => Ok(()),
                        Ok(()) => Err(SupervisorError::ListenerExited { listener: name }),
                        Err(source) => Err(SupervisorError::Serve { listener: name, source }),
                    },
                    // Connections still in flight are abandoned with the serve future.
                    () = force.cancelled() => {
                        warn!(listener = name, "Forcing listener closed");
                        Ok(())
                    }
                };

                stopped.cancel();
                result
            });
        }

        let cancel = self.cancel.clone();
        let grace = self.grace;
        self.spawn(name, async move {
            cancel.cancelled().await;
            info!(listener = name, "Draining listener");
            stop.cancel();

            match tokio::time::timeout(grace, stopped.cancelled()).await {
                Ok(()) => {
                    info!(listener = name, "Listener stopped");
                    Ok(())
                }
                Err(_) => {
                    force.cancel();
                    Err(SupervisorError::DrainTimeout {
                        listener: name,
                        grace,
                    })
                }
            }
        });
    }

    /// Waits for every task and token, and returns the first error recorded.
    pub async fn wait(&self) -> Result<(), SupervisorError> {
        self.tracker.close();
        self.tracker.wait().await;

        let first = self
            .first_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Fires `cancel` on SIGINT or SIGTERM. The watcher is not tracked by any group.
pub fn cancel_on_interrupt(cancel: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            () = shutdown_signal() => {
                info!("Interrupt received, shutting down");
                cancel.cancel();
            }
            () = cancel.cancelled() => {}
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

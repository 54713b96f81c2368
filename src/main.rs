use clap::Parser;
use codies::{
    config::{Config, Mode},
    metrics::{metrics_router, Metrics},
    room::{InMemoryRoomDirectory, RoomDirectory},
    router::{create_router, RouterOptions},
    shared::AppState,
    supervisor::{cancel_on_interrupt, Listener, SupervisorError, TaskGroup},
    version,
    websockets::Upgrader,
};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "codies=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::parse();
    let mode = match config.validate() {
        Ok(mode) => mode,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    info!(version = version::version(), ?mode, "Starting codies server");

    match run(config, mode).await {
        Ok(()) => {
            info!("Server stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Server stopped with error");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config, mode: Mode) -> Result<(), SupervisorError> {
    let metrics = Arc::new(Metrics::new().map_err(|e| SupervisorError::Task {
        task: "metrics",
        message: e.to_string(),
    })?);

    let upgrader = match mode {
        Mode::Debug => {
            warn!("Starting in debug mode, allowing any WebSocket origin host");
            Upgrader::insecure()
        }
        Mode::Production => Upgrader::new(config.origins.clone(), false),
    };

    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());
    let tasks = TaskGroup::new(cancel.clone());

    let directory = Arc::new(InMemoryRoomDirectory::new(
        config.max_rooms,
        Arc::clone(&metrics),
    ));
    {
        let directory = Arc::clone(&directory);
        let cancel = cancel.clone();
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
        directory,
        Arc::clone(&metrics),
        upgrader,
        tasks.clone(),
        version::version(),
    );
    let router = create_router(
        state,
        RouterOptions {
            static_dir: config.static_dir.clone(),
            enforce_version: mode == Mode::Production,
        },
    );

    // A bind failure still has to wait for the tasks already started
    match Listener::bind("gateway", config.addr).await {
        Ok(listener) => tasks.serve(listener, router),
        Err(e) => {
            tasks.spawn("gateway", async move { Err(e) });
        }
    }

    if mode == Mode::Production {
        match Listener::bind("metrics", config.metrics_addr).await {
            Ok(listener) => tasks.serve(listener, metrics_router(Arc::clone(&metrics))),
            Err(e) => {
                tasks.spawn("metrics", async move { Err(e) });
            }
        }
    }

    tasks.wait().await
}

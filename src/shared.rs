use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::error;

use crate::metrics::Metrics;
use crate::room::{RoomDirectory, RoomError};
use crate::supervisor::TaskGroup;
use crate::websockets::Upgrader;

/// Shared application state containing all dependencies
#[derive(Clone)]
pub struct AppState {
    pub room_directory: Arc<dyn RoomDirectory + Send + Sync>,
    pub metrics: Arc<Metrics>,
    pub upgrader: Upgrader,
    pub tasks: TaskGroup,
    /// Version clients must declare to reach room routes
    pub version: Arc<str>,
}

impl AppState {
    pub fn new(
        room_directory: Arc<dyn RoomDirectory + Send + Sync>,
        metrics: Arc<Metrics>,
        upgrader: Upgrader,
        tasks: TaskGroup,
        version: &str,
    ) -> Self {
        Self {
            room_directory,
            metrics,
            upgrader,
            tasks,
            version: Arc::from(version),
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Room(#[from] RoomError),

    #[error("Internal server error")]
    Internal,
}

const UNKNOWN_ERROR: &str = "An unknown error occurred.";

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Room(RoomError::RoomExists) => {
                (StatusCode::BAD_REQUEST, "Room already exists.".to_string())
            }
            AppError::Room(RoomError::TooManyRooms) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Too many rooms.".to_string(),
            ),
            AppError::Room(e) => {
                error!(error = %e, "Unexpected room directory error");
                (StatusCode::INTERNAL_SERVER_ERROR, UNKNOWN_ERROR.to_string())
            }
            AppError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, UNKNOWN_ERROR.to_string()),
        };

        let body = Json(json!({
            "error": error_message
        }));

        (status, body).into_response()
    }
}

use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Query, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{debug, info, instrument};

use super::types::{ExistsQuery, RoomRequest, RoomResponse};
use crate::shared::{AppError, AppState};

/// Lookup failures do not say whether the room exists.
pub const ROOM_LOOKUP_FAILED: &str = "Room not found or password does not match.";

/// HTTP handler for the room statistics snapshot
///
/// GET /api/stats
/// Always recomputed from the directory, pretty-printed with four-space indentation
#[instrument(name = "get_stats", skip(state))]
pub async fn get_stats(State(state): State<AppState>) -> Result<Response, AppError> {
    let stats = state.room_directory.stats().await;

    let mut body = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut body, formatter);
    stats.serialize(&mut serializer).map_err(|e| {
        tracing::error!(error = %e, "Failed to encode stats");
        AppError::Internal
    })?;
    body.push(b'\n');

    Ok(([(CONTENT_TYPE, "application/json")], body).into_response())
}

/// HTTP handler probing whether a room ID is live
///
/// GET /api/exists?roomId=ID
/// The answer is carried by the status code alone
#[instrument(name = "room_exists", skip_all)]
pub async fn room_exists(
    State(state): State<AppState>,
    query: Result<Query<ExistsQuery>, QueryRejection>,
) -> Result<(StatusCode, &'static str), AppError> {
    let Query(query) = query.map_err(|rejection| {
        debug!(error = %rejection, "Malformed exists query");
        AppError::BadRequest(rejection.body_text())
    })?;

    let status = match state.room_directory.find_room_by_id(&query.room_id).await {
        Some(_) => StatusCode::OK,
        None => StatusCode::NOT_FOUND,
    };
    Ok((status, "."))
}

/// HTTP handler for creating or looking up a room
///
/// POST /api/room
/// Returns `{"id": ...}` on success and `{"error": ...}` otherwise
#[instrument(name = "room_request", skip_all)]
pub async fn room_request(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<RoomResponse>, AppError> {
    let request: RoomRequest = serde_json::from_slice(&body).map_err(|e| {
        debug!(error = %e, "Malformed room request body");
        AppError::BadRequest("Invalid request body.".to_string())
    })?;

    request
        .validate()
        .map_err(|msg| AppError::BadRequest(msg.to_string()))?;

    let id = if request.create {
        let room = state
            .room_directory
            .create_room(&request.room_name, &request.room_pass)
            .await?;
        info!(room_id = %room.id, room_name = %room.name, "Room created via API");
        room.id
    } else {
        match state.room_directory.find_room(&request.room_name).await {
            Some(room) if room.password_matches(&request.room_pass) => room.id,
            _ => return Err(AppError::NotFound(ROOM_LOOKUP_FAILED.to_string())),
        }
    };

    Ok(Json(RoomResponse::success(id)))
}

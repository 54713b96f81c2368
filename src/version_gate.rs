//! Rejects room requests from clients built against another protocol version.
//!
//! A client declares its version through the `X-CODIES-VERSION` header or the
//! `codiesVersion` query parameter; either one matching exactly is enough. Plain
//! HTTP requests that fail the check get `418` with a reload hint. Upgrade requests
//! are still upgraded and then closed with code 4418, so the client learns about
//! the mismatch on the channel it was trying to open.

use axum::{
    extract::{ws::WebSocketUpgrade, FromRequestParts, Query, Request, State},
    http::{header::UPGRADE, HeaderMap, StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::shared::AppState;
use crate::websockets::{messages::CLOSE_VERSION_MISMATCH, upgrade};

pub const VERSION_HEADER: &str = "x-codies-version";

#[derive(Debug, Deserialize)]
struct VersionQuery {
    #[serde(rename = "codiesVersion")]
    codies_version: Option<String>,
}

/// Whether either carrier declares exactly `want`
pub fn version_matches(headers: &HeaderMap, uri: &Uri, want: &str) -> bool {
    let from_header = headers.get(VERSION_HEADER).and_then(|v| v.to_str().ok());
    if from_header == Some(want) {
        return true;
    }

    Query::<VersionQuery>::try_from_uri(uri)
        .ok()
        .and_then(|Query(query)| query.codies_version)
        .is_some_and(|got| got == want)
}

pub fn mismatch_reason(want: &str) -> String {
    format!("client version too old, please reload to get {want}")
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

pub async fn check_version(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if version_matches(request.headers(), request.uri(), &state.version) {
        return next.run(request).await;
    }

    let reason = mismatch_reason(&state.version);
    debug!(path = %request.uri().path(), "Client version mismatch");

    if !is_websocket_upgrade(request.headers()) {
        return (StatusCode::IM_A_TEAPOT, reason).into_response();
    }

    let (mut parts, _body) = request.into_parts();
    let ws = WebSocketUpgrade::from_request_parts(&mut parts, &state).await;
    match state.upgrader.accept(ws, &parts.headers) {
        Ok(ws) => upgrade::reject_with_close(ws, state.tasks.track(), CLOSE_VERSION_MISMATCH, reason),
        Err(e) => {
            warn!(error = %e, "WebSocket handshake refused");
            e.into_response()
        }
    }
}

use axum::{
    extract::ws::{rejection::WebSocketUpgradeRejection, WebSocket, WebSocketUpgrade},
    http::{
        header::{HOST, ORIGIN, SEC_WEBSOCKET_EXTENSIONS},
        HeaderMap, StatusCode, Uri,
    },
    response::{IntoResponse, Response},
};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::task::task_tracker::TaskTrackerToken;
use tracing::{debug, error, warn};

use super::socket::SocketWrapper;

#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error(transparent)]
    Upgrade(#[from] WebSocketUpgradeRejection),

    #[error("failed to parse Origin header {0:?}")]
    InvalidOrigin(String),

    #[error("request Origin {origin:?} is not authorized for Host {host:?}")]
    ForbiddenOrigin { origin: String, host: String },
}

impl IntoResponse for HandshakeError {
    fn into_response(self) -> Response {
        match self {
            HandshakeError::Upgrade(rejection) => rejection.into_response(),
            HandshakeError::InvalidOrigin(_) => {
                (StatusCode::BAD_REQUEST, self.to_string()).into_response()
            }
            HandshakeError::ForbiddenOrigin { .. } => {
                (StatusCode::FORBIDDEN, self.to_string()).into_response()
            }
        }
    }
}

/// Decides which upgrade requests may become WebSocket sessions.
///
/// Per-message compression is never negotiated: the WebSocket stack underneath
/// has no `permessage-deflate`, so a client's offer is logged and every session
/// runs uncompressed.
#[derive(Debug, Clone)]
pub struct Upgrader {
    origin_patterns: Arc<[String]>,
    insecure_skip_verify: bool,
}

impl Upgrader {
    pub fn new(origin_patterns: Vec<String>, insecure_skip_verify: bool) -> Self {
        Self {
            origin_patterns: origin_patterns
                .into_iter()
                .map(|pattern| pattern.to_ascii_lowercase())
                .collect(),
            insecure_skip_verify,
        }
    }

    /// Accepts any origin, for local development
    pub fn insecure() -> Self {
        Self::new(Vec::new(), true)
    }

    /// Runs the origin policy over an extracted upgrade
    pub fn accept(
        &self,
        ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
        headers: &HeaderMap,
    ) -> Result<WebSocketUpgrade, HandshakeError> {
        let ws = ws?;
        self.authorize_origin(headers)?;

        // The WebSocket stack does not implement permessage-deflate, so an offer is declined
        if let Some(extensions) = headers
            .get(SEC_WEBSOCKET_EXTENSIONS)
            .and_then(|v| v.to_str().ok())
        {
            if extensions.contains("permessage-deflate") {
                debug!(extensions = %extensions, "Client offered compression, continuing uncompressed");
            }
        }

        Ok(ws)
    }

    pub fn authorize_origin(&self, headers: &HeaderMap) -> Result<(), HandshakeError> {
        if self.insecure_skip_verify {
            return Ok(());
        }

        let Some(origin) = headers.get(ORIGIN) else {
            return Ok(());
        };
        let origin = origin.to_str().map_err(|_| {
            HandshakeError::InvalidOrigin(String::from_utf8_lossy(origin.as_bytes()).into_owned())
        })?;

        let origin_host = origin
            .parse::<Uri>()
            .ok()
            .and_then(|uri| uri.authority().map(|a| a.as_str().to_ascii_lowercase()))
            .ok_or_else(|| HandshakeError::InvalidOrigin(origin.to_string()))?;

        let host = headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        if host.eq_ignore_ascii_case(&origin_host)
            || self
                .origin_patterns
                .iter()
                .any(|pattern| wildcard_match(pattern, &origin_host))
        {
            return Ok(());
        }

        Err(HandshakeError::ForbiddenOrigin {
            origin: origin.to_string(),
            host: host.to_string(),
        })
    }
}

/// Completes the handshake and runs `session` on the new socket.
///
/// The session counts against `token` from before the 101 response until it
/// returns. A panic inside the session is logged and goes no further.
pub fn hand_off<F, Fut>(ws: WebSocketUpgrade, token: TaskTrackerToken, session: F) -> Response
where
    F: FnOnce(WebSocket) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    ws.on_failed_upgrade(|e| warn!(error = %e, "WebSocket upgrade failed"))
        .on_upgrade(move |socket| run_tracked(token, session(socket)))
}

/// Runs an upgraded session while holding `token`. A panic is logged and swallowed,
/// and the token is released either way.
pub async fn run_tracked<Fut>(token: TaskTrackerToken, session: Fut)
where
    Fut: Future<Output = ()> + Send,
{
    let _token = token;
    if AssertUnwindSafe(session).catch_unwind().await.is_err() {
        error!("WebSocket session panicked");
    }
}

/// Completes the handshake only to close the connection straight away
pub fn reject_with_close(
    ws: WebSocketUpgrade,
    token: TaskTrackerToken,
    code: u16,
    reason: String,
) -> Response {
    hand_off(ws, token, move |mut socket| async move {
        if let Err(e) = SocketWrapper::close(&mut socket, code, &reason).await {
            debug!(error = %e, "Failed to send close frame");
        }
    })
}

/// Glob match where `*` stands for any run of characters
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern = pattern.as_bytes();
    let text = text.as_bytes();
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && pattern[p] == b'*' {
            backtrack = Some((p, t));
            p += 1;
        } else if p < pattern.len() && pattern[p] == text[t] {
            p += 1;
            t += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            t = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == b'*')
}

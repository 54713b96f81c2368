//! HTTP surface of the gateway.
//!
//! Every request except `/ping` runs through, outermost first:
//!
//! 1. request counting ([`track_requests`]), so recovered panics are counted as 500s
//! 2. panic recovery, turning a handler panic into a generic 500
//! 3. request tracing
//!
//! API routes additionally carry no-cache headers, and the room routes
//! (`/api/exists`, `/api/room`, `/api/ws`) sit behind the version gate when it is
//! enforced. Anything unmatched falls through to the static frontend.

use axum::{
    extract::Request,
    http::{
        header::{CACHE_CONTROL, EXPIRES, PRAGMA},
        HeaderName, HeaderValue,
    },
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    compression::CompressionLayer,
    services::{ServeDir, ServeFile},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};
use tracing::error;

use crate::metrics::track_requests;
use crate::room::{get_stats, room_exists, room_request, types::TimeResponse};
use crate::shared::{AppError, AppState};
use crate::version_gate::check_version;
use crate::websockets::websocket_handler;

const NO_CACHE: &str = "no-cache, no-store, no-transform, must-revalidate, private, max-age=0";
const IMMUTABLE: &str = "public, max-age=31536000, immutable";
const EPOCH: &str = "Thu, 01 Jan 1970 00:00:00 UTC";

#[derive(Debug, Clone)]
pub struct RouterOptions {
    /// Directory holding the built frontend
    pub static_dir: PathBuf,
    /// Whether room routes require a matching client version
    pub enforce_version: bool,
}

pub fn create_router(state: AppState, options: RouterOptions) -> Router {
    let mut room_routes = Router::new()
        .route("/api/exists", get(room_exists))
        .route("/api/room", post(room_request))
        .route("/api/ws", get(websocket_handler));
    if options.enforce_version {
        room_routes =
            room_routes.route_layer(middleware::from_fn_with_state(state.clone(), check_version));
    }

    let api = Router::new()
        .route("/api/time", get(get_time))
        .route("/api/stats", get(get_stats))
        .merge(room_routes)
        .layer(
            ServiceBuilder::new()
                .layer(SetResponseHeaderLayer::overriding(
                    CACHE_CONTROL,
                    HeaderValue::from_static(NO_CACHE),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    EXPIRES,
                    HeaderValue::from_static(EPOCH),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    PRAGMA,
                    HeaderValue::from_static("no-cache"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    HeaderName::from_static("x-accel-expires"),
                    HeaderValue::from_static("0"),
                )),
        );

    let app = with_pipeline(
        Router::new()
            .merge(api)
            .fallback_service(static_router(options.static_dir)),
        &state,
    )
    .with_state(state);

    // The liveness probe skips every layer above
    Router::new().route("/ping", get(|| async { "." })).merge(app)
}

fn with_pipeline(router: Router<AppState>, state: &AppState) -> Router<AppState> {
    router.layer(
        ServiceBuilder::new()
            .layer(middleware::from_fn_with_state(
                Arc::clone(&state.metrics),
                track_requests,
            ))
            .layer(CatchPanicLayer::custom(handle_panic))
            .layer(TraceLayer::new_for_http()),
    )
}

fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        *s
    } else {
        "unknown panic payload"
    };
    error!(panic = %detail, "Request handler panicked");
    AppError::Internal.into_response()
}

/// GET /api/time
async fn get_time() -> Json<TimeResponse> {
    Json(TimeResponse { time: Utc::now() })
}

/// Built frontend, with `index.html` standing in for unknown paths
fn static_router(static_dir: PathBuf) -> Router {
    let index = ServeFile::new(static_dir.join("index.html"));
    Router::new()
        .fallback_service(ServeDir::new(static_dir).fallback(index))
        .layer(middleware::from_fn(cache_policy))
        .layer(CompressionLayer::new())
}

/// Hashed build assets are cached forever, everything else never.
async fn cache_policy(request: Request, next: Next) -> Response {
    let path = request.uri().path();
    let immutable = path.starts_with("/static/") || path.starts_with("/favicon/");

    let mut response = next.run(request).await;
    let value = if immutable { IMMUTABLE } else { NO_CACHE };
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static(value));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::test_utils::{AppStateBuilder, FailingRoomDirectory, TEST_VERSION};
    use axum::{
        body::Body,
        http::{header::CONTENT_ENCODING, Request, StatusCode},
    };
    use std::sync::Arc;
    use tower::ServiceExt;

    fn options(enforce_version: bool) -> RouterOptions {
        RouterOptions {
            static_dir: PathBuf::from("./does-not-exist"),
            enforce_version,
        }
    }

    fn app(enforce_version: bool) -> Router {
        create_router(AppStateBuilder::new().build(), options(enforce_version))
    }

    async fn get(app: Router, uri: &str) -> Response {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body_string(response: Response) -> String {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_ping() {
        let response = get(app(true), "/ping").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, ".");
    }

    #[tokio::test]
    async fn test_ping_is_not_counted() {
        let state = AppStateBuilder::new().build();
        let metrics = Arc::clone(&state.metrics);
        let app = create_router(state, options(true));

        get(app.clone(), "/ping").await;
        get(app, "/api/time").await;

        assert_eq!(
            metrics
                .http_requests
                .with_label_values(&["200", "get"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn test_time_is_rfc3339() {
        let response = get(app(true), "/api/time").await;
        assert_eq!(response.status(), StatusCode::OK);

        let time: TimeResponse = serde_json::from_str(&body_string(response).await).unwrap();
        assert!((Utc::now() - time.time).num_seconds() < 5);
    }

    #[tokio::test]
    async fn test_api_responses_are_not_cacheable() {
        let response = get(app(true), "/api/stats").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CACHE_CONTROL], NO_CACHE);
        assert_eq!(response.headers()[EXPIRES], EPOCH);
        assert_eq!(response.headers()[PRAGMA], "no-cache");
        assert_eq!(response.headers()["x-accel-expires"], "0");
    }

    #[tokio::test]
    async fn test_version_gate_covers_room_routes_only() {
        let gated = get(app(true), "/api/exists?roomId=abc").await;
        assert_eq!(gated.status(), StatusCode::IM_A_TEAPOT);

        let passed = get(
            app(true),
            &format!("/api/exists?roomId=abc&codiesVersion={TEST_VERSION}"),
        )
        .await;
        assert_eq!(passed.status(), StatusCode::NOT_FOUND);

        assert_eq!(get(app(true), "/api/stats").await.status(), StatusCode::OK);
        assert_eq!(get(app(true), "/api/time").await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_debug_mode_skips_version_gate() {
        let response = get(app(false), "/api/exists?roomId=abc").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_handler_panic_becomes_counted_500() {
        let state = AppStateBuilder::new().build();
        let metrics = Arc::clone(&state.metrics);
        let router = with_pipeline(
            Router::new().route("/boom", axum::routing::get(|| async { let never: () = panic!("handler bug"); never })),
            &state,
        )
        .with_state(state);

        let response = get(router, "/boom").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            metrics
                .http_requests
                .with_label_values(&["500", "get"])
                .get(),
            1
        );

        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(json["error"], "An unknown error occurred.");
    }

    #[tokio::test]
    async fn test_unknown_directory_failure_is_500() {
        let state = AppStateBuilder::new()
            .with_room_directory(Arc::new(FailingRoomDirectory))
            .build();
        let app = create_router(state, options(false));

        let request = Request::builder()
            .method("POST")
            .uri("/api/room")
            .header("content-type", "application/json")
            .body(Body::from(
                r#"{"create": true, "roomName": "lobby", "roomPass": "pw"}"#,
            ))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_static_fallback_and_cache_policy() {
        let dir = std::env::temp_dir().join(format!("codies-static-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(dir.join("static/js")).unwrap();
        std::fs::write(dir.join("index.html"), "<html>codies</html>").unwrap();
        std::fs::write(dir.join("static/js/main.abc123.js"), "console.log(1)").unwrap();

        let app = create_router(
            AppStateBuilder::new().build(),
            RouterOptions {
                static_dir: dir.clone(),
                enforce_version: true,
            },
        );

        let asset = get(app.clone(), "/static/js/main.abc123.js").await;
        assert_eq!(asset.status(), StatusCode::OK);
        assert_eq!(asset.headers()[CACHE_CONTROL], IMMUTABLE);

        let root = get(app.clone(), "/").await;
        assert_eq!(root.status(), StatusCode::OK);
        assert_eq!(root.headers()[CACHE_CONTROL], NO_CACHE);
        assert_eq!(body_string(root).await, "<html>codies</html>");

        let deep_link = get(app, "/some/client/route").await;
        assert_eq!(body_string(deep_link).await, "<html>codies</html>");

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn test_static_assets_are_compressed_on_request() {
        let dir = std::env::temp_dir().join(format!("codies-gzip-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("index.html"), "<html>".repeat(200)).unwrap();

        let app = create_router(
            AppStateBuilder::new().build(),
            RouterOptions {
                static_dir: dir.clone(),
                enforce_version: true,
            },
        );
        let request = Request::builder()
            .uri("/")
            .header("accept-encoding", "gzip")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.headers()[CONTENT_ENCODING], "gzip");
        std::fs::remove_dir_all(dir).unwrap();
    }
}

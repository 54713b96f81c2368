use axum::{
    extract::{Request, State},
    http::{header::CONTENT_TYPE, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;
use tracing::error;

const NAMESPACE: &str = "codies";

/// Process-wide counters and gauges, registered against a registry owned by this value
/// rather than the prometheus default registry.
pub struct Metrics {
    registry: Registry,
    pub http_requests: IntCounterVec,
    pub rooms: IntGauge,
    pub clients: IntGauge,
    pub received: IntCounter,
    pub sent: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let http_requests = IntCounterVec::new(
            Opts::new("requests_total", "Total number of HTTP requests.")
                .namespace(NAMESPACE)
                .subsystem("http"),
            &["code", "method"],
        )?;
        let rooms = IntGauge::with_opts(
            Opts::new("rooms", "Total number of rooms.")
                .namespace(NAMESPACE)
                .subsystem(NAMESPACE),
        )?;
        let clients = IntGauge::with_opts(
            Opts::new("clients", "Total number of clients.")
                .namespace(NAMESPACE)
                .subsystem(NAMESPACE),
        )?;
        let received = IntCounter::with_opts(
            Opts::new("received_total", "Total number of received messages.")
                .namespace(NAMESPACE)
                .subsystem(NAMESPACE),
        )?;
        let sent = IntCounter::with_opts(
            Opts::new("sent_total", "Total number of sent messages.")
                .namespace(NAMESPACE)
                .subsystem(NAMESPACE),
        )?;

        registry.register(Box::new(http_requests.clone()))?;
        registry.register(Box::new(rooms.clone()))?;
        registry.register(Box::new(clients.clone()))?;
        registry.register(Box::new(received.clone()))?;
        registry.register(Box::new(sent.clone()))?;

        Ok(Self {
            registry,
            http_requests,
            rooms,
            clients,
            received,
            sent,
        })
    }

    /// Renders every registered series in the text exposition format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Counts every completed request by status code and method
pub async fn track_requests(
    State(metrics): State<Arc<Metrics>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().as_str().to_lowercase();
    let response = next.run(request).await;

    metrics
        .http_requests
        .with_label_values(&[response.status().as_str(), &method])
        .inc();

    response
}

/// Router for the dedicated scrape listener
pub fn metrics_router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(metrics)
}

async fn render_metrics(State(metrics): State<Arc<Metrics>>) -> Response {
    match metrics.render() {
        Ok(body) => ([(CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

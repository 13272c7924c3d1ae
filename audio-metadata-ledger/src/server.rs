use std::future::{ready, Future};
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::{info, warn};

use crate::event::S3Event;
use crate::metrics_consts::{HTTP_REQUESTS_COUNTER, HTTP_REQUEST_DURATION_HISTOGRAM};
use crate::processor::BatchProcessor;

pub async fn index() -> &'static str {
    "audio metadata ledger"
}

/// Accepts an S3 event notification and answers with the per-entry report.
/// Any failed entry turns the response into a 500 so the caller redelivers.
pub async fn invoke(
    State(processor): State<Arc<BatchProcessor>>,
    Json(event): Json<S3Event>,
) -> impl IntoResponse {
    let notifications = event.into_notifications();
    let received = notifications.len();

    let report = processor.process(notifications).await;

    let status = if report.has_failures() {
        warn!(
            received,
            failed = report.failed(),
            "batch finished with failures"
        );
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        info!(
            received,
            processed = report.processed(),
            skipped = report.skipped(),
            "batch finished"
        );
        StatusCode::OK
    };

    (status, Json(report))
}

pub fn router(processor: Arc<BatchProcessor>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(|| ready("ok")))
        .route("/invoke", post(invoke))
        .with_state(processor)
}

/// Exposes `/metrics` and records every request routed before this call.
pub fn with_metrics(router: Router, recorder_handle: PrometheusHandle) -> Router {
    router
        .route("/metrics", get(move || ready(recorder_handle.render())))
        .layer(axum::middleware::from_fn(record_http_metrics))
}

pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    // seconds, from a fast no-op batch up to the invocation timeout
    const BUCKETS: &[f64] = &[
        0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
    ];

    PrometheusBuilder::new()
        .set_buckets(BUCKETS)?
        .install_recorder()
}

async fn record_http_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let started = Instant::now();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| req.uri().path(), MatchedPath::as_str)
        .to_owned();
    let method = req.method().to_string();

    let response = next.run(req).await;

    let labels = [
        ("method", method),
        ("route", route),
        ("status", response.status().as_u16().to_string()),
    ];
    metrics::counter!(HTTP_REQUESTS_COUNTER, &labels).increment(1);
    metrics::histogram!(HTTP_REQUEST_DURATION_HISTOGRAM, &labels)
        .record(started.elapsed().as_secs_f64());

    response
}

/// Serves until `shutdown` resolves, letting in-flight batches finish.
pub async fn serve<F>(router: Router, bind: &str, shutdown: F) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

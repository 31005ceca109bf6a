use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all Mixflow metrics
const PREFIX: &str = "mixflow";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    pub static ref AUTH_FAILURES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_auth_failures_total"), "Rejected authentication attempts"),
        &["reason"]
    ).expect("Failed to create auth_failures_total metric");

    pub static ref RATE_LIMIT_DENIALS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_rate_limit_denials_total"), "Requests denied by rate limiting"),
        &["window", "plan"]
    ).expect("Failed to create rate_limit_denials_total metric");

    pub static ref RATE_LIMIT_FAIL_OPEN_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_rate_limit_fail_open_total"),
        "Rate limit checks allowed because the counter store was unreachable"
    ).expect("Failed to create rate_limit_fail_open_total metric");

    pub static ref PIPELINE_STAGE_FAILURES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_pipeline_stage_failures_total"), "Pipeline stages that degraded"),
        &["stage"]
    ).expect("Failed to create pipeline_stage_failures_total metric");

    pub static ref PIPELINE_CONFIDENCE: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            format!("{PREFIX}_pipeline_confidence"),
            "Confidence of completed pipeline runs"
        )
        .buckets(vec![0.0, 0.1, 0.25, 0.5, 0.65, 0.8, 0.9, 1.0])
    ).expect("Failed to create pipeline_confidence metric");
}

/// Register all metrics with the registry. Idempotent; duplicate
/// registration from tests is ignored.
pub fn init_metrics() {
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(AUTH_FAILURES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(RATE_LIMIT_DENIALS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(RATE_LIMIT_FAIL_OPEN_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(PIPELINE_STAGE_FAILURES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(PIPELINE_CONFIDENCE.clone()));

    tracing::info!("Metrics system initialized");
}

pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

pub fn record_auth_failure(reason: &str) {
    AUTH_FAILURES_TOTAL.with_label_values(&[reason]).inc();
}

pub fn record_rate_limit_denial(window: &str, plan: &str) {
    RATE_LIMIT_DENIALS_TOTAL
        .with_label_values(&[window, plan])
        .inc();
}

pub fn record_rate_limit_fail_open() {
    RATE_LIMIT_FAIL_OPEN_TOTAL.inc();
}

pub fn record_pipeline_run(failed_stages: &[&str], confidence: f64) {
    for stage in failed_stages {
        PIPELINE_STAGE_FAILURES_TOTAL
            .with_label_values(&[stage])
            .inc();
    }
    PIPELINE_CONFIDENCE.observe(confidence);
}

/// GET /metrics in Prometheus text exposition format.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => match String::from_utf8(buffer) {
            Ok(text) => (StatusCode::OK, text).into_response(),
            Err(e) => {
                tracing::error!("Metrics encoding produced invalid UTF-8: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        },
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

//! Request logging and usage accounting middleware.

use axum::{
    body::Body,
    extract::State,
    http::{header::HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use std::time::Instant;
use tracing::{error, info};

use crate::usage::UsageRecord;

use super::super::api_key::Identity;
use super::super::metrics::record_http_request;
use super::super::state::ServerState;

#[derive(PartialEq, PartialOrd, Clone, Debug, clap::ValueEnum)]
pub enum RequestsLoggingLevel {
    None,
    Path,
    Headers,
    Body,
}

impl Default for RequestsLoggingLevel {
    fn default() -> Self {
        Self::Path
    }
}

impl std::fmt::Display for RequestsLoggingLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Logs each request and, for authenticated callers, records usage after
/// the response exists. Runs inside authentication and outside rate
/// limiting, so denied (429) requests are accounted too; requests that
/// never resolved an identity (401s) are not, since there is no subject to
/// charge them to.
const MAX_LOGGABLE_BODY_LENGTH: usize = 1024;

fn parse_content_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
}

pub async fn log_requests(
    State(state): State<ServerState>,
    mut request: Request<Body>,
    next: Next,
) -> impl IntoResponse {
    let level = state.config.requests_logging_level.clone();

    let identity = request.extensions().get::<Identity>().cloned();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let start = Instant::now();

    if level > RequestsLoggingLevel::None {
        info!(">>> {} {}", method, path);
    }

    if level >= RequestsLoggingLevel::Headers {
        info!("  Req Headers:");
        for header in request.headers().iter() {
            info!("    {:?}: {:?}", header.0, header.1);
        }
    }

    if level >= RequestsLoggingLevel::Body {
        match parse_content_length(request.headers()) {
            None => info!("  Req Body: no usable content-length"),
            Some(size) if size < MAX_LOGGABLE_BODY_LENGTH => {
                let (parts, body) = request.into_parts();
                let bytes = match axum::body::to_bytes(body, size).await {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        error!("Failed to read request body: {:?}", err);
                        return Response::builder()
                            .status(500)
                            .body(Body::from("Internal Server Error"))
                            .unwrap();
                    }
                };
                info!("  Req Body:\n{}", String::from_utf8_lossy(&bytes));
                request = Request::from_parts(parts, Body::from(bytes));
            }
            Some(size) => info!("  Req Body: too big to log ({} bytes)", size),
        }
    }

    let response: Response = next.run(request).await;

    let status = response.status().as_u16();
    let duration = start.elapsed();

    if level > RequestsLoggingLevel::None {
        info!("<<< {} ({}ms)", status, duration.as_millis());
    }

    record_http_request(&method, &path, status, duration);

    if let Some(identity) = identity {
        state.usage.record(UsageRecord {
            subject_id: identity.user.id,
            key_id: identity.key.id,
            endpoint: path,
            method,
            status_code: status,
            latency_ms: duration.as_millis() as u64,
            timestamp: Utc::now().timestamp(),
        });
    }

    response
}

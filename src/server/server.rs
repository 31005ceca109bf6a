use anyhow::Result;
use axum::{
    extract::rejection::JsonRejection,
    extract::State,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::pipeline::{DownloadQuality, ProcessOptions, StageOutcome};
use crate::rate_limit::{BURST_WINDOW_SECS, SUSTAINED_WINDOW_SECS};

use super::api_key::{authenticate, Identity};
use super::error::ApiError;
use super::http_layers::{enforce_rate_limit, log_requests};
use super::metrics::{metrics_handler, record_pipeline_run};
use super::state::ServerState;

const MAX_TRACKS_CEILING: usize = 50;
const DEFAULT_MAX_TRACKS: usize = 10;

/// Build the application router. Public so tests can serve it on a port of
/// their own choosing.
///
/// Protected routes run three layers, outermost first: authentication,
/// request logging with usage accounting, rate limiting. That order keeps
/// 429s accounted as usage while unauthenticated requests never are.
pub fn make_app(state: ServerState) -> Router {
    let protected = Router::new()
        .route("/v1/music/process", post(process_music))
        .route("/v1/usage/recent", get(usage_recent))
        .route("/v1/rate-limit", get(rate_limit_status))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            enforce_rate_limit,
        ))
        .layer(middleware::from_fn_with_state(state.clone(), log_requests))
        .layer(middleware::from_fn_with_state(state.clone(), authenticate));

    Router::new()
        .route("/", get(home))
        .route("/metrics", get(metrics_handler))
        .merge(protected)
        .with_state(state)
}

pub async fn run_server(state: ServerState) -> Result<()> {
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, make_app(state)).await?;
    Ok(())
}

fn success(data: impl Serialize) -> Json<Value> {
    Json(json!({ "success": true, "data": data }))
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    Json(json!({
        "name": "mixflow-server",
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSecs": state.start_time.elapsed().as_secs(),
    }))
}

/// Parse and validate the process request body by hand so violations come
/// back as INVALID_REQUEST in the standard envelope rather than an
/// extractor-shaped 400.
fn parse_process_request(body: &Value) -> Result<(String, ProcessOptions), ApiError> {
    let object = body
        .as_object()
        .ok_or_else(|| ApiError::InvalidRequest("Body must be a JSON object".to_string()))?;

    let raw_request = match object.get("request") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        Some(Value::String(_)) => {
            return Err(ApiError::InvalidRequest(
                "'request' must not be empty".to_string(),
            ))
        }
        Some(_) => {
            return Err(ApiError::InvalidRequest(
                "'request' must be a string".to_string(),
            ))
        }
        None => {
            return Err(ApiError::InvalidRequest(
                "'request' is required".to_string(),
            ))
        }
    };

    let max_tracks = match object.get("maxTracks") {
        None => DEFAULT_MAX_TRACKS,
        Some(value) => match value.as_u64() {
            Some(n) if (1..=MAX_TRACKS_CEILING as u64).contains(&n) => n as usize,
            _ => {
                return Err(ApiError::InvalidRequest(format!(
                    "'maxTracks' must be an integer between 1 and {}",
                    MAX_TRACKS_CEILING
                )))
            }
        },
    };

    let analyze_audio = match object.get("analyzeAudio") {
        None => true,
        Some(Value::Bool(b)) => *b,
        Some(_) => {
            return Err(ApiError::InvalidRequest(
                "'analyzeAudio' must be a boolean".to_string(),
            ))
        }
    };

    let download_quality = match object.get("downloadQuality").and_then(|v| v.as_str()) {
        None if object.get("downloadQuality").is_none() => DownloadQuality::Standard,
        Some("standard") => DownloadQuality::Standard,
        Some("high") => DownloadQuality::High,
        _ => {
            return Err(ApiError::InvalidRequest(
                "'downloadQuality' must be \"standard\" or \"high\"".to_string(),
            ))
        }
    };

    Ok((
        raw_request,
        ProcessOptions {
            max_tracks,
            analyze_audio,
            download_quality,
        },
    ))
}

async fn process_music(
    State(state): State<ServerState>,
    Extension(_identity): Extension<Identity>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) =
        body.map_err(|e| ApiError::InvalidRequest(format!("Invalid JSON body: {}", e)))?;
    let (raw_request, options) = parse_process_request(&body)?;

    let run = state.pipeline.run(&raw_request, options).await;

    let failed_stages: Vec<&str> = run
        .step_log
        .iter()
        .filter(|s| s.outcome == StageOutcome::Failed)
        .map(|s| s.stage)
        .collect();
    if !failed_stages.is_empty() {
        error!(
            "Pipeline degraded for request {:?}: failed stages {:?}",
            run.query, failed_stages
        );
    }
    record_pipeline_run(&failed_stages, run.confidence);

    Ok(success(json!({
        "tracks": run.candidates,
        "totalFound": run.candidates.len(),
        "confidence": run.confidence,
        "processingSteps": run.step_log,
    })))
}

async fn usage_recent(
    State(state): State<ServerState>,
    Extension(identity): Extension<Identity>,
) -> Json<Value> {
    let activity = state.usage.recent_activity(&identity.user.id);
    success(json!({ "activity": activity }))
}

async fn rate_limit_status(
    State(state): State<ServerState>,
    Extension(identity): Extension<Identity>,
) -> Json<Value> {
    // Static plan quotas only; live remaining counts ride on this
    // response's X-RateLimit-* headers without burning extra quota.
    let config = state.rate_limiter.config_for(identity.user.plan);
    success(json!({
        "plan": identity.user.plan.as_str(),
        "sustainedLimit": config.sustained_limit,
        "sustainedWindowSecs": SUSTAINED_WINDOW_SECS,
        "burstLimit": config.burst_limit,
        "burstWindowSecs": BURST_WINDOW_SECS,
    }))
}

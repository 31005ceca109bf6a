//! Rate limiting middleware.
//!
//! Sits inside authentication: it reads the resolved identity from request
//! extensions and checks the subject's plan quotas. Every response passing
//! through, allowed or denied, carries X-RateLimit-* headers for both
//! windows.

use axum::{
    body::Body,
    extract::State,
    http::{header::HeaderName, HeaderMap, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::warn;

use crate::rate_limit::RateLimitDecision;

use super::super::api_key::Identity;
use super::super::metrics::record_rate_limit_denial;
use super::super::state::ServerState;

pub async fn enforce_rate_limit(
    State(state): State<ServerState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(identity) = request.extensions().get::<Identity>().cloned() else {
        // Routes without authentication carry no quota.
        return next.run(request).await;
    };

    let decision = state
        .rate_limiter
        .check(&identity.user.id, identity.user.plan);

    if !decision.allowed() {
        let window = decision.exceeded_window().expect("denied without window");
        warn!(
            "Rate limit exceeded for {} ({}): {} window",
            identity.user.id,
            identity.user.plan.as_str(),
            window.as_str()
        );
        record_rate_limit_denial(window.as_str(), identity.user.plan.as_str());

        let body = json!({
            "success": false,
            "error": {
                "code": "RATE_LIMIT_EXCEEDED",
                "message": format!("Rate limit exceeded for the {} window", window.as_str()),
                "limitType": window.as_str(),
                "resetTime": decision.exceeded_reset(),
            }
        });
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        apply_rate_limit_headers(response.headers_mut(), &decision);
        return response;
    }

    let mut response = next.run(request).await;
    apply_rate_limit_headers(response.headers_mut(), &decision);
    response
}

fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    let pairs: [(&str, i64); 6] = [
        ("x-ratelimit-limit", decision.sustained_limit as i64),
        ("x-ratelimit-remaining", decision.remaining_sustained as i64),
        ("x-ratelimit-reset", decision.reset_sustained),
        ("x-ratelimit-burst-limit", decision.burst_limit as i64),
        ("x-ratelimit-burst-remaining", decision.remaining_burst as i64),
        ("x-ratelimit-burst-reset", decision.reset_burst),
    ];
    for (name, value) in pairs {
        if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_cover_both_windows() {
        let decision = RateLimitDecision {
            allowed_sustained: true,
            allowed_burst: true,
            sustained_limit: 1000,
            burst_limit: 30,
            remaining_sustained: 999,
            remaining_burst: 29,
            reset_sustained: 7200,
            reset_burst: 3660,
        };
        let mut headers = HeaderMap::new();
        apply_rate_limit_headers(&mut headers, &decision);

        assert_eq!(headers["x-ratelimit-limit"], "1000");
        assert_eq!(headers["x-ratelimit-remaining"], "999");
        assert_eq!(headers["x-ratelimit-reset"], "7200");
        assert_eq!(headers["x-ratelimit-burst-limit"], "30");
        assert_eq!(headers["x-ratelimit-burst-remaining"], "29");
        assert_eq!(headers["x-ratelimit-burst-reset"], "3660");
    }
}

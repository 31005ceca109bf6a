//! API key authentication.
//!
//! Runs before anything else on protected routes. The resolved identity is
//! inserted into request extensions so downstream layers (rate limiting,
//! usage recording) and handlers can read it without a second lookup.

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error};

use crate::user::{hash_key, is_valid_key_format, ApiKeyRecord, User, UserStore};

use super::error::ApiError;
use super::metrics::record_auth_failure;
use super::state::ServerState;

pub const API_KEY_HEADER: &str = "X-API-Key";

/// Authenticated caller, attached to request extensions.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user: User,
    pub key: ApiKeyRecord,
}

pub async fn authenticate(
    State(state): State<ServerState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let raw_key = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    match resolve(&state, raw_key.as_deref()) {
        Ok(identity) => {
            touch_last_used(state.user_store.clone(), identity.key.id.clone());
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(e) => {
            record_auth_failure(e.code());
            e.into_response()
        }
    }
}

/// Resolve a raw key to its user and key record.
///
/// Format check first so malformed input never reaches the hash or the
/// store. Lookup goes through a short-lived cache keyed by the hash; the
/// active flags are re-checked on every request so deactivation takes
/// effect within one cache lifetime at worst.
fn resolve(state: &ServerState, raw_key: Option<&str>) -> Result<Identity, ApiError> {
    let raw_key = raw_key.ok_or(ApiError::InvalidKeyFormat)?;
    if !is_valid_key_format(raw_key) {
        debug!("Rejecting malformed API key");
        return Err(ApiError::InvalidKeyFormat);
    }

    let key_hash = hash_key(raw_key);

    let pair = match state.auth_cache.get(&key_hash) {
        Some(pair) => pair,
        None => match state.user_store.find_key_with_user(&key_hash) {
            Ok(Some(pair)) => {
                state.auth_cache.insert(key_hash, pair.clone());
                pair
            }
            Ok(None) => return Err(ApiError::InvalidApiKey),
            Err(e) => {
                error!("Key lookup failed: {}", e);
                return Err(ApiError::Internal);
            }
        },
    };

    let (user, key) = pair;
    // Inactive user and inactive key are indistinguishable to the client.
    if !user.is_active || !key.is_active {
        return Err(ApiError::InactiveAccount);
    }

    Ok(Identity { user, key })
}

/// Best-effort last-used bump on a detached task.
fn touch_last_used(store: Arc<dyn UserStore>, key_id: String) {
    let now = Utc::now().timestamp();
    tokio::spawn(async move {
        let result = tokio::task::spawn_blocking(move || store.touch_api_key(&key_id, now)).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Failed to update key last-used timestamp: {}", e),
            Err(e) => debug!("Last-used update task panicked: {}", e),
        }
    });
}

use axum::extract::FromRef;
use std::sync::Arc;
use std::time::Instant;

use crate::cache::TtlCache;
use crate::pipeline::MusicPipeline;
use crate::rate_limit::RateLimiter;
use crate::usage::UsageRecorder;
use crate::user::{ApiKeyRecord, User, UserStore};

use super::ServerConfig;

pub type GuardedUserStore = Arc<dyn UserStore>;
pub type GuardedRateLimiter = Arc<RateLimiter>;
pub type GuardedUsageRecorder = Arc<UsageRecorder>;
pub type GuardedPipeline = Arc<MusicPipeline>;
pub type AuthCache = Arc<TtlCache<String, (User, ApiKeyRecord)>>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub user_store: GuardedUserStore,
    pub rate_limiter: GuardedRateLimiter,
    pub usage: GuardedUsageRecorder,
    pub pipeline: GuardedPipeline,
    /// Keyed by key hash, never by the raw key.
    pub auth_cache: AuthCache,
}

impl FromRef<ServerState> for GuardedUserStore {
    fn from_ref(input: &ServerState) -> Self {
        input.user_store.clone()
    }
}

impl FromRef<ServerState> for GuardedRateLimiter {
    fn from_ref(input: &ServerState) -> Self {
        input.rate_limiter.clone()
    }
}

impl FromRef<ServerState> for GuardedUsageRecorder {
    fn from_ref(input: &ServerState) -> Self {
        input.usage.clone()
    }
}

impl FromRef<ServerState> for GuardedPipeline {
    fn from_ref(input: &ServerState) -> Self {
        input.pipeline.clone()
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}

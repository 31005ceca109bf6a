//! Plan-tiered rate limiting.
//!
//! Every subject gets two quotas per plan: a sustained one (requests per
//! hour) and a burst one (requests per minute). Both are enforced over
//! tumbling windows: fixed buckets computed as `floor(now / size) * size`,
//! with counters that reset hard at bucket boundaries. A burst of traffic
//! straddling a boundary can therefore momentarily see up to twice the
//! nominal rate. That is a known, intentional approximation; smoothing it
//! would change externally observable quota behavior.

mod counter_store;

pub use counter_store::{CounterStore, MemoryCounterStore, SqliteCounterStore};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Billing plan attached to a user. Assigned externally; the server only
/// reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Starter,
    Pro,
    Scale,
    Enterprise,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Starter => "starter",
            Plan::Pro => "pro",
            Plan::Scale => "scale",
            Plan::Enterprise => "enterprise",
        }
    }

    pub fn parse(s: &str) -> Option<Plan> {
        match s {
            "free" => Some(Plan::Free),
            "starter" => Some(Plan::Starter),
            "pro" => Some(Plan::Pro),
            "scale" => Some(Plan::Scale),
            "enterprise" => Some(Plan::Enterprise),
            _ => None,
        }
    }
}

pub const SUSTAINED_WINDOW_SECS: u64 = 3600;
pub const BURST_WINDOW_SECS: u64 = 60;

/// Per-plan quota tuple. The burst quota is a short-horizon sub-quota of the
/// sustained one; a request must clear both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub sustained_limit: u64,
    pub sustained_window_secs: u64,
    pub burst_limit: u64,
    pub burst_window_secs: u64,
}

impl RateLimitConfig {
    pub const fn new(sustained_limit: u64, burst_limit: u64) -> Self {
        Self {
            sustained_limit,
            sustained_window_secs: SUSTAINED_WINDOW_SECS,
            burst_limit,
            burst_window_secs: BURST_WINDOW_SECS,
        }
    }
}

/// Static quota table. Changing a plan's numbers is a billing decision, not
/// a deploy-time config knob, so they are compiled in.
pub fn plan_config(plan: Plan) -> RateLimitConfig {
    match plan {
        Plan::Free => RateLimitConfig::new(100, 10),
        Plan::Starter => RateLimitConfig::new(1000, 30),
        Plan::Pro => RateLimitConfig::new(10000, 120),
        Plan::Scale => RateLimitConfig::new(50000, 400),
        Plan::Enterprise => RateLimitConfig::new(250000, 1500),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    Sustained,
    Burst,
}

impl WindowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WindowKind::Sustained => "sustained",
            WindowKind::Burst => "burst",
        }
    }
}

/// Outcome of a rate limit check, with everything the HTTP layer needs for
/// X-RateLimit-* headers and 429 bodies.
#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    pub allowed_sustained: bool,
    pub allowed_burst: bool,
    pub sustained_limit: u64,
    pub burst_limit: u64,
    pub remaining_sustained: u64,
    pub remaining_burst: u64,
    /// Unix seconds at which each window rolls over.
    pub reset_sustained: i64,
    pub reset_burst: i64,
}

impl RateLimitDecision {
    pub fn allowed(&self) -> bool {
        self.allowed_sustained && self.allowed_burst
    }

    /// Which window to name in a denial. When both are exceeded the
    /// sustained window wins: the longer-horizon signal is the one the
    /// client should plan around.
    pub fn exceeded_window(&self) -> Option<WindowKind> {
        if !self.allowed_sustained {
            Some(WindowKind::Sustained)
        } else if !self.allowed_burst {
            Some(WindowKind::Burst)
        } else {
            None
        }
    }

    /// Reset timestamp of the exceeded window, if any.
    pub fn exceeded_reset(&self) -> Option<i64> {
        match self.exceeded_window()? {
            WindowKind::Sustained => Some(self.reset_sustained),
            WindowKind::Burst => Some(self.reset_burst),
        }
    }
}

fn window_start(now_secs: i64, window_secs: u64) -> i64 {
    // Fixed-origin tumbling bucket, not a sliding window.
    now_secs - now_secs.rem_euclid(window_secs as i64)
}

fn counter_key(subject_id: &str, kind: WindowKind, start: i64) -> String {
    format!("rl:{}:{}:{}", subject_id, kind.as_str(), start)
}

pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    /// Test and operator overrides; plans absent here use the static table.
    overrides: HashMap<Plan, RateLimitConfig>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            overrides: HashMap::new(),
        }
    }

    pub fn with_override(mut self, plan: Plan, config: RateLimitConfig) -> Self {
        self.overrides.insert(plan, config);
        self
    }

    pub fn config_for(&self, plan: Plan) -> RateLimitConfig {
        self.overrides
            .get(&plan)
            .copied()
            .unwrap_or_else(|| plan_config(plan))
    }

    pub fn check(&self, subject_id: &str, plan: Plan) -> RateLimitDecision {
        self.check_at(subject_id, plan, Utc::now())
    }

    /// Check and consume quota for one request attempt.
    ///
    /// Both counters are incremented unconditionally: a denied request still
    /// consumes quota, so hammering a closed door never reopens it early.
    /// If the counter store is unreachable the check fails open; rate
    /// limiting must never take the product down with it.
    pub fn check_at(&self, subject_id: &str, plan: Plan, now: DateTime<Utc>) -> RateLimitDecision {
        let config = self.config_for(plan);
        let now_secs = now.timestamp();

        let sustained_start = window_start(now_secs, config.sustained_window_secs);
        let burst_start = window_start(now_secs, config.burst_window_secs);
        let reset_sustained = sustained_start + config.sustained_window_secs as i64;
        let reset_burst = burst_start + config.burst_window_secs as i64;

        let sustained_key = counter_key(subject_id, WindowKind::Sustained, sustained_start);
        let burst_key = counter_key(subject_id, WindowKind::Burst, burst_start);

        let sustained_ttl = (reset_sustained - now_secs).max(1) as u64;
        let burst_ttl = (reset_burst - now_secs).max(1) as u64;

        let sustained_count = self.store.increment_with_ttl(&sustained_key, sustained_ttl);
        let burst_count = self.store.increment_with_ttl(&burst_key, burst_ttl);

        let (sustained_count, burst_count) = match (sustained_count, burst_count) {
            (Ok(s), Ok(b)) => (s, b),
            (s, b) => {
                if let Err(e) = &s {
                    warn!("Counter store failed for {}: {}; failing open", subject_id, e);
                }
                if let Err(e) = &b {
                    warn!("Counter store failed for {}: {}; failing open", subject_id, e);
                }
                crate::server::metrics::record_rate_limit_fail_open();
                return RateLimitDecision {
                    allowed_sustained: true,
                    allowed_burst: true,
                    sustained_limit: config.sustained_limit,
                    burst_limit: config.burst_limit,
                    remaining_sustained: config.sustained_limit,
                    remaining_burst: config.burst_limit,
                    reset_sustained,
                    reset_burst,
                };
            }
        };

        RateLimitDecision {
            allowed_sustained: sustained_count <= config.sustained_limit,
            allowed_burst: burst_count <= config.burst_limit,
            sustained_limit: config.sustained_limit,
            burst_limit: config.burst_limit,
            remaining_sustained: config.sustained_limit.saturating_sub(sustained_count),
            remaining_burst: config.burst_limit.saturating_sub(burst_count),
            reset_sustained,
            reset_burst,
        }
    }
}

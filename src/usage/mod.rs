//! Usage accounting.
//!
//! Every completed request is recorded after the response is already on its
//! way out: a detached task appends to the persistent usage log, and an
//! in-memory per-subject activity list keeps the last 100 entries hot for
//! the recent-activity endpoint. Neither side is allowed to affect the
//! response that produced the record.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::TtlCache;
use crate::user::UserStore;

/// One request's outcome. Append-only; retention is an external concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub subject_id: String,
    pub key_id: String,
    pub endpoint: String,
    pub method: String,
    pub status_code: u16,
    pub latency_ms: u64,
    pub timestamp: i64,
}

pub const RECENT_ACTIVITY_CAP: usize = 100;
const RECENT_ACTIVITY_TTL: Duration = Duration::from_secs(15 * 60);

pub struct UsageRecorder {
    store: Arc<dyn UserStore>,
    recent: TtlCache<String, Vec<UsageRecord>>,
}

impl UsageRecorder {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self {
            store,
            recent: TtlCache::new(RECENT_ACTIVITY_TTL),
        }
    }

    /// Record a completed request. Returns immediately; the durable write
    /// happens on a detached task with its own error boundary.
    pub fn record(&self, record: UsageRecord) {
        self.push_recent(&record);

        let store = self.store.clone();
        tokio::spawn(async move {
            persist(store, record).await;
        });
    }

    fn push_recent(&self, record: &UsageRecord) {
        let mut list = self.recent.get(&record.subject_id).unwrap_or_default();
        list.insert(0, record.clone());
        list.truncate(RECENT_ACTIVITY_CAP);
        self.recent.insert(record.subject_id.clone(), list);
    }

    /// Most-recent-first activity for a subject. The cache is best-effort;
    /// a miss falls back to the persistent log.
    pub fn recent_activity(&self, subject_id: &str) -> Vec<UsageRecord> {
        if let Some(list) = self.recent.get(&subject_id.to_string()) {
            return list;
        }
        match self.store.recent_usage(subject_id, RECENT_ACTIVITY_CAP) {
            Ok(list) => {
                if !list.is_empty() {
                    self.recent.insert(subject_id.to_string(), list.clone());
                }
                list
            }
            Err(e) => {
                debug!("Failed to read usage log for {}: {}", subject_id, e);
                Vec::new()
            }
        }
    }
}

/// Durable write with its own error boundary: a failure here is an
/// operator-facing log line, never the caller's problem.
async fn persist(store: Arc<dyn UserStore>, record: UsageRecord) {
    let result = tokio::task::spawn_blocking(move || store.record_usage(&record)).await;
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("Failed to persist usage record: {}", e),
        Err(e) => debug!("Usage persistence task panicked: {}", e),
    }
}

//! Atomic increment-with-expiry counters backing the rate limiter.
//!
//! The single upsert statement in the SQLite implementation is the atomicity
//! guarantee: concurrent callers never lose an increment because there is no
//! separate read-modify-write. The TTL is armed when a key is first seen and
//! deliberately NOT refreshed by later increments; refreshing it would keep an
//! active key alive forever and the tumbling windows would never roll over.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use rusqlite::{params, Connection};

use crate::sqlite_persistence::{
    open_versioned, Column, SqlType, Table, VersionedSchema,
};

pub trait CounterStore: Send + Sync {
    /// Atomically increment `key` and return the post-increment count.
    ///
    /// On the first increment for a key the entry is armed to expire
    /// `ttl_secs` from now; later increments within the window leave the
    /// expiry untouched. An entry whose expiry has passed is treated as
    /// fresh: the count restarts at 1 with a new expiry.
    fn increment_with_ttl(&self, key: &str, ttl_secs: u64) -> Result<u64>;
}

const COUNTERS_TABLE: Table = Table {
    name: "counters",
    columns: &[
        Column::new("key", SqlType::Text).primary_key(),
        Column::new("count", SqlType::Integer).non_null(),
        Column::new("expires_at", SqlType::Integer).non_null(),
    ],
    indices: &[("idx_counters_expires_at", "expires_at")],
};

const COUNTER_SCHEMAS: [VersionedSchema; 1] = [VersionedSchema {
    version: 1,
    tables: &[COUNTERS_TABLE],
    migration: None,
}];

/// How many increments between opportunistic purges of expired rows.
const PURGE_EVERY: u64 = 512;

pub struct SqliteCounterStore {
    conn: Arc<Mutex<Connection>>,
    ops_since_purge: Mutex<u64>,
}

impl SqliteCounterStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn =
            open_versioned(db_path, &COUNTER_SCHEMAS).context("Failed to open counter database")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            ops_since_purge: Mutex::new(0),
        })
    }

    fn maybe_purge(&self, conn: &Connection, now: i64) {
        let mut ops = self.ops_since_purge.lock().unwrap();
        *ops += 1;
        if *ops >= PURGE_EVERY {
            *ops = 0;
            if let Err(e) = conn.execute("DELETE FROM counters WHERE expires_at <= ?1", params![now])
            {
                tracing::warn!("Failed to purge expired counters: {}", e);
            }
        }
    }
}

impl CounterStore for SqliteCounterStore {
    fn increment_with_ttl(&self, key: &str, ttl_secs: u64) -> Result<u64> {
        let now = chrono::Utc::now().timestamp();
        let expires_at = now + ttl_secs as i64;

        let conn = self.conn.lock().unwrap();
        // Expired rows restart at 1 with a fresh expiry; live rows keep their
        // original expiry so the key still disappears at window end.
        let count: u64 = conn
            .query_row(
                "INSERT INTO counters (key, count, expires_at) VALUES (?1, 1, ?2)
                 ON CONFLICT(key) DO UPDATE SET
                     count = CASE WHEN counters.expires_at <= ?3 THEN 1 ELSE counters.count + 1 END,
                     expires_at = CASE WHEN counters.expires_at <= ?3 THEN ?2 ELSE counters.expires_at END
                 RETURNING count",
                params![key, expires_at, now],
                |row| row.get(0),
            )
            .context("Failed to increment counter")?;

        self.maybe_purge(&conn, now);
        Ok(count)
    }
}

/// In-memory counter store.
///
/// Suitable for tests and single-instance deployments without a shared
/// backend; a multi-instance deployment must use a shared store or each
/// instance multiplies the client's effective quota.
#[derive(Default)]
pub struct MemoryCounterStore {
    entries: Mutex<HashMap<String, (u64, i64)>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CounterStore for MemoryCounterStore {
    fn increment_with_ttl(&self, key: &str, ttl_secs: u64) -> Result<u64> {
        let now = chrono::Utc::now().timestamp();
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .entry(key.to_string())
            .and_modify(|(count, expires_at)| {
                if *expires_at <= now {
                    *count = 1;
                    *expires_at = now + ttl_secs as i64;
                } else {
                    *count += 1;
                }
            })
            .or_insert((1, now + ttl_secs as i64));
        Ok(entry.0)
    }
}

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{ApiKeyRecord, User, UserStore};
use crate::rate_limit::Plan;
use crate::sqlite_persistence::{
    open_versioned, Column, SqlType, Table, VersionedSchema, DEFAULT_TIMESTAMP,
};
use crate::usage::UsageRecord;

const USERS_TABLE: Table = Table {
    name: "users",
    columns: &[
        Column::new("id", SqlType::Text).primary_key(),
        Column::new("name", SqlType::Text).non_null(),
        Column::new("plan", SqlType::Text).non_null(),
        Column::new("is_active", SqlType::Integer)
            .non_null()
            .default("1"),
        Column::new("created_at", SqlType::Integer)
            .non_null()
            .default(DEFAULT_TIMESTAMP),
    ],
    indices: &[],
};

const API_KEYS_TABLE: Table = Table {
    name: "api_keys",
    columns: &[
        Column::new("id", SqlType::Text).primary_key(),
        Column::new("user_id", SqlType::Text).non_null(),
        Column::new("key_hash", SqlType::Text).non_null(),
        Column::new("is_active", SqlType::Integer)
            .non_null()
            .default("1"),
        Column::new("created_at", SqlType::Integer)
            .non_null()
            .default(DEFAULT_TIMESTAMP),
        Column::new("last_used_at", SqlType::Integer),
    ],
    indices: &[
        ("idx_api_keys_key_hash", "key_hash"),
        ("idx_api_keys_user_id", "user_id"),
    ],
};

const USAGE_LOG_TABLE: Table = Table {
    name: "usage_log",
    columns: &[
        Column::new("id", SqlType::Integer).primary_key(),
        Column::new("subject_id", SqlType::Text).non_null(),
        Column::new("key_id", SqlType::Text).non_null(),
        Column::new("endpoint", SqlType::Text).non_null(),
        Column::new("method", SqlType::Text).non_null(),
        Column::new("status_code", SqlType::Integer).non_null(),
        Column::new("latency_ms", SqlType::Integer).non_null(),
        Column::new("timestamp", SqlType::Integer).non_null(),
    ],
    indices: &[("idx_usage_log_subject_ts", "subject_id, timestamp")],
};

const USER_SCHEMAS: [VersionedSchema; 1] = [VersionedSchema {
    version: 1,
    tables: &[USERS_TABLE, API_KEYS_TABLE, USAGE_LOG_TABLE],
    migration: None,
}];

pub struct SqliteUserStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteUserStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn =
            open_versioned(db_path, &USER_SCHEMAS).context("Failed to open user database")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
        let plan_str: String = row.get("plan")?;
        Ok(User {
            id: row.get("id")?,
            name: row.get("name")?,
            // Unknown plan strings downgrade to free rather than erroring;
            // an operator typo must not lock a user out entirely.
            plan: Plan::parse(&plan_str).unwrap_or(Plan::Free),
            is_active: row.get::<_, i64>("is_active")? != 0,
            created_at: row.get("created_at")?,
        })
    }

    fn row_to_api_key(row: &rusqlite::Row) -> rusqlite::Result<ApiKeyRecord> {
        Ok(ApiKeyRecord {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            key_hash: row.get("key_hash")?,
            is_active: row.get::<_, i64>("is_active")? != 0,
            created_at: row.get("created_at")?,
            last_used_at: row.get("last_used_at")?,
        })
    }

    fn row_to_usage(row: &rusqlite::Row) -> rusqlite::Result<UsageRecord> {
        Ok(UsageRecord {
            subject_id: row.get("subject_id")?,
            key_id: row.get("key_id")?,
            endpoint: row.get("endpoint")?,
            method: row.get("method")?,
            status_code: row.get::<_, i64>("status_code")? as u16,
            latency_ms: row.get::<_, i64>("latency_ms")? as u64,
            timestamp: row.get("timestamp")?,
        })
    }
}

impl UserStore for SqliteUserStore {
    fn create_user(&self, name: &str, plan: Plan) -> Result<User> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO users (id, name, plan, is_active, created_at) VALUES (?1, ?2, ?3, 1, ?4)",
            params![id, name, plan.as_str(), now],
        )?;
        Ok(User {
            id,
            name: name.to_string(),
            plan,
            is_active: true,
            created_at: now,
        })
    }

    fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let conn = self.conn.lock().unwrap();
        let user = conn
            .query_row(
                "SELECT * FROM users WHERE id = ?1",
                params![user_id],
                Self::row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM users ORDER BY created_at")?;
        let users = stmt
            .query_map([], Self::row_to_user)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(users)
    }

    fn set_user_active(&self, user_id: &str, active: bool) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE users SET is_active = ?2 WHERE id = ?1",
            params![user_id, active as i64],
        )?;
        Ok(())
    }

    fn insert_api_key(&self, user_id: &str, key_hash: &str) -> Result<ApiKeyRecord> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO api_keys (id, user_id, key_hash, is_active, created_at, last_used_at)
             VALUES (?1, ?2, ?3, 1, ?4, NULL)",
            params![id, user_id, key_hash, now],
        )?;
        Ok(ApiKeyRecord {
            id,
            user_id: user_id.to_string(),
            key_hash: key_hash.to_string(),
            is_active: true,
            created_at: now,
            last_used_at: None,
        })
    }

    fn list_api_keys(&self, user_id: &str) -> Result<Vec<ApiKeyRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT * FROM api_keys WHERE user_id = ?1 ORDER BY created_at")?;
        let keys = stmt
            .query_map(params![user_id], Self::row_to_api_key)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(keys)
    }

    fn set_api_key_active(&self, key_id: &str, active: bool) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE api_keys SET is_active = ?2 WHERE id = ?1",
            params![key_id, active as i64],
        )?;
        Ok(())
    }

    fn find_key_with_user(&self, key_hash: &str) -> Result<Option<(User, ApiKeyRecord)>> {
        let conn = self.conn.lock().unwrap();
        let result = conn
            .query_row(
                "SELECT u.id AS u_id, u.name, u.plan, u.is_active AS u_active, u.created_at AS u_created,
                        k.id AS k_id, k.user_id, k.key_hash, k.is_active AS k_active,
                        k.created_at AS k_created, k.last_used_at
                 FROM api_keys k JOIN users u ON u.id = k.user_id
                 WHERE k.key_hash = ?1",
                params![key_hash],
                |row| {
                    let plan_str: String = row.get("plan")?;
                    let user = User {
                        id: row.get("u_id")?,
                        name: row.get("name")?,
                        plan: Plan::parse(&plan_str).unwrap_or(Plan::Free),
                        is_active: row.get::<_, i64>("u_active")? != 0,
                        created_at: row.get("u_created")?,
                    };
                    let key = ApiKeyRecord {
                        id: row.get("k_id")?,
                        user_id: row.get("user_id")?,
                        key_hash: row.get("key_hash")?,
                        is_active: row.get::<_, i64>("k_active")? != 0,
                        created_at: row.get("k_created")?,
                        last_used_at: row.get("last_used_at")?,
                    };
                    Ok((user, key))
                },
            )
            .optional()?;
        Ok(result)
    }

    fn touch_api_key(&self, key_id: &str, now: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE api_keys SET last_used_at = ?2 WHERE id = ?1",
            params![key_id, now],
        )?;
        Ok(())
    }

    fn record_usage(&self, record: &UsageRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO usage_log
                 (subject_id, key_id, endpoint, method, status_code, latency_ms, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.subject_id,
                record.key_id,
                record.endpoint,
                record.method,
                record.status_code as i64,
                record.latency_ms as i64,
                record.timestamp,
            ],
        )?;
        Ok(())
    }

    fn recent_usage(&self, subject_id: &str, limit: usize) -> Result<Vec<UsageRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM usage_log WHERE subject_id = ?1
             ORDER BY timestamp DESC, id DESC LIMIT ?2",
        )?;
        let records = stmt
            .query_map(params![subject_id, limit as i64], Self::row_to_usage)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(records)
    }
}

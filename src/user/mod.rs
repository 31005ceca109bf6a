//! Users, API keys and their persistence.

mod sqlite_user_store;

pub use sqlite_user_store::SqliteUserStore;

use anyhow::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::rate_limit::Plan;
use crate::usage::UsageRecord;

pub const API_KEY_PREFIX: &str = "mf_";
pub const API_KEY_HEX_LEN: usize = 64;
pub const API_KEY_TOTAL_LEN: usize = API_KEY_PREFIX.len() + API_KEY_HEX_LEN;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub plan: Plan,
    pub is_active: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub id: String,
    pub user_id: String,
    /// SHA-256 of the raw key, lowercase hex. The raw key exists only in the
    /// client's hands; it is never stored or logged.
    pub key_hash: String,
    pub is_active: bool,
    pub created_at: i64,
    pub last_used_at: Option<i64>,
}

/// Cheap structural check, run before any hashing or lookup so malformed
/// input never reaches the store.
pub fn is_valid_key_format(raw_key: &str) -> bool {
    raw_key.len() == API_KEY_TOTAL_LEN
        && raw_key.starts_with(API_KEY_PREFIX)
        && raw_key[API_KEY_PREFIX.len()..]
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

pub fn hash_key(raw_key: &str) -> String {
    let digest = Sha256::digest(raw_key.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Generate a fresh raw API key. The caller shows it to the user exactly
/// once and persists only its hash.
pub fn generate_raw_key() -> String {
    let mut rng = rand::rng();
    let hex: String = (0..API_KEY_HEX_LEN)
        .map(|_| {
            let nibble: u8 = rng.random_range(0..16);
            char::from_digit(nibble as u32, 16).unwrap()
        })
        .collect();
    format!("{}{}", API_KEY_PREFIX, hex)
}

pub trait UserStore: Send + Sync {
    fn create_user(&self, name: &str, plan: Plan) -> Result<User>;
    fn get_user(&self, user_id: &str) -> Result<Option<User>>;
    fn list_users(&self) -> Result<Vec<User>>;
    fn set_user_active(&self, user_id: &str, active: bool) -> Result<()>;

    fn insert_api_key(&self, user_id: &str, key_hash: &str) -> Result<ApiKeyRecord>;
    fn list_api_keys(&self, user_id: &str) -> Result<Vec<ApiKeyRecord>>;
    fn set_api_key_active(&self, key_id: &str, active: bool) -> Result<()>;

    /// Resolve a key hash to its key record and owning user in one lookup.
    fn find_key_with_user(&self, key_hash: &str) -> Result<Option<(User, ApiKeyRecord)>>;

    /// Best-effort bump of the key's last-used timestamp.
    fn touch_api_key(&self, key_id: &str, now: i64) -> Result<()>;

    fn record_usage(&self, record: &UsageRecord) -> Result<()>;
    fn recent_usage(&self, subject_id: &str, limit: usize) -> Result<Vec<UsageRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_are_well_formed() {
        for _ in 0..20 {
            let key = generate_raw_key();
            assert!(is_valid_key_format(&key), "bad key: {}", key);
        }
    }

    #[test]
    fn format_rejects_wrong_prefix() {
        let key = generate_raw_key().replacen("mf_", "xx_", 1);
        assert!(!is_valid_key_format(&key));
    }

    #[test]
    fn format_rejects_wrong_length() {
        assert!(!is_valid_key_format("mf_abc123"));
        let key = generate_raw_key() + "0";
        assert!(!is_valid_key_format(&key));
    }

    #[test]
    fn format_rejects_uppercase_hex() {
        let key = generate_raw_key().to_uppercase().replacen("MF_", "mf_", 1);
        assert!(!is_valid_key_format(&key));
    }

    #[test]
    fn hash_is_stable_and_hex() {
        let h1 = hash_key("mf_test");
        let h2 = hash_key("mf_test");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert!(h1.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_ne!(hash_key("mf_other"), h1);
    }
}

//! Test data helpers.

use mixflow_server::rate_limit::Plan;
use mixflow_server::user::{generate_raw_key, hash_key, User, UserStore};

/// Create a user with one active API key; returns the user and the raw key.
pub fn create_user_with_key(store: &dyn UserStore, name: &str, plan: Plan) -> (User, String) {
    let user = store.create_user(name, plan).expect("Failed to create user");
    let raw_key = generate_raw_key();
    store
        .insert_api_key(&user.id, &hash_key(&raw_key))
        .expect("Failed to create api key");
    (user, raw_key)
}

pub mod cache;
pub mod config;
pub mod pipeline;
pub mod rate_limit;
pub mod server;
pub mod sqlite_persistence;
pub mod track_store;
pub mod usage;
pub mod user;

//! Durable track catalog keyed by external platform ID.

mod models;
mod schema;
mod store;
mod trait_def;

pub use models::StoredTrack;
pub use store::SqliteTrackStore;
pub use trait_def::TrackStore;

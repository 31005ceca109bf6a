use anyhow::Result;

use super::StoredTrack;
use crate::pipeline::TrackCandidate;

pub trait TrackStore: Send + Sync {
    /// Insert or update the track keyed by its platform ID.
    ///
    /// Merge rules on conflict: title, artist and analysis status always take
    /// the incoming value; every other field takes the incoming value only
    /// when it is present, so a run without analysis never erases earlier
    /// measurements. Converges under repetition instead of duplicating rows.
    fn upsert_track(&self, candidate: &TrackCandidate) -> Result<()>;

    fn get_track(&self, platform_id: &str) -> Result<Option<StoredTrack>>;
}

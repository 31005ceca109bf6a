use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema, DEFAULT_TIMESTAMP};

const TRACKS: Table = Table {
    name: "tracks",
    columns: &[
        Column::new("platform_id", SqlType::Text).primary_key(),
        Column::new("title", SqlType::Text).non_null(),
        Column::new("artist", SqlType::Text).non_null(),
        Column::new("album", SqlType::Text),
        Column::new("genre", SqlType::Text),
        Column::new("mood", SqlType::Text),
        Column::new("year", SqlType::Integer),
        Column::new("artwork_url", SqlType::Text),
        Column::new("duration_secs", SqlType::Integer),
        Column::new("bpm", SqlType::Real),
        Column::new("musical_key", SqlType::Text),
        Column::new("camelot_key", SqlType::Text),
        Column::new("energy_level", SqlType::Real),
        Column::new("loudness", SqlType::Real),
        Column::new("waveform_peaks", SqlType::Text),
        Column::new("analysis_status", SqlType::Text).non_null(),
        Column::new("created_at", SqlType::Integer)
            .non_null()
            .default(DEFAULT_TIMESTAMP),
        Column::new("updated_at", SqlType::Integer)
            .non_null()
            .default(DEFAULT_TIMESTAMP),
    ],
    indices: &[("idx_tracks_artist", "artist")],
};

pub(super) const TRACK_SCHEMAS: [VersionedSchema; 1] = [VersionedSchema {
    version: 1,
    tables: &[TRACKS],
    migration: None,
}];

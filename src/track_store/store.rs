use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::models::{status_from_str, status_to_str};
use super::schema::TRACK_SCHEMAS;
use super::{StoredTrack, TrackStore};
use crate::pipeline::TrackCandidate;
use crate::sqlite_persistence::open_versioned;

pub struct SqliteTrackStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTrackStore {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned(db_path, &TRACK_SCHEMAS)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

impl TrackStore for SqliteTrackStore {
    fn upsert_track(&self, candidate: &TrackCandidate) -> Result<()> {
        let peaks_json = candidate
            .waveform_peaks
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO tracks (
                platform_id, title, artist, album, genre, mood, year,
                artwork_url, duration_secs, bpm, musical_key, camelot_key,
                energy_level, loudness, waveform_peaks, analysis_status
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
             ON CONFLICT(platform_id) DO UPDATE SET
                title = excluded.title,
                artist = excluded.artist,
                album = COALESCE(excluded.album, tracks.album),
                genre = COALESCE(excluded.genre, tracks.genre),
                mood = COALESCE(excluded.mood, tracks.mood),
                year = COALESCE(excluded.year, tracks.year),
                artwork_url = COALESCE(excluded.artwork_url, tracks.artwork_url),
                duration_secs = COALESCE(excluded.duration_secs, tracks.duration_secs),
                bpm = COALESCE(excluded.bpm, tracks.bpm),
                musical_key = COALESCE(excluded.musical_key, tracks.musical_key),
                camelot_key = COALESCE(excluded.camelot_key, tracks.camelot_key),
                energy_level = COALESCE(excluded.energy_level, tracks.energy_level),
                loudness = COALESCE(excluded.loudness, tracks.loudness),
                waveform_peaks = COALESCE(excluded.waveform_peaks, tracks.waveform_peaks),
                analysis_status = excluded.analysis_status,
                updated_at = cast(strftime('%s','now') as int)",
            params![
                candidate.platform_id,
                candidate.title,
                candidate.artist,
                candidate.album,
                candidate.genre,
                candidate.mood,
                candidate.year,
                candidate.artwork_url,
                candidate.duration_secs,
                candidate.bpm,
                candidate.musical_key,
                candidate.camelot_key,
                candidate.energy_level,
                candidate.loudness,
                peaks_json,
                status_to_str(candidate.analysis_status),
            ],
        )?;
        Ok(())
    }

    fn get_track(&self, platform_id: &str) -> Result<Option<StoredTrack>> {
        let conn = self.conn.lock().unwrap();
        let track = conn
            .query_row(
                "SELECT platform_id, title, artist, album, genre, mood, year,
                        artwork_url, duration_secs, bpm, musical_key, camelot_key,
                        energy_level, loudness, waveform_peaks, analysis_status,
                        created_at, updated_at
                 FROM tracks WHERE platform_id = ?1",
                params![platform_id],
                row_to_track,
            )
            .optional()?;
        Ok(track)
    }
}

fn row_to_track(row: &Row) -> rusqlite::Result<StoredTrack> {
    let peaks_json: Option<String> = row.get(14)?;
    let waveform_peaks = peaks_json.and_then(|json| serde_json::from_str(&json).ok());
    let status: String = row.get(15)?;
    Ok(StoredTrack {
        platform_id: row.get(0)?,
        title: row.get(1)?,
        artist: row.get(2)?,
        album: row.get(3)?,
        genre: row.get(4)?,
        mood: row.get(5)?,
        year: row.get(6)?,
        artwork_url: row.get(7)?,
        duration_secs: row.get(8)?,
        bpm: row.get(9)?,
        musical_key: row.get(10)?,
        camelot_key: row.get(11)?,
        energy_level: row.get(12)?,
        loudness: row.get(13)?,
        waveform_peaks,
        analysis_status: status_from_str(&status),
        created_at: row.get(16)?,
        updated_at: row.get(17)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::AnalysisStatus;
    use tempfile::tempdir;

    fn store() -> (SqliteTrackStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = SqliteTrackStore::open(dir.path().join("tracks.db")).unwrap();
        (store, dir)
    }

    fn candidate(id: &str, title: &str) -> TrackCandidate {
        TrackCandidate::new(id, title, "Artist")
    }

    #[test]
    fn insert_then_get_roundtrip() {
        let (store, _dir) = store();
        let mut c = candidate("X", "Foo");
        c.bpm = Some(128.0);
        c.waveform_peaks = Some(vec![0.1, 0.9]);
        c.analysis_status = AnalysisStatus::Analyzed;
        store.upsert_track(&c).unwrap();

        let stored = store.get_track("X").unwrap().unwrap();
        assert_eq!(stored.title, "Foo");
        assert_eq!(stored.bpm, Some(128.0));
        assert_eq!(stored.waveform_peaks, Some(vec![0.1, 0.9]));
        assert_eq!(stored.analysis_status, AnalysisStatus::Analyzed);
    }

    #[test]
    fn missing_track_is_none() {
        let (store, _dir) = store();
        assert!(store.get_track("nope").unwrap().is_none());
    }

    #[test]
    fn upsert_overwrites_title_and_preserves_bpm() {
        let (store, _dir) = store();

        let mut first = candidate("X", "Old Title");
        first.bpm = Some(128.0);
        first.analysis_status = AnalysisStatus::Analyzed;
        store.upsert_track(&first).unwrap();

        // Second run found the same track under a different title and did
        // not re-analyze it.
        let second = candidate("X", "New Title");
        store.upsert_track(&second).unwrap();

        let stored = store.get_track("X").unwrap().unwrap();
        assert_eq!(stored.title, "New Title");
        assert_eq!(stored.bpm, Some(128.0));
        assert_eq!(stored.analysis_status, AnalysisStatus::Pending);
    }

    #[test]
    fn upsert_fills_previously_absent_fields() {
        let (store, _dir) = store();
        store.upsert_track(&candidate("X", "T")).unwrap();

        let mut enriched = candidate("X", "T");
        enriched.genre = Some("techno".to_string());
        enriched.year = Some(2020);
        store.upsert_track(&enriched).unwrap();

        let stored = store.get_track("X").unwrap().unwrap();
        assert_eq!(stored.genre.as_deref(), Some("techno"));
        assert_eq!(stored.year, Some(2020));
    }

    #[test]
    fn repeated_upsert_does_not_duplicate() {
        let (store, _dir) = store();
        for _ in 0..3 {
            store.upsert_track(&candidate("X", "T")).unwrap();
        }
        let count: i64 = {
            let conn = store.conn.lock().unwrap();
            conn.query_row("SELECT COUNT(*) FROM tracks", [], |r| r.get(0))
                .unwrap()
        };
        assert_eq!(count, 1);
    }
}

use serde::{Deserialize, Serialize};

use crate::pipeline::AnalysisStatus;

/// A track as it sits in the catalog. Accumulates across pipeline runs:
/// analysis fields survive runs that did not re-measure them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredTrack {
    pub platform_id: String,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub mood: Option<String>,
    pub year: Option<u32>,
    pub artwork_url: Option<String>,
    pub duration_secs: Option<u32>,
    pub bpm: Option<f64>,
    pub musical_key: Option<String>,
    pub camelot_key: Option<String>,
    pub energy_level: Option<f64>,
    pub loudness: Option<f64>,
    pub waveform_peaks: Option<Vec<f32>>,
    pub analysis_status: AnalysisStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

pub(super) fn status_to_str(status: AnalysisStatus) -> &'static str {
    match status {
        AnalysisStatus::Pending => "pending",
        AnalysisStatus::Analyzed => "analyzed",
        AnalysisStatus::Failed => "failed",
    }
}

pub(super) fn status_from_str(s: &str) -> AnalysisStatus {
    match s {
        "analyzed" => AnalysisStatus::Analyzed,
        "failed" => AnalysisStatus::Failed,
        _ => AnalysisStatus::Pending,
    }
}

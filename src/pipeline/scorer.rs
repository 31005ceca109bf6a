//! Confidence scoring for a completed pipeline run.

use super::{AnalysisStatus, ProcessedQuery, TrackCandidate};

/// Fold a run's outcome into a single 0..1 confidence value.
///
/// Deterministic over the query and final candidate list:
/// - base 0.5 for any non-empty result
/// - up to 0.3 for raw yield (3 candidates saturate it)
/// - up to 0.2 for analysis coverage
/// - up to 0.2 for BPM-filter satisfaction among analyzed candidates
///
/// No candidates at all short-circuits to exactly 0.
pub fn compute_confidence(query: &ProcessedQuery, candidates: &[TrackCandidate]) -> f64 {
    if candidates.is_empty() {
        return 0.0;
    }

    let total = candidates.len() as f64;
    let mut confidence = 0.5 + (total / 10.0).min(0.3);

    let analyzed: Vec<&TrackCandidate> = candidates
        .iter()
        .filter(|c| c.analysis_status == AnalysisStatus::Analyzed)
        .collect();

    if !analyzed.is_empty() {
        confidence += (analyzed.len() as f64 / total) * 0.2;

        if let Some((lo, hi)) = query.filters.bpm_range {
            let matching = analyzed
                .iter()
                .filter(|c| c.bpm.map(|bpm| bpm >= lo && bpm <= hi).unwrap_or(false))
                .count();
            confidence += (matching as f64 / analyzed.len() as f64) * 0.2;
        }
    }

    confidence.clamp(0.0, 1.0)
}

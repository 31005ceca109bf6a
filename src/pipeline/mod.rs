//! The request pipeline: Understand, Search, Enrich/Analyze, Score.
//!
//! Stages run in a fixed order with no re-entry. Every external failure is
//! absorbed inside its stage: the run always completes and always produces a
//! response, with failures visible only as a failed step entry and a lower
//! confidence.

mod analysis;
mod provider_error;
mod scorer;
mod search_provider;
mod understanding;

pub use analysis::{AudioAnalysis, AudioAnalysisProvider, HttpAnalysisProvider};
pub use provider_error::ProviderError;
pub use scorer::compute_confidence;
pub use search_provider::{
    DownloadQuality, HttpSearchProvider, SearchHit, SearchProvider, TrackDetails,
};
pub use understanding::{OpenAiUnderstanding, Understanding, UnderstandingProvider};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::track_store::TrackStore;

/// Fan-out cap for the search stage. Terms past this are ignored.
pub const MAX_SEARCH_TERMS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Search,
    Analyze,
    Discover,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    Relevance,
    Bpm,
    Energy,
    Duration,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bpm_range: Option<(f64, f64)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_set: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genre_set: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mood_set: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub energy_range: Option<(f64, f64)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_range: Option<(u32, u32)>,
}

/// The structured reading of a raw request. Built once per run, by the
/// understanding collaborator or by [`ProcessedQuery::fallback`], and
/// read-only afterwards.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedQuery {
    pub intent: Intent,
    pub search_terms: Vec<String>,
    pub filters: QueryFilters,
    pub max_results: usize,
    pub sort_by: SortBy,
}

impl ProcessedQuery {
    /// Minimal query used when understanding fails: search the raw text
    /// verbatim with no filters.
    pub fn fallback(raw_request: &str, max_results: usize) -> Self {
        Self {
            intent: Intent::Search,
            search_terms: vec![raw_request.to_string()],
            filters: QueryFilters::default(),
            max_results,
            sort_by: SortBy::Relevance,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Pending,
    Analyzed,
    Failed,
}

/// One track accumulating fields as stages complete. Later stages fill gaps
/// rather than overwrite, with one exception: measured audio analysis is
/// authoritative and replaces anything guessed earlier.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackCandidate {
    pub platform_id: String,
    pub title: String,
    pub artist: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mood: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artwork_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bpm: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub musical_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camelot_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub energy_level: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loudness: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waveform_peaks: Option<Vec<f32>>,
    pub analysis_status: AnalysisStatus,
}

impl TrackCandidate {
    pub fn new(
        platform_id: impl Into<String>,
        title: impl Into<String>,
        artist: impl Into<String>,
    ) -> Self {
        Self {
            platform_id: platform_id.into(),
            title: title.into(),
            artist: artist.into(),
            album: None,
            genre: None,
            mood: None,
            year: None,
            artwork_url: None,
            duration_secs: None,
            bpm: None,
            musical_key: None,
            camelot_key: None,
            energy_level: None,
            loudness: None,
            waveform_peaks: None,
            analysis_status: AnalysisStatus::Pending,
        }
    }

    fn from_hit(hit: SearchHit) -> Self {
        let mut candidate = Self::new(hit.platform_id, hit.title, hit.artist);
        candidate.album = hit.album;
        candidate.duration_secs = hit.duration_secs;
        candidate
    }

    /// Merge extended metadata, filling only fields still unset.
    pub fn fill_missing(&mut self, details: TrackDetails) {
        fill(&mut self.album, details.album);
        fill(&mut self.genre, details.genre);
        fill(&mut self.year, details.year);
        fill(&mut self.artwork_url, details.artwork_url);
        fill(&mut self.duration_secs, details.duration_secs);
    }

    /// Merge measured analysis, overwriting any earlier values.
    pub fn apply_analysis(&mut self, analysis: AudioAnalysis) {
        overwrite(&mut self.bpm, analysis.bpm);
        overwrite(&mut self.musical_key, analysis.musical_key);
        overwrite(&mut self.camelot_key, analysis.camelot_key);
        overwrite(&mut self.energy_level, analysis.energy_level);
        overwrite(&mut self.loudness, analysis.loudness);
        overwrite(&mut self.waveform_peaks, analysis.waveform_peaks);
        self.analysis_status = AnalysisStatus::Analyzed;
    }
}

fn fill<T>(slot: &mut Option<T>, value: Option<T>) {
    if slot.is_none() {
        *slot = value;
    }
}

fn overwrite<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageOutcome {
    Ok,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStep {
    pub stage: &'static str,
    pub outcome: StageOutcome,
    pub duration_ms: u64,
}

/// Everything one run produced. Lives only for the duration of its request.
#[derive(Debug)]
pub struct PipelineRun {
    pub query: String,
    pub processed_query: ProcessedQuery,
    pub candidates: Vec<TrackCandidate>,
    pub step_log: Vec<ProcessingStep>,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct ProcessOptions {
    pub max_tracks: usize,
    pub analyze_audio: bool,
    pub download_quality: DownloadQuality,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            max_tracks: 10,
            analyze_audio: true,
            download_quality: DownloadQuality::Standard,
        }
    }
}

pub struct MusicPipeline {
    understanding: Arc<dyn UnderstandingProvider>,
    search: Arc<dyn SearchProvider>,
    analysis: Option<Arc<dyn AudioAnalysisProvider>>,
    tracks: Arc<dyn TrackStore>,
}

impl MusicPipeline {
    pub fn new(
        understanding: Arc<dyn UnderstandingProvider>,
        search: Arc<dyn SearchProvider>,
        analysis: Option<Arc<dyn AudioAnalysisProvider>>,
        tracks: Arc<dyn TrackStore>,
    ) -> Self {
        Self {
            understanding,
            search,
            analysis,
            tracks,
        }
    }

    /// Run the full pipeline for one request. Infallible by contract: every
    /// collaborator failure is absorbed into the step log and confidence.
    pub async fn run(&self, raw_request: &str, options: ProcessOptions) -> PipelineRun {
        let mut step_log = Vec::with_capacity(4);

        let query = self
            .understand_stage(raw_request, options.max_tracks, &mut step_log)
            .await;
        let mut candidates = self.search_stage(&query, &mut step_log).await;
        self.enrich_stage(&mut candidates, &options, &mut step_log)
            .await;

        let started = Instant::now();
        let confidence = compute_confidence(&query, &candidates);
        step_log.push(ProcessingStep {
            stage: "score",
            outcome: StageOutcome::Ok,
            duration_ms: started.elapsed().as_millis() as u64,
        });

        self.persist_candidates(&candidates);

        PipelineRun {
            query: raw_request.to_string(),
            processed_query: query,
            candidates,
            step_log,
            confidence,
        }
    }

    async fn understand_stage(
        &self,
        raw_request: &str,
        max_results: usize,
        step_log: &mut Vec<ProcessingStep>,
    ) -> ProcessedQuery {
        let started = Instant::now();
        let (query, outcome) = match self.understanding.understand(raw_request, max_results).await {
            Ok(understanding) => {
                debug!(
                    model_confidence = understanding.model_confidence,
                    terms = understanding.query.search_terms.len(),
                    "Understanding succeeded"
                );
                (understanding.query, StageOutcome::Ok)
            }
            Err(e) => {
                warn!("Understanding failed, using fallback query: {}", e);
                (
                    ProcessedQuery::fallback(raw_request, max_results),
                    StageOutcome::Failed,
                )
            }
        };
        step_log.push(ProcessingStep {
            stage: "understand",
            outcome,
            duration_ms: started.elapsed().as_millis() as u64,
        });
        query
    }

    async fn search_stage(
        &self,
        query: &ProcessedQuery,
        step_log: &mut Vec<ProcessingStep>,
    ) -> Vec<TrackCandidate> {
        let started = Instant::now();
        let terms: Vec<&String> = query.search_terms.iter().take(MAX_SEARCH_TERMS).collect();

        let searches = terms
            .iter()
            .map(|term| self.search.search(term, query.max_results));
        let results = join_all(searches).await;

        // join_all preserves input order, so iterating results in order keeps
        // duplicate resolution on term priority rather than completion time.
        let mut candidates: Vec<TrackCandidate> = Vec::new();
        let mut any_ok = false;
        for (term, result) in terms.iter().zip(results) {
            match result {
                Ok(hits) => {
                    any_ok = true;
                    for hit in hits {
                        if !candidates.iter().any(|c| c.platform_id == hit.platform_id) {
                            candidates.push(TrackCandidate::from_hit(hit));
                        }
                    }
                }
                Err(e) => warn!("Search for {:?} failed: {}", term, e),
            }
        }
        candidates.truncate(query.max_results);

        step_log.push(ProcessingStep {
            stage: "search",
            outcome: if any_ok {
                StageOutcome::Ok
            } else {
                StageOutcome::Failed
            },
            duration_ms: started.elapsed().as_millis() as u64,
        });
        candidates
    }

    /// Per-candidate enrichment and optional audio analysis. Candidates are
    /// isolated from each other: a failure marks that candidate and moves on.
    async fn enrich_stage(
        &self,
        candidates: &mut [TrackCandidate],
        options: &ProcessOptions,
        step_log: &mut Vec<ProcessingStep>,
    ) {
        let started = Instant::now();
        let analyze = options.analyze_audio && self.analysis.is_some();
        let mut attempted = 0usize;
        let mut analyzed = 0usize;

        for candidate in candidates.iter_mut() {
            match self.search.track_details(&candidate.platform_id).await {
                Ok(details) => candidate.fill_missing(details),
                Err(e) => debug!(
                    "Metadata fetch for {} failed: {}",
                    candidate.platform_id, e
                ),
            }

            if analyze {
                attempted += 1;
                match self.analyze_candidate(candidate, options.download_quality).await {
                    Ok(analysis) => {
                        candidate.apply_analysis(analysis);
                        analyzed += 1;
                    }
                    Err(e) => {
                        debug!("Analysis for {} failed: {}", candidate.platform_id, e);
                        candidate.analysis_status = AnalysisStatus::Failed;
                    }
                }
            }
        }

        // The stage only counts as failed when analysis was asked for and
        // nothing came back. Metadata is best-effort throughout.
        let outcome = if attempted > 0 && analyzed == 0 {
            StageOutcome::Failed
        } else {
            StageOutcome::Ok
        };
        step_log.push(ProcessingStep {
            stage: "enrich",
            outcome,
            duration_ms: started.elapsed().as_millis() as u64,
        });
    }

    async fn analyze_candidate(
        &self,
        candidate: &TrackCandidate,
        quality: DownloadQuality,
    ) -> Result<AudioAnalysis, ProviderError> {
        let analysis = self
            .analysis
            .as_ref()
            .ok_or_else(|| ProviderError::InvalidResponse("No analysis provider".to_string()))?;
        // The download URL primes the platform to serve the audio; analysis
        // itself is keyed by platform id.
        let _url = self
            .search
            .download_url(&candidate.platform_id, quality)
            .await?;
        analysis.analyze(&candidate.platform_id).await
    }

    fn persist_candidates(&self, candidates: &[TrackCandidate]) {
        for candidate in candidates {
            if let Err(e) = self.tracks.upsert_track(candidate) {
                warn!("Failed to persist track {}: {}", candidate.platform_id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track_store::StoredTrack;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FailingUnderstanding;

    #[async_trait]
    impl UnderstandingProvider for FailingUnderstanding {
        async fn understand(&self, _: &str, _: usize) -> Result<Understanding, ProviderError> {
            Err(ProviderError::Timeout)
        }
    }

    struct FixedUnderstanding(Vec<&'static str>);

    #[async_trait]
    impl UnderstandingProvider for FixedUnderstanding {
        async fn understand(
            &self,
            _: &str,
            max_results: usize,
        ) -> Result<Understanding, ProviderError> {
            Ok(Understanding {
                query: ProcessedQuery {
                    intent: Intent::Search,
                    search_terms: self.0.iter().map(|s| s.to_string()).collect(),
                    filters: QueryFilters::default(),
                    max_results,
                    sort_by: SortBy::Relevance,
                },
                model_confidence: 0.9,
            })
        }
    }

    /// Search provider scripted per term. Terms absent from the script fail.
    struct ScriptedSearch {
        hits_by_term: Vec<(&'static str, Vec<SearchHit>)>,
        searched_terms: Mutex<Vec<String>>,
        fail_analysis_for: Vec<&'static str>,
    }

    impl ScriptedSearch {
        fn new(hits_by_term: Vec<(&'static str, Vec<SearchHit>)>) -> Self {
            Self {
                hits_by_term,
                searched_terms: Mutex::new(Vec::new()),
                fail_analysis_for: Vec::new(),
            }
        }
    }

    fn hit(id: &str, title: &str) -> SearchHit {
        SearchHit {
            platform_id: id.to_string(),
            title: title.to_string(),
            artist: "Artist".to_string(),
            duration_secs: Some(200),
            album: None,
        }
    }

    #[async_trait]
    impl SearchProvider for ScriptedSearch {
        async fn search(&self, term: &str, _: usize) -> Result<Vec<SearchHit>, ProviderError> {
            self.searched_terms.lock().unwrap().push(term.to_string());
            self.hits_by_term
                .iter()
                .find(|(t, _)| *t == term)
                .map(|(_, hits)| hits.clone())
                .ok_or_else(|| ProviderError::Connection("no route".to_string()))
        }

        async fn track_details(&self, _: &str) -> Result<TrackDetails, ProviderError> {
            Ok(TrackDetails {
                genre: Some("electronic".to_string()),
                ..Default::default()
            })
        }

        async fn download_url(
            &self,
            platform_id: &str,
            _: DownloadQuality,
        ) -> Result<String, ProviderError> {
            if self.fail_analysis_for.contains(&platform_id) {
                return Err(ProviderError::Timeout);
            }
            Ok(format!("https://cdn.example/{}", platform_id))
        }
    }

    struct FixedAnalysis;

    #[async_trait]
    impl AudioAnalysisProvider for FixedAnalysis {
        async fn analyze(&self, _: &str) -> Result<AudioAnalysis, ProviderError> {
            Ok(AudioAnalysis {
                bpm: Some(128.0),
                ..Default::default()
            })
        }
    }

    #[derive(Default)]
    struct RecordingTrackStore {
        upserts: Mutex<Vec<String>>,
    }

    impl TrackStore for RecordingTrackStore {
        fn upsert_track(&self, candidate: &TrackCandidate) -> Result<()> {
            self.upserts
                .lock()
                .unwrap()
                .push(candidate.platform_id.clone());
            Ok(())
        }

        fn get_track(&self, _: &str) -> Result<Option<StoredTrack>> {
            Ok(None)
        }
    }

    fn pipeline(
        understanding: Arc<dyn UnderstandingProvider>,
        search: Arc<dyn SearchProvider>,
        analysis: Option<Arc<dyn AudioAnalysisProvider>>,
    ) -> (MusicPipeline, Arc<RecordingTrackStore>) {
        let store = Arc::new(RecordingTrackStore::default());
        (
            MusicPipeline::new(understanding, search, analysis, store.clone()),
            store,
        )
    }

    fn step<'a>(run: &'a PipelineRun, stage: &str) -> &'a ProcessingStep {
        run.step_log
            .iter()
            .find(|s| s.stage == stage)
            .unwrap_or_else(|| panic!("no step {}", stage))
    }

    #[tokio::test]
    async fn understanding_failure_falls_back_to_raw_text() {
        let search = Arc::new(ScriptedSearch::new(vec![(
            "dark techno please",
            vec![hit("X", "Foo")],
        )]));
        let (p, _) = pipeline(Arc::new(FailingUnderstanding), search.clone(), None);

        let run = p
            .run(
                "dark techno please",
                ProcessOptions {
                    analyze_audio: false,
                    ..Default::default()
                },
            )
            .await;

        assert_eq!(step(&run, "understand").outcome, StageOutcome::Failed);
        assert_eq!(run.candidates.len(), 1);
        assert_eq!(
            *search.searched_terms.lock().unwrap(),
            vec!["dark techno please"]
        );
    }

    #[tokio::test]
    async fn duplicates_resolve_by_term_priority() {
        let search = Arc::new(ScriptedSearch::new(vec![
            ("a", vec![hit("X", "Foo")]),
            ("b", vec![hit("X", "Bar"), hit("Y", "Baz")]),
        ]));
        let (p, _) = pipeline(Arc::new(FixedUnderstanding(vec!["a", "b"])), search, None);

        let run = p
            .run(
                "whatever",
                ProcessOptions {
                    analyze_audio: false,
                    ..Default::default()
                },
            )
            .await;

        let x: Vec<&TrackCandidate> = run
            .candidates
            .iter()
            .filter(|c| c.platform_id == "X")
            .collect();
        assert_eq!(x.len(), 1);
        assert_eq!(x[0].title, "Foo");
        assert_eq!(run.candidates.len(), 2);
    }

    #[tokio::test]
    async fn search_fan_out_is_capped_at_three_terms() {
        let search = Arc::new(ScriptedSearch::new(vec![
            ("a", vec![]),
            ("b", vec![]),
            ("c", vec![]),
            ("d", vec![hit("X", "Foo")]),
        ]));
        let (p, _) = pipeline(
            Arc::new(FixedUnderstanding(vec!["a", "b", "c", "d"])),
            search.clone(),
            None,
        );

        let run = p
            .run(
                "q",
                ProcessOptions {
                    analyze_audio: false,
                    ..Default::default()
                },
            )
            .await;

        assert_eq!(search.searched_terms.lock().unwrap().len(), 3);
        assert!(run.candidates.is_empty());
    }

    #[tokio::test]
    async fn all_searches_failing_yields_empty_ok_response() {
        let search = Arc::new(ScriptedSearch::new(vec![]));
        let (p, _) = pipeline(Arc::new(FixedUnderstanding(vec!["a", "b"])), search, None);

        let run = p.run("q", ProcessOptions::default()).await;

        assert_eq!(step(&run, "search").outcome, StageOutcome::Failed);
        assert!(run.candidates.is_empty());
        assert_eq!(run.confidence, 0.0);
    }

    #[tokio::test]
    async fn one_candidate_failing_analysis_does_not_affect_others() {
        let search = Arc::new(ScriptedSearch {
            hits_by_term: vec![("a", vec![hit("good", "G"), hit("bad", "B")])],
            searched_terms: Mutex::new(Vec::new()),
            fail_analysis_for: vec!["bad"],
        });
        let (p, _) = pipeline(
            Arc::new(FixedUnderstanding(vec!["a"])),
            search,
            Some(Arc::new(FixedAnalysis)),
        );

        let run = p.run("q", ProcessOptions::default()).await;

        assert_eq!(run.candidates.len(), 2);
        let good = run.candidates.iter().find(|c| c.platform_id == "good").unwrap();
        let bad = run.candidates.iter().find(|c| c.platform_id == "bad").unwrap();
        assert_eq!(good.analysis_status, AnalysisStatus::Analyzed);
        assert_eq!(good.bpm, Some(128.0));
        assert_eq!(bad.analysis_status, AnalysisStatus::Failed);
        assert_eq!(bad.title, "B");
        assert_eq!(step(&run, "enrich").outcome, StageOutcome::Ok);
    }

    #[tokio::test]
    async fn enrich_fails_only_when_every_analysis_fails() {
        let search = Arc::new(ScriptedSearch {
            hits_by_term: vec![("a", vec![hit("x", "X"), hit("y", "Y")])],
            searched_terms: Mutex::new(Vec::new()),
            fail_analysis_for: vec!["x", "y"],
        });
        let (p, _) = pipeline(
            Arc::new(FixedUnderstanding(vec!["a"])),
            search,
            Some(Arc::new(FixedAnalysis)),
        );

        let run = p.run("q", ProcessOptions::default()).await;
        assert_eq!(step(&run, "enrich").outcome, StageOutcome::Failed);
        assert!(run
            .candidates
            .iter()
            .all(|c| c.analysis_status == AnalysisStatus::Failed));
    }

    #[tokio::test]
    async fn surviving_candidates_are_persisted() {
        let search = Arc::new(ScriptedSearch::new(vec![(
            "a",
            vec![hit("X", "Foo"), hit("Y", "Bar")],
        )]));
        let (p, store) = pipeline(Arc::new(FixedUnderstanding(vec!["a"])), search, None);

        p.run(
            "q",
            ProcessOptions {
                analyze_audio: false,
                ..Default::default()
            },
        )
        .await;

        assert_eq!(*store.upserts.lock().unwrap(), vec!["X", "Y"]);
    }

    #[tokio::test]
    async fn results_truncate_to_max_tracks() {
        let hits: Vec<SearchHit> = (0..20).map(|i| hit(&i.to_string(), "T")).collect();
        let search = Arc::new(ScriptedSearch::new(vec![("a", hits)]));
        let (p, _) = pipeline(Arc::new(FixedUnderstanding(vec!["a"])), search, None);

        let run = p
            .run(
                "q",
                ProcessOptions {
                    max_tracks: 5,
                    analyze_audio: false,
                    download_quality: DownloadQuality::Standard,
                },
            )
            .await;
        assert_eq!(run.candidates.len(), 5);
    }

    #[test]
    fn fill_missing_does_not_overwrite() {
        let mut c = TrackCandidate::new("id", "T", "A");
        c.genre = Some("techno".to_string());
        c.fill_missing(TrackDetails {
            genre: Some("pop".to_string()),
            year: Some(2021),
            ..Default::default()
        });
        assert_eq!(c.genre.as_deref(), Some("techno"));
        assert_eq!(c.year, Some(2021));
    }

    #[test]
    fn apply_analysis_overwrites_guesses() {
        let mut c = TrackCandidate::new("id", "T", "A");
        c.bpm = Some(100.0);
        c.apply_analysis(AudioAnalysis {
            bpm: Some(128.0),
            ..Default::default()
        });
        assert_eq!(c.bpm, Some(128.0));
        assert_eq!(c.analysis_status, AnalysisStatus::Analyzed);
    }

    #[test]
    fn apply_analysis_keeps_existing_when_measurement_absent() {
        let mut c = TrackCandidate::new("id", "T", "A");
        c.musical_key = Some("Am".to_string());
        c.apply_analysis(AudioAnalysis {
            bpm: Some(128.0),
            musical_key: None,
            ..Default::default()
        });
        assert_eq!(c.musical_key.as_deref(), Some("Am"));
    }
}

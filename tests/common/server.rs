//! Test server lifecycle management.
//!
//! Each test gets an isolated server on a random port with its own temp
//! databases and scripted external collaborators.

use super::constants::*;
use async_trait::async_trait;
use mixflow_server::cache::TtlCache;
use mixflow_server::pipeline::{
    AudioAnalysis, AudioAnalysisProvider, Intent, MusicPipeline, ProcessedQuery, ProviderError,
    QueryFilters, SearchHit, SearchProvider, SortBy, TrackDetails, Understanding,
    UnderstandingProvider,
};
use mixflow_server::rate_limit::{
    MemoryCounterStore, Plan, RateLimitConfig, RateLimiter,
};
use mixflow_server::server::http_layers::RequestsLoggingLevel;
use mixflow_server::server::{make_app, ServerConfig, ServerState};
use mixflow_server::track_store::SqliteTrackStore;
use mixflow_server::usage::UsageRecorder;
use mixflow_server::user::SqliteUserStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::net::TcpListener;

pub struct MockUnderstanding {
    pub fail: bool,
    pub terms: Vec<&'static str>,
}

#[async_trait]
impl UnderstandingProvider for MockUnderstanding {
    async fn understand(
        &self,
        _raw_request: &str,
        max_results: usize,
    ) -> Result<Understanding, ProviderError> {
        if self.fail {
            return Err(ProviderError::Timeout);
        }
        Ok(Understanding {
            query: ProcessedQuery {
                intent: Intent::Search,
                search_terms: self.terms.iter().map(|s| s.to_string()).collect(),
                filters: QueryFilters::default(),
                max_results,
                sort_by: SortBy::Relevance,
            },
            model_confidence: 0.9,
        })
    }
}

/// Search provider answering from a fixed routing table; unknown terms fail.
pub struct MockSearch {
    routes: HashMap<String, Vec<SearchHit>>,
}

#[async_trait]
impl SearchProvider for MockSearch {
    async fn search(&self, term: &str, _limit: usize) -> Result<Vec<SearchHit>, ProviderError> {
        self.routes
            .get(term)
            .cloned()
            .ok_or_else(|| ProviderError::Connection("no route".to_string()))
    }

    async fn track_details(&self, _platform_id: &str) -> Result<TrackDetails, ProviderError> {
        Ok(TrackDetails::default())
    }

    async fn download_url(
        &self,
        platform_id: &str,
        _quality: mixflow_server::pipeline::DownloadQuality,
    ) -> Result<String, ProviderError> {
        Ok(format!("https://cdn.test/{}", platform_id))
    }
}

pub struct MockAnalysis;

#[async_trait]
impl AudioAnalysisProvider for MockAnalysis {
    async fn analyze(&self, _platform_id: &str) -> Result<AudioAnalysis, ProviderError> {
        Ok(AudioAnalysis {
            bpm: Some(128.0),
            musical_key: Some("Am".to_string()),
            ..Default::default()
        })
    }
}

pub fn hit(id: &str, title: &str) -> SearchHit {
    SearchHit {
        platform_id: id.to_string(),
        title: title.to_string(),
        artist: "Test Artist".to_string(),
        duration_secs: Some(180),
        album: None,
    }
}

pub struct SpawnOptions {
    pub understanding_fails: bool,
    pub understanding_terms: Vec<&'static str>,
    pub search_routes: Vec<(&'static str, Vec<SearchHit>)>,
    pub with_analysis: bool,
    /// Applied to every plan so tests can trip limits in a handful of calls.
    pub rate_limit_override: Option<RateLimitConfig>,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self {
            understanding_fails: false,
            understanding_terms: vec!["default"],
            search_routes: vec![("default", vec![hit("T1", "Track One")])],
            with_analysis: false,
            rate_limit_override: None,
        }
    }
}

pub struct TestServer {
    pub base_url: String,
    pub user_store: Arc<SqliteUserStore>,
    pub track_store: Arc<SqliteTrackStore>,
    _temp_db_dir: TempDir,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn spawn() -> Self {
        Self::spawn_with(SpawnOptions::default()).await
    }

    pub async fn spawn_with(options: SpawnOptions) -> Self {
        let temp_db_dir = TempDir::new().expect("Failed to create temp dir");
        let user_store = Arc::new(
            SqliteUserStore::new(temp_db_dir.path().join("users.db"))
                .expect("Failed to open user store"),
        );
        let track_store = Arc::new(
            SqliteTrackStore::open(temp_db_dir.path().join("tracks.db"))
                .expect("Failed to open track store"),
        );

        let understanding = Arc::new(MockUnderstanding {
            fail: options.understanding_fails,
            terms: options.understanding_terms,
        });
        let search = Arc::new(MockSearch {
            routes: options
                .search_routes
                .into_iter()
                .map(|(term, hits)| (term.to_string(), hits))
                .collect(),
        });
        let analysis: Option<Arc<dyn AudioAnalysisProvider>> = if options.with_analysis {
            Some(Arc::new(MockAnalysis))
        } else {
            None
        };

        let pipeline = Arc::new(MusicPipeline::new(
            understanding,
            search,
            analysis,
            track_store.clone(),
        ));

        let mut rate_limiter = RateLimiter::new(Arc::new(MemoryCounterStore::new()));
        if let Some(config) = options.rate_limit_override {
            for plan in [
                Plan::Free,
                Plan::Starter,
                Plan::Pro,
                Plan::Scale,
                Plan::Enterprise,
            ] {
                rate_limiter = rate_limiter.with_override(plan, config);
            }
        }

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener.local_addr().expect("Failed to get address").port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let state = ServerState {
            config: ServerConfig {
                host: "127.0.0.1".to_string(),
                port,
                requests_logging_level: RequestsLoggingLevel::None,
            },
            start_time: Instant::now(),
            user_store: user_store.clone(),
            rate_limiter: Arc::new(rate_limiter),
            usage: Arc::new(UsageRecorder::new(user_store.clone())),
            pipeline,
            auth_cache: Arc::new(TtlCache::new(Duration::from_secs(300))),
        };

        let app = make_app(state);

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url,
            user_store,
            track_store,
            _temp_db_dir: temp_db_dir,
            _shutdown_tx: Some(shutdown_tx),
        };

        server.wait_for_ready().await;
        server
    }

    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }
            match client.get(format!("{}/", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

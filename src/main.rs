use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mixflow_server::cache::TtlCache;
use mixflow_server::config::{AppConfig, CliConfig, FileConfig};
use mixflow_server::pipeline::{
    AudioAnalysisProvider, HttpAnalysisProvider, HttpSearchProvider, MusicPipeline,
    OpenAiUnderstanding,
};
use mixflow_server::rate_limit::{RateLimiter, SqliteCounterStore};
use mixflow_server::server::http_layers::RequestsLoggingLevel;
use mixflow_server::server::{metrics, run_server, ServerConfig, ServerState};
use mixflow_server::track_store::SqliteTrackStore;
use mixflow_server::usage::UsageRecorder;
use mixflow_server::user::SqliteUserStore;

const AUTH_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    match path_buf.canonicalize() {
        Ok(path) => Ok(path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(path_buf),
        Err(e) => Err(format!("Error resolving path '{}': {}", s, e)),
    }
}

fn parse_dir(s: &str) -> Result<PathBuf, String> {
    let path = parse_path(s)?;
    if !path.exists() {
        return Err(format!("Directory does not exist: {}", s));
    }
    if !path.is_dir() {
        return Err(format!("Path is not a directory: {}", s));
    }
    Ok(path)
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory for database files (users.db, counters.db, tracks.db).
    #[clap(long, value_parser = parse_dir)]
    pub db_dir: Option<PathBuf>,

    /// The address to bind.
    #[clap(long)]
    pub host: Option<String>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3000)]
    pub port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Base URL of the OpenAI-compatible understanding provider.
    #[clap(long)]
    pub understanding_url: Option<String>,

    /// Model name for the understanding provider.
    #[clap(long)]
    pub understanding_model: Option<String>,

    /// Base URL of the music search platform.
    #[clap(long)]
    pub search_url: Option<String>,

    /// Base URL of the audio analysis service. Omit to disable analysis.
    #[clap(long)]
    pub analysis_url: Option<String>,
}

impl From<&CliArgs> for CliConfig {
    fn from(args: &CliArgs) -> Self {
        CliConfig {
            db_dir: args.db_dir.clone(),
            host: args.host.clone(),
            port: args.port,
            logging_level: args.logging_level.clone(),
            understanding_url: args.understanding_url.clone(),
            understanding_model: args.understanding_model.clone(),
            search_url: args.search_url.clone(),
            analysis_url: args.analysis_url.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };

    let cli_config: CliConfig = (&cli_args).into();
    let app_config = AppConfig::resolve(&cli_config, file_config)?;

    info!("Configuration loaded:");
    info!("  db_dir: {:?}", app_config.db_dir);
    info!("  port: {}", app_config.port);
    info!("  understanding: {}", app_config.understanding.url);
    info!("  search: {}", app_config.search.url);
    info!(
        "  analysis: {}",
        app_config
            .analysis
            .as_ref()
            .map(|a| a.url.as_str())
            .unwrap_or("disabled")
    );

    metrics::init_metrics();

    let user_store = Arc::new(SqliteUserStore::new(app_config.user_db_path())?);
    let counter_store = Arc::new(SqliteCounterStore::new(app_config.counters_db_path())?);
    let track_store = Arc::new(SqliteTrackStore::open(app_config.tracks_db_path())?);

    let understanding = Arc::new(OpenAiUnderstanding::new(
        app_config.understanding.url.clone(),
        app_config.understanding_model.clone(),
        app_config.understanding.api_key.clone(),
        Duration::from_secs(app_config.understanding.timeout_secs),
    )?);
    let search = Arc::new(HttpSearchProvider::new(
        app_config.search.url.clone(),
        app_config.search.api_key.clone(),
        Duration::from_secs(app_config.search.timeout_secs),
    )?);
    let analysis: Option<Arc<dyn AudioAnalysisProvider>> = match &app_config.analysis {
        Some(settings) => Some(Arc::new(HttpAnalysisProvider::new(
            settings.url.clone(),
            settings.api_key.clone(),
            Duration::from_secs(settings.timeout_secs),
        )?)),
        None => None,
    };

    let pipeline = Arc::new(MusicPipeline::new(
        understanding,
        search,
        analysis,
        track_store,
    ));

    let state = ServerState {
        config: ServerConfig {
            host: app_config.host.clone(),
            port: app_config.port,
            requests_logging_level: app_config.logging_level.clone(),
        },
        start_time: Instant::now(),
        user_store: user_store.clone(),
        rate_limiter: Arc::new(RateLimiter::new(counter_store)),
        usage: Arc::new(UsageRecorder::new(user_store)),
        pipeline,
        auth_cache: Arc::new(TtlCache::new(AUTH_CACHE_TTL)),
    };

    info!("Ready to serve at port {}!", app_config.port);

    tokio::select! {
        result = run_server(state) => {
            info!("HTTP server stopped: {:?}", result);
            result
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            Ok(())
        }
    }
}

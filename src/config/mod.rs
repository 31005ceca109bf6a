mod file_config;

pub use file_config::{FileConfig, ProviderFileConfig};

use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;

use crate::server::http_layers::RequestsLoggingLevel;

pub const UNDERSTANDING_KEY_ENV: &str = "MIXFLOW_UNDERSTANDING_API_KEY";
pub const SEARCH_KEY_ENV: &str = "MIXFLOW_SEARCH_API_KEY";
pub const ANALYSIS_KEY_ENV: &str = "MIXFLOW_ANALYSIS_API_KEY";

const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 30;

/// CLI arguments that participate in config resolution; mirrors the fields
/// a TOML file can override.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub host: Option<String>,
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub understanding_url: Option<String>,
    pub understanding_model: Option<String>,
    pub search_url: Option<String>,
    pub analysis_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub understanding: ProviderSettings,
    pub understanding_model: String,
    pub search: ProviderSettings,
    /// Absent means audio analysis is disabled.
    pub analysis: Option<ProviderSettings>,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML config.
    /// TOML values override CLI values where present; API keys fall back to
    /// environment variables so they never have to live in a file.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;
        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let host = file
            .host
            .or_else(|| cli.host.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string());
        let port = file.port.unwrap_or(cli.port);

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let understanding_file = file.understanding.unwrap_or_default();
        let understanding_url = understanding_file
            .url
            .or_else(|| cli.understanding_url.clone())
            .ok_or_else(|| anyhow::anyhow!("understanding provider URL must be configured"))?;
        let understanding_model = understanding_file
            .model
            .or_else(|| cli.understanding_model.clone())
            .unwrap_or_else(|| "gpt-4o-mini".to_string());
        let understanding = ProviderSettings {
            url: understanding_url,
            api_key: understanding_file
                .api_key
                .or_else(|| std::env::var(UNDERSTANDING_KEY_ENV).ok()),
            timeout_secs: understanding_file
                .timeout_secs
                .unwrap_or(DEFAULT_PROVIDER_TIMEOUT_SECS),
        };

        let search_file = file.search.unwrap_or_default();
        let search_url = search_file
            .url
            .or_else(|| cli.search_url.clone())
            .ok_or_else(|| anyhow::anyhow!("search provider URL must be configured"))?;
        let search = ProviderSettings {
            url: search_url,
            api_key: search_file
                .api_key
                .or_else(|| std::env::var(SEARCH_KEY_ENV).ok()),
            timeout_secs: search_file
                .timeout_secs
                .unwrap_or(DEFAULT_PROVIDER_TIMEOUT_SECS),
        };

        let analysis_file = file.analysis.unwrap_or_default();
        let analysis = analysis_file
            .url
            .or_else(|| cli.analysis_url.clone())
            .map(|url| ProviderSettings {
                url,
                api_key: analysis_file
                    .api_key
                    .or_else(|| std::env::var(ANALYSIS_KEY_ENV).ok()),
                timeout_secs: analysis_file
                    .timeout_secs
                    .unwrap_or(DEFAULT_PROVIDER_TIMEOUT_SECS),
            });

        Ok(Self {
            db_dir,
            host,
            port,
            logging_level,
            understanding,
            understanding_model,
            search,
            analysis,
        })
    }

    pub fn user_db_path(&self) -> PathBuf {
        self.db_dir.join("users.db")
    }

    pub fn counters_db_path(&self) -> PathBuf {
        self.db_dir.join("counters.db")
    }

    pub fn tracks_db_path(&self) -> PathBuf {
        self.db_dir.join("tracks.db")
    }
}

fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cli_with(db_dir: &TempDir) -> CliConfig {
        CliConfig {
            db_dir: Some(db_dir.path().to_path_buf()),
            port: 3000,
            understanding_url: Some("https://llm.example/v1".to_string()),
            search_url: Some("https://platform.example".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn resolve_cli_only() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::resolve(&cli_with(&dir), None).unwrap();

        assert_eq!(config.db_dir, dir.path());
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.understanding.url, "https://llm.example/v1");
        assert_eq!(config.understanding_model, "gpt-4o-mini");
        assert_eq!(config.search.timeout_secs, DEFAULT_PROVIDER_TIMEOUT_SECS);
        assert!(config.analysis.is_none());
    }

    #[test]
    fn toml_overrides_cli() {
        let dir = TempDir::new().unwrap();
        let file = FileConfig {
            port: Some(4000),
            logging_level: Some("headers".to_string()),
            understanding: Some(ProviderFileConfig {
                url: Some("https://other.example/v1".to_string()),
                model: Some("gpt-4o".to_string()),
                api_key: Some("sk-file".to_string()),
                timeout_secs: Some(10),
            }),
            analysis: Some(ProviderFileConfig {
                url: Some("https://analysis.example".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let config = AppConfig::resolve(&cli_with(&dir), Some(file)).unwrap();
        assert_eq!(config.port, 4000);
        assert_eq!(config.logging_level, RequestsLoggingLevel::Headers);
        assert_eq!(config.understanding.url, "https://other.example/v1");
        assert_eq!(config.understanding_model, "gpt-4o");
        assert_eq!(config.understanding.api_key.as_deref(), Some("sk-file"));
        assert_eq!(config.understanding.timeout_secs, 10);
        assert!(config.analysis.is_some());
    }

    #[test]
    fn missing_db_dir_is_an_error() {
        let result = AppConfig::resolve(&CliConfig::default(), None);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("db_dir must be specified"));
    }

    #[test]
    fn missing_search_url_is_an_error() {
        let dir = TempDir::new().unwrap();
        let mut cli = cli_with(&dir);
        cli.search_url = None;
        let result = AppConfig::resolve(&cli, None);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("search provider"));
    }

    #[test]
    fn db_path_helpers() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::resolve(&cli_with(&dir), None).unwrap();
        assert_eq!(config.user_db_path(), dir.path().join("users.db"));
        assert_eq!(config.counters_db_path(), dir.path().join("counters.db"));
        assert_eq!(config.tracks_db_path(), dir.path().join("tracks.db"));
    }
}

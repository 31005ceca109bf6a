use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// TOML file configuration. Every field optional; present values override
/// their CLI counterparts.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    pub db_dir: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub logging_level: Option<String>,
    pub understanding: Option<ProviderFileConfig>,
    pub search: Option<ProviderFileConfig>,
    pub analysis: Option<ProviderFileConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderFileConfig {
    pub url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl FileConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file {:?}", path.as_ref()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {:?}", path.as_ref()))
    }
}

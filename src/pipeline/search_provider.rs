//! HTTP client for the music search and retrieval platform.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use super::provider_error::ProviderError;

/// Quality tier requested for download links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadQuality {
    Standard,
    High,
}

impl Default for DownloadQuality {
    fn default() -> Self {
        DownloadQuality::Standard
    }
}

impl DownloadQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadQuality::Standard => "standard",
            DownloadQuality::High => "high",
        }
    }
}

/// A single result from the search platform. Sparse on purpose: detail
/// lookups fill in what search omits.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchHit {
    #[serde(rename = "id")]
    pub platform_id: String,
    pub title: String,
    pub artist: String,
    #[serde(rename = "durationSecs")]
    pub duration_secs: Option<u32>,
    pub album: Option<String>,
}

/// Per-track metadata from the platform's detail endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrackDetails {
    pub album: Option<String>,
    pub genre: Option<String>,
    pub year: Option<u32>,
    #[serde(rename = "artworkUrl")]
    pub artwork_url: Option<String>,
    #[serde(rename = "durationSecs")]
    pub duration_secs: Option<u32>,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, term: &str, limit: usize) -> Result<Vec<SearchHit>, ProviderError>;

    async fn track_details(&self, platform_id: &str) -> Result<TrackDetails, ProviderError>;

    async fn download_url(
        &self,
        platform_id: &str,
        quality: DownloadQuality,
    ) -> Result<String, ProviderError>;
}

pub struct HttpSearchProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpSearchProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ProviderError::from_reqwest)?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ProviderError> {
        let url = format!("{}{}", self.base_url, path);
        let mut req_builder = self.client.get(&url).query(query);
        if let Some(api_key) = &self.api_key {
            req_builder = req_builder.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = req_builder
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        response.json().await.map_err(|e| {
            ProviderError::InvalidResponse(format!("Failed to parse response: {}", e))
        })
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    results: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct DownloadResponse {
    url: String,
}

#[async_trait]
impl SearchProvider for HttpSearchProvider {
    async fn search(&self, term: &str, limit: usize) -> Result<Vec<SearchHit>, ProviderError> {
        debug!(term, limit, "Searching platform");
        let limit_str = limit.to_string();
        let response: SearchResponse = self
            .get_json("/search", &[("q", term), ("limit", &limit_str)])
            .await?;
        Ok(response.results)
    }

    async fn track_details(&self, platform_id: &str) -> Result<TrackDetails, ProviderError> {
        self.get_json(&format!("/tracks/{}", platform_id), &[])
            .await
    }

    async fn download_url(
        &self,
        platform_id: &str,
        quality: DownloadQuality,
    ) -> Result<String, ProviderError> {
        let response: DownloadResponse = self
            .get_json(
                &format!("/tracks/{}/download", platform_id),
                &[("quality", quality.as_str())],
            )
            .await?;
        Ok(response.url)
    }
}

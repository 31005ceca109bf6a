//! HTTP client for the audio analysis service.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::provider_error::ProviderError;

/// Acoustic features of one track. All fields optional: the service
/// reports what it could measure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioAnalysis {
    pub bpm: Option<f64>,
    pub musical_key: Option<String>,
    pub camelot_key: Option<String>,
    /// 0..1
    pub energy_level: Option<f64>,
    /// Integrated loudness, LUFS.
    pub loudness: Option<f64>,
    pub waveform_peaks: Option<Vec<f32>>,
}

#[async_trait]
pub trait AudioAnalysisProvider: Send + Sync {
    /// Analyze a track the platform can serve at the given id.
    async fn analyze(&self, platform_id: &str) -> Result<AudioAnalysis, ProviderError>;
}

pub struct HttpAnalysisProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpAnalysisProvider {
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
}

#[async_trait]
impl AudioAnalysisProvider for HttpAnalysisProvider {
    async fn analyze(&self, platform_id: &str) -> Result<AudioAnalysis, ProviderError> {
        let url = format!("{}/analyze", self.base_url);
        debug!(platform_id, "Requesting audio analysis");

        let mut req_builder = self
            .client
            .post(&url)
            .json(&json!({ "trackId": platform_id }));
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
            ProviderError::InvalidResponse(format!("Failed to parse analysis: {}", e))
        })
    }
}

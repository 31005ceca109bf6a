//! Query understanding via an OpenAI-compatible chat completions API.
//!
//! Works with OpenAI, OpenRouter, Together AI, vLLM, and any other service
//! implementing the same endpoint. The model is asked to reply with a single
//! JSON object describing the structured query.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::provider_error::ProviderError;
use super::{Intent, ProcessedQuery, QueryFilters, SortBy};

/// Structured understanding of a raw request, as produced by the model.
#[derive(Debug, Clone)]
pub struct Understanding {
    pub query: ProcessedQuery,
    /// The model's own confidence in its reading, 0..1. Logged, not scored.
    pub model_confidence: f64,
}

#[async_trait]
pub trait UnderstandingProvider: Send + Sync {
    async fn understand(
        &self,
        raw_request: &str,
        max_results: usize,
    ) -> Result<Understanding, ProviderError>;
}

const SYSTEM_PROMPT: &str = "You are a music request parser. Reply with exactly one JSON object, \
no prose, with fields: intent (\"search\"|\"analyze\"|\"discover\"), searchTerms (array of \
strings ordered by relevance), filters (object with optional bpmRange [min,max], keys, genres, \
moods as string arrays, energyRange [min,max], durationRange [minSec,maxSec]), sortBy \
(\"relevance\"|\"bpm\"|\"energy\"|\"duration\"), confidence (0..1).";

pub struct OpenAiUnderstanding {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiUnderstanding {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
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
            model: model.into(),
            api_key,
        })
    }
}

#[async_trait]
impl UnderstandingProvider for OpenAiUnderstanding {
    async fn understand(
        &self,
        raw_request: &str,
        max_results: usize,
    ) -> Result<Understanding, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: raw_request.to_string(),
                },
            ],
            temperature: 0.2,
        };

        debug!(model = %self.model, "Sending understanding request");

        let mut req_builder = self.client.post(&url).json(&request);
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

        let chat_response: ChatResponse = response.json().await.map_err(|e| {
            ProviderError::InvalidResponse(format!("Failed to parse completion: {}", e))
        })?;

        let content = chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::InvalidResponse("No choices in completion".to_string()))?;

        parse_understanding(&content, max_results)
    }
}

/// Decode the model's JSON reply into a ProcessedQuery.
///
/// Tolerant where it can afford to be (missing filters, unknown sort order)
/// and strict where it matters: no usable search terms is an invalid
/// response, because the caller would be left with nothing to search.
fn parse_understanding(content: &str, max_results: usize) -> Result<Understanding, ProviderError> {
    // Some models wrap JSON in code fences despite instructions.
    let trimmed = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let raw: RawUnderstanding = serde_json::from_str(trimmed)
        .map_err(|e| ProviderError::InvalidResponse(format!("Bad understanding JSON: {}", e)))?;

    let search_terms: Vec<String> = raw
        .search_terms
        .unwrap_or_default()
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    if search_terms.is_empty() {
        return Err(ProviderError::InvalidResponse(
            "Understanding produced no search terms".to_string(),
        ));
    }

    let intent = match raw.intent.as_deref() {
        Some("analyze") => Intent::Analyze,
        Some("discover") => Intent::Discover,
        _ => Intent::Search,
    };

    let sort_by = match raw.sort_by.as_deref() {
        Some("bpm") => SortBy::Bpm,
        Some("energy") => SortBy::Energy,
        Some("duration") => SortBy::Duration,
        _ => SortBy::Relevance,
    };

    let filters = raw.filters.unwrap_or_default();

    Ok(Understanding {
        query: ProcessedQuery {
            intent,
            search_terms,
            filters: QueryFilters {
                bpm_range: filters.bpm_range.and_then(pair),
                key_set: filters.keys.filter(|v| !v.is_empty()),
                genre_set: filters.genres.filter(|v| !v.is_empty()),
                mood_set: filters.moods.filter(|v| !v.is_empty()),
                energy_range: filters.energy_range.and_then(pair),
                duration_range: filters.duration_range.and_then(int_pair),
            },
            max_results,
            sort_by,
        },
        model_confidence: raw.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
    })
}

fn pair(v: Vec<f64>) -> Option<(f64, f64)> {
    match v.as_slice() {
        [lo, hi] if lo <= hi => Some((*lo, *hi)),
        _ => None,
    }
}

fn int_pair(v: Vec<f64>) -> Option<(u32, u32)> {
    pair(v).map(|(lo, hi)| (lo.max(0.0) as u32, hi.max(0.0) as u32))
}

// Wire types

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct RawUnderstanding {
    intent: Option<String>,
    #[serde(rename = "searchTerms")]
    search_terms: Option<Vec<String>>,
    filters: Option<RawFilters>,
    #[serde(rename = "sortBy")]
    sort_by: Option<String>,
    confidence: Option<f64>,
}

#[derive(Deserialize, Default)]
struct RawFilters {
    #[serde(rename = "bpmRange")]
    bpm_range: Option<Vec<f64>>,
    keys: Option<Vec<String>>,
    genres: Option<Vec<String>>,
    moods: Option<Vec<String>>,
    #[serde(rename = "energyRange")]
    energy_range: Option<Vec<f64>>,
    #[serde(rename = "durationRange")]
    duration_range: Option<Vec<f64>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_understanding() {
        let content = r#"{
            "intent": "search",
            "searchTerms": ["dark techno", "industrial techno"],
            "filters": {"bpmRange": [130, 140], "genres": ["techno"]},
            "sortBy": "bpm",
            "confidence": 0.9
        }"#;
        let u = parse_understanding(content, 10).unwrap();
        assert_eq!(u.query.search_terms, vec!["dark techno", "industrial techno"]);
        assert_eq!(u.query.filters.bpm_range, Some((130.0, 140.0)));
        assert_eq!(u.query.sort_by, SortBy::Bpm);
        assert_eq!(u.query.max_results, 10);
        assert!((u.model_confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn parses_fenced_json() {
        let content = "```json\n{\"searchTerms\": [\"lofi\"]}\n```";
        let u = parse_understanding(content, 5).unwrap();
        assert_eq!(u.query.search_terms, vec!["lofi"]);
        assert_eq!(u.query.intent, Intent::Search);
    }

    #[test]
    fn rejects_empty_search_terms() {
        let content = r#"{"searchTerms": ["", "  "]}"#;
        assert!(matches!(
            parse_understanding(content, 5),
            Err(ProviderError::InvalidResponse(_))
        ));
    }

    #[test]
    fn rejects_non_json() {
        assert!(parse_understanding("sure, here you go!", 5).is_err());
    }

    #[test]
    fn inverted_bpm_range_is_dropped() {
        let content = r#"{"searchTerms": ["x"], "filters": {"bpmRange": [140, 130]}}"#;
        let u = parse_understanding(content, 5).unwrap();
        assert_eq!(u.query.filters.bpm_range, None);
    }

    #[test]
    fn confidence_is_clamped() {
        let content = r#"{"searchTerms": ["x"], "confidence": 3.5}"#;
        let u = parse_understanding(content, 5).unwrap();
        assert_eq!(u.model_confidence, 1.0);
    }
}

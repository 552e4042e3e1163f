use std::time::Duration;

use serde::Serialize;

use crate::prompt::{PromptPair, FASHION_NEGATIVE_PROMPT};
use crate::view::View;

/// Default address of the companion prompt enrichment service.
pub const DEFAULT_ENRICHMENT_URL: &str = "http://127.0.0.1:8001";

const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Request body for `POST /generate-fashion-prompt` on the enrichment service.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichmentQuery<'a> {
    pub clothing_request: &'a str,
    pub gender: &'a str,
    pub skin_tone: &'a str,
    pub view: View,
    pub style_theme: Option<&'a str>,
    pub occasion: Option<&'a str>,
    pub seed: u64,
}

/// Result of asking the enrichment service for a prompt. Unavailability is an
/// ordinary value, not an error: callers fall back to the built-in prompts.
#[derive(Debug, Clone, PartialEq)]
pub enum EnrichmentOutcome {
    Enriched(PromptPair),
    Unavailable,
}

#[derive(Debug, Clone)]
pub struct EnrichmentClient {
    http: reqwest::Client,
    base_url: String,
}

impl EnrichmentClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Probes `GET /health` with a short timeout. Any transport error counts
    /// as unavailable.
    pub async fn is_available(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.http.get(&url).timeout(HEALTH_PROBE_TIMEOUT).send().await {
            Ok(response) => response.status().is_success(),
            Err(error) => {
                tracing::debug!(%error, "enrichment health probe failed");
                false
            }
        }
    }

    /// Asks the enrichment service for a view-specific prompt pair. Transport
    /// failures, non-success statuses and malformed bodies all collapse to
    /// [`EnrichmentOutcome::Unavailable`].
    pub async fn enhance(&self, query: &EnrichmentQuery<'_>) -> EnrichmentOutcome {
        let url = format!("{}/generate-fashion-prompt", self.base_url);
        let response = match self.http.post(&url).json(query).send().await {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(%error, "enrichment request failed");
                return EnrichmentOutcome::Unavailable;
            }
        };
        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "enrichment service rejected the request");
            return EnrichmentOutcome::Unavailable;
        }
        match response.text().await {
            Ok(body) => parse_enrichment_reply(&body),
            Err(error) => {
                tracing::warn!(%error, "failed to read enrichment response");
                EnrichmentOutcome::Unavailable
            }
        }
    }
}

/// Parses the enrichment service reply. The service reports soft failures as
/// `success: false`; those and structurally invalid bodies yield `Unavailable`.
fn parse_enrichment_reply(body: &str) -> EnrichmentOutcome {
    let reply: serde_json::Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(_) => return EnrichmentOutcome::Unavailable,
    };
    let success = reply
        .get("success")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false);
    let prompt = reply.get("prompt").and_then(serde_json::Value::as_str);
    match (success, prompt) {
        (true, Some(prompt)) if !prompt.trim().is_empty() => {
            let negative = reply
                .get("negative_prompt")
                .and_then(serde_json::Value::as_str)
                .unwrap_or(FASHION_NEGATIVE_PROMPT);
            EnrichmentOutcome::Enriched(PromptPair {
                positive: prompt.to_string(),
                negative: negative.to_string(),
            })
        }
        _ => EnrichmentOutcome::Unavailable,
    }
}

//! Gemini generateContent backend
//!
//! Uses a long-lived reqwest::Client for connection pooling.

use super::backend::TextBackend;
use crate::error::BackendError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Reusable Gemini client (connection-pooled)
pub struct GeminiBackend {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiBackend {
    pub fn new(api_key: String, model: String) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            api_key,
            model,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/{}:generateContent", self.base_url, self.model)
    }
}

#[async_trait]
impl TextBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn send(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Result<String, BackendError> {
        if self.api_key.trim().is_empty() {
            return Err(BackendError::NotConfigured("GEMINI_API_KEY not set".to_string()));
        }

        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: max_tokens,
            },
        };

        debug!(model = %self.model, "Calling Gemini API");

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!("Gemini API error response ({}): {}", status, error_text);
            return Err(BackendError::from_status(status.as_u16(), error_text));
        }

        let gemini_response: GeminiResponse = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(format!("Gemini parse error: {}", e)))?;

        extract_answer(gemini_response)
    }
}

fn extract_answer(response: GeminiResponse) -> Result<String, BackendError> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| BackendError::InvalidResponse("No candidates from Gemini API".to_string()))?;

    if candidate.finish_reason.as_deref() == Some("SAFETY") {
        return Err(BackendError::Rejected("Gemini blocked the response for safety".to_string()));
    }

    let answer: String = candidate
        .content
        .map(|c| c.parts.into_iter().map(|p| p.text).collect::<Vec<_>>().join(""))
        .unwrap_or_default();

    if answer.trim().is_empty() {
        return Err(BackendError::InvalidResponse("Empty response from Gemini".to_string()));
    }

    Ok(answer)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

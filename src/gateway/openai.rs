//! OpenAI chat-completions backend

use super::backend::TextBackend;
use crate::error::BackendError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiBackend {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiBackend {
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

    /// Point at an OpenAI-compatible server
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl TextBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    async fn send(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Result<String, BackendError> {
        if self.api_key.trim().is_empty() {
            return Err(BackendError::NotConfigured("OPENAI_API_KEY not set".to_string()));
        }

        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens,
            temperature,
        };

        debug!(model = %self.model, "Calling OpenAI chat completions");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!("OpenAI API error response ({}): {}", status, error_text);
            return Err(BackendError::from_status(status.as_u16(), error_text));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(format!("OpenAI parse error: {}", e)))?;

        extract_answer(body)
    }
}

fn extract_answer(body: ChatResponse) -> Result<String, BackendError> {
    body.choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| BackendError::InvalidResponse("No completion in OpenAI response".to_string()))
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

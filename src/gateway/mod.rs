//! Generation gateway
//!
//! Walks an ordered chain of backends: the primary gets `max_retries`
//! extra attempts for transient failures, each fallback gets one. When the
//! whole chain fails the answer is built from the context bundle instead,
//! so `generate` always resolves to `Success` or `Degraded`.

pub mod backend;
pub mod events;
pub mod fallback;
pub mod gemini;
pub mod openai;
pub mod rate_limit;

pub use backend::{MockBackend, MockReply, TextBackend};
pub use events::{EventLog, EventSink, GenerationEvent, GenerationEventKind, TracingSink};
pub use fallback::degraded_answer;
pub use gemini::GeminiBackend;
pub use openai::OpenAiBackend;
pub use rate_limit::OutboundRateLimiter;

use crate::config::{AppConfig, BackendKind, GatewayConfig, ProviderConfig};
use crate::error::BackendError;
use crate::models::GenerationResult;
use crate::prompt::PromptPayload;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

pub struct GenerationGateway {
    chain: Vec<Arc<dyn TextBackend>>,
    config: GatewayConfig,
    limiter: Option<Arc<OutboundRateLimiter>>,
    sink: Arc<dyn EventSink>,
}

impl GenerationGateway {
    pub fn new(primary: Arc<dyn TextBackend>, config: GatewayConfig) -> Self {
        Self {
            chain: vec![primary],
            config,
            limiter: None,
            sink: Arc::new(TracingSink),
        }
    }

    /// Append a backend tried after everything already in the chain
    pub fn with_fallback(mut self, backend: Arc<dyn TextBackend>) -> Self {
        self.chain.push(backend);
        self
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<OutboundRateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// OpenAI and Gemini in the configured order. The secondary is only
    /// chained when it has a key; the primary is always kept so a missing
    /// key surfaces as a failed attempt instead of silently skipping it.
    pub fn from_config(config: &AppConfig, limiter: Arc<OutboundRateLimiter>, sink: Arc<dyn EventSink>) -> Self {
        let (primary, secondary) = match config.primary {
            BackendKind::OpenAi => (openai_backend(&config.openai), gemini_backend(&config.gemini)),
            BackendKind::Gemini => (gemini_backend(&config.gemini), openai_backend(&config.openai)),
        };
        let secondary_configured = match config.primary {
            BackendKind::OpenAi => config.gemini.is_configured(),
            BackendKind::Gemini => config.openai.is_configured(),
        };

        let mut gateway = Self::new(primary, config.gateway.clone())
            .with_rate_limiter(limiter)
            .with_event_sink(sink);
        if secondary_configured {
            gateway = gateway.with_fallback(secondary);
        }
        gateway
    }

    pub fn backend_names(&self) -> Vec<&str> {
        self.chain.iter().map(|b| b.name()).collect()
    }

    pub async fn generate(&self, payload: &PromptPayload) -> GenerationResult {
        let request_id = Uuid::new_v4();
        let digest = events::prompt_digest(&payload.text);
        let started = Instant::now();
        let mut last_failure: Option<String> = None;

        let emit = |kind: GenerationEventKind| {
            self.sink.record(GenerationEvent::new(request_id, &digest, kind));
        };

        for (index, backend) in self.chain.iter().enumerate() {
            if index > 0 {
                emit(GenerationEventKind::FallingBack {
                    from: self.chain[index - 1].name().to_string(),
                    to: backend.name().to_string(),
                });
            }

            let max_attempts = if index == 0 { self.config.max_retries + 1 } else { 1 };

            for attempt in 1..=max_attempts {
                emit(GenerationEventKind::AttemptStarted {
                    backend: backend.name().to_string(),
                    attempt,
                });

                let attempt_started = Instant::now();
                match self.attempt(backend.as_ref(), payload).await {
                    Ok(text) => {
                        emit(GenerationEventKind::Succeeded {
                            backend: backend.name().to_string(),
                            attempt,
                            latency_ms: elapsed_ms(attempt_started),
                            total_latency_ms: elapsed_ms(started),
                        });
                        return GenerationResult::Success { text };
                    }
                    Err(error) => {
                        let will_retry = error.is_transient() && attempt < max_attempts;
                        emit(GenerationEventKind::AttemptFailed {
                            backend: backend.name().to_string(),
                            attempt,
                            latency_ms: elapsed_ms(attempt_started),
                            error: error.to_string(),
                            will_retry,
                        });
                        last_failure = Some(format!("{}: {}", backend.name(), error));

                        if !will_retry {
                            break;
                        }
                        let delay = self.retry_delay(attempt - 1);
                        debug!(backend = backend.name(), ?delay, "Retrying after backoff");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        let reason = last_failure.unwrap_or_else(|| "no backend attempted".to_string());
        emit(GenerationEventKind::Degraded {
            reason: reason.clone(),
            backends_tried: self.chain.len(),
            total_latency_ms: elapsed_ms(started),
        });

        GenerationResult::Degraded {
            text: degraded_answer(&payload.bundle),
            reason,
        }
    }

    async fn attempt(&self, backend: &dyn TextBackend, payload: &PromptPayload) -> Result<String, BackendError> {
        if let Some(limiter) = &self.limiter {
            limiter.try_acquire()?;
        }

        let call = backend.send(&payload.text, payload.max_tokens, payload.temperature);
        match tokio::time::timeout(self.config.request_timeout, call).await {
            Ok(Ok(text)) if text.trim().is_empty() => {
                Err(BackendError::InvalidResponse("empty completion".to_string()))
            }
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout),
        }
    }

    /// `base * 2^retry`, capped at `retry_max_delay`
    fn retry_delay(&self, retry: u32) -> Duration {
        let scale = 2f64.powi(retry.min(16) as i32);
        let seconds = self.config.retry_base_delay.as_secs_f64() * scale;
        Duration::from_secs_f64(seconds.min(self.config.retry_max_delay.as_secs_f64()))
    }
}

fn openai_backend(config: &ProviderConfig) -> Arc<dyn TextBackend> {
    let backend = OpenAiBackend::new(config.api_key.clone(), config.model.clone());
    let backend = match &config.base_url {
        Some(url) => backend.with_base_url(url.as_str()),
        None => backend,
    };
    Arc::new(backend)
}

fn gemini_backend(config: &ProviderConfig) -> Arc<dyn TextBackend> {
    let backend = GeminiBackend::new(config.api_key.clone(), config.model.clone());
    let backend = match &config.base_url {
        Some(url) => backend.with_base_url(url.as_str()),
        None => backend,
    };
    Arc::new(backend)
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

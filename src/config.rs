//! Environment-driven configuration
//!
//! Binaries call `dotenv::dotenv()` first, then `AppConfig::from_env()`.

use crate::error::AnalystError;
use crate::Result;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Which provider is tried first. The other one becomes the fallback when it has a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    OpenAi,
    Gemini,
}

impl FromStr for BackendKind {
    type Err = AnalystError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" | "gpt" => Ok(BackendKind::OpenAi),
            "gemini" | "google" => Ok(BackendKind::Gemini),
            other => Err(AnalystError::ConfigError(format!("unknown backend '{}'", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
}

impl ProviderConfig {
    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

/// Generation and fallback settings
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub max_tokens: u32,
    pub temperature: f32,
    /// Per-attempt deadline
    pub request_timeout: Duration,
    /// Extra attempts on the primary backend for transient failures
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_tokens: 2000,
            temperature: 0.3,
            request_timeout: Duration::from_secs(30),
            max_retries: 1,
            retry_base_delay: Duration::from_millis(250),
            retry_max_delay: Duration::from_secs(2),
        }
    }
}

/// Context and prompt sizing
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Most recent periods included for single-company and comparison queries
    pub context_periods: usize,
    /// Conversation turns included in a prompt
    pub history_turns: usize,
    /// Turns a session keeps in memory
    pub max_retained_turns: usize,
    /// Idle time after which the API forgets a session
    pub session_idle_ttl: Duration,
    /// Live API sessions kept before the least recently used is evicted
    pub max_sessions: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            context_periods: 4,
            history_turns: 3,
            max_retained_turns: 50,
            session_idle_ttl: Duration::from_secs(30 * 60),
            max_sessions: 1000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub primary: BackendKind,
    pub openai: ProviderConfig,
    pub gemini: ProviderConfig,
    pub gateway: GatewayConfig,
    pub pipeline: PipelineConfig,
    pub outbound_calls_per_minute: u32,
    pub database_url: Option<String>,
    pub api_port: u16,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let gateway_defaults = GatewayConfig::default();
        let pipeline_defaults = PipelineConfig::default();

        Ok(Self {
            primary: match non_empty("PRIMARY_BACKEND") {
                Some(value) => value.parse()?,
                None => BackendKind::OpenAi,
            },
            openai: ProviderConfig {
                api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
                model: non_empty("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o".to_string()),
                base_url: non_empty("OPENAI_BASE_URL"),
            },
            gemini: ProviderConfig {
                api_key: env::var("GEMINI_API_KEY").unwrap_or_default(),
                model: non_empty("GEMINI_MODEL").unwrap_or_else(|| "gemini-2.0-flash".to_string()),
                base_url: non_empty("GEMINI_BASE_URL"),
            },
            gateway: GatewayConfig {
                max_tokens: parse_or("LLM_MAX_TOKENS", gateway_defaults.max_tokens)?,
                temperature: parse_or("LLM_TEMPERATURE", gateway_defaults.temperature)?,
                request_timeout: Duration::from_secs(parse_or(
                    "LLM_TIMEOUT_SECS",
                    gateway_defaults.request_timeout.as_secs(),
                )?),
                max_retries: parse_or("LLM_MAX_RETRIES", gateway_defaults.max_retries)?,
                ..gateway_defaults
            },
            pipeline: PipelineConfig {
                context_periods: parse_or("CONTEXT_PERIODS", pipeline_defaults.context_periods)?,
                history_turns: parse_or("HISTORY_TURNS", pipeline_defaults.history_turns)?,
                session_idle_ttl: Duration::from_secs(parse_or(
                    "SESSION_IDLE_SECS",
                    pipeline_defaults.session_idle_ttl.as_secs(),
                )?),
                max_sessions: parse_or("MAX_SESSIONS", pipeline_defaults.max_sessions)?,
                ..pipeline_defaults
            },
            outbound_calls_per_minute: parse_or("OUTBOUND_CALLS_PER_MINUTE", 60)?,
            database_url: non_empty("POSTGRES_URL").or_else(|| non_empty("DATABASE_URL")),
            api_port: match non_empty("PORT").or_else(|| non_empty("API_PORT")) {
                Some(port) => port
                    .parse()
                    .map_err(|_| AnalystError::ConfigError(format!("invalid port '{}'", port)))?,
                None => 8080,
            },
        })
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match non_empty(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AnalystError::ConfigError(format!("{} has invalid value '{}'", key, raw))),
        None => Ok(default),
    }
}

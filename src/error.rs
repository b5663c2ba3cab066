//! Error types for the financial analyst pipeline

use thiserror::Error;

/// Result type alias for crate-level operations
pub type Result<T> = std::result::Result<T, AnalystError>;

#[derive(Error, Debug)]
pub enum AnalystError {

    // =============================
    // Outer Layer Errors
    // =============================

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),

    #[error("Pipeline error: {0}")]
    PipelineError(#[from] PipelineError),

    #[error("Server error: {0}")]
    ServerError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Failures of the read-only financial record store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Duplicate record for {company_id} {period} {metric}")]
    DuplicateRecord {
        company_id: String,
        period: String,
        metric: String,
    },

    #[error("Invalid stored data: {0}")]
    InvalidData(String),
}

/// Failures while selecting the records for a classified query
#[derive(Error, Debug)]
pub enum AssemblyError {
    #[error("Company '{0}' is not present in the record store")]
    UnknownCompany(String),

    #[error("No reporting period is shared by all of: {}", .0.join(", "))]
    NoOverlappingPeriods(Vec<String>),

    #[error("Record store unavailable: {0}")]
    Store(#[from] StoreError),
}

/// Failures of a single text-generation backend call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("request timed out")]
    Timeout,

    #[error("rate limited")]
    RateLimited,

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("backend not configured: {0}")]
    NotConfigured(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl BackendError {
    /// Timeouts, rate limits and 5xx-style outages are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BackendError::Timeout | BackendError::RateLimited | BackendError::Unavailable(_)
        )
    }

    /// Map a non-success HTTP status onto the backend taxonomy.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            408 | 504 => BackendError::Timeout,
            429 => BackendError::RateLimited,
            500..=599 => BackendError::Unavailable(format!("HTTP {}: {}", status, body)),
            _ => BackendError::Rejected(format!("HTTP {}: {}", status, body)),
        }
    }
}

/// The request URL is stripped so endpoints never reach events or logs.
impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        let e = e.without_url();
        if e.is_timeout() {
            BackendError::Timeout
        } else if e.is_connect() || e.is_request() {
            BackendError::Unavailable(e.to_string())
        } else if e.is_decode() {
            BackendError::InvalidResponse(e.to_string())
        } else if let Some(status) = e.status() {
            BackendError::from_status(status.as_u16(), e.to_string())
        } else {
            BackendError::Unavailable(e.to_string())
        }
    }
}

/// The only way a pipeline turn ends without a user-facing answer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Session {0} was closed before the answer was ready")]
    SessionClosed(uuid::Uuid),
}

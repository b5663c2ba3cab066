//! REST API server for the financial analyst
//!
//! Exposes the pipeline over HTTP for the chat frontend

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::gateway::{EventLog, OutboundRateLimiter};
use crate::pipeline::Pipeline;
use crate::session::SessionRegistry;
use crate::Result;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub session_id: Option<String>,
    pub message: String,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub pipeline: Arc<Pipeline>,
    pub sessions: Arc<SessionRegistry>,
    pub events: Arc<EventLog>,
    pub limiter: Arc<OutboundRateLimiter>,
}

/// =============================
/// Helpers
/// =============================

fn stable_uuid_from_string(input: &str) -> uuid::Uuid {
    use sha2::{Digest, Sha256};

    let hash = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);

    // Set UUID version (4) and variant (RFC4122) bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    uuid::Uuid::from_bytes(bytes)
}

/// Clients may send any string as a session id; non-UUIDs map to a stable UUID
fn parse_session_id(value: Option<&str>) -> Option<uuid::Uuid> {
    match value {
        Some(v) if !v.trim().is_empty() => {
            Some(uuid::Uuid::parse_str(v.trim()).unwrap_or_else(|_| stable_uuid_from_string(v.trim())))
        }
        _ => None,
    }
}

/// =============================
/// Health & Reference Endpoints
/// =============================

async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "backends": state.pipeline.gateway().backend_names(),
        "sessions": state.sessions.len().await,
        "outbound_calls": state.limiter.issued(),
        "outbound_denied": state.limiter.denied(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn list_companies(State(state): State<ApiState>) -> (StatusCode, Json<ApiResponse>) {
    match state.pipeline.companies().await {
        Ok(companies) => (StatusCode::OK, Json(ApiResponse::success(companies))),
        Err(e) => {
            warn!("Company listing failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse::error("Financial data is unavailable".into())),
            )
        }
    }
}

async fn recent_events(State(state): State<ApiState>) -> Json<ApiResponse> {
    Json(ApiResponse::success(state.events.snapshot()))
}

/// =============================
/// Chat Endpoint
/// =============================

async fn chat_handler(
    State(state): State<ApiState>,
    Json(req): Json<ChatRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    if req.message.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("Message must not be empty".into())),
        );
    }

    let session = state
        .sessions
        .get_or_open(parse_session_id(req.session_id.as_deref()))
        .await;
    info!(session_id = %session.id(), "Chat message received");

    match state.pipeline.answer(&session, &req.message).await {
        Ok(response) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "answer": response.text,
                "mode": response.mode,
                "limited": response.is_degraded(),
                "session_id": session.id().to_string(),
            }))),
        ),
        Err(e @ PipelineError::SessionClosed(_)) => {
            (StatusCode::CONFLICT, Json(ApiResponse::error(e.to_string())))
        }
    }
}

async fn close_session(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    let Some(id) = parse_session_id(Some(&session_id)) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("Session id must not be empty".into())),
        );
    };

    if state.sessions.close(id).await {
        (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({ "session_id": id.to_string() }))),
        )
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("Session {} not found", id))),
        )
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/companies", get(list_companies))
        .route("/api/events", get(recent_events))
        .route("/api/chat", post(chat_handler))
        .route("/api/sessions/:session_id", delete(close_session))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(state: ApiState, port: u16) -> Result<()> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

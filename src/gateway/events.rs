//! Generation events
//!
//! Every attempt, retry, fallback and degraded outcome is observable.
//! Events carry a digest of the prompt rather than the prompt itself.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GenerationEventKind {
    AttemptStarted {
        backend: String,
        attempt: u32,
    },
    AttemptFailed {
        backend: String,
        attempt: u32,
        latency_ms: u64,
        error: String,
        will_retry: bool,
    },
    FallingBack {
        from: String,
        to: String,
    },
    Succeeded {
        backend: String,
        attempt: u32,
        latency_ms: u64,
        total_latency_ms: u64,
    },
    Degraded {
        reason: String,
        backends_tried: usize,
        total_latency_ms: u64,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationEvent {
    pub event_id: Uuid,
    pub request_id: Uuid,
    pub at: DateTime<Utc>,
    pub prompt_digest: String,
    #[serde(flatten)]
    pub kind: GenerationEventKind,
}

impl GenerationEvent {
    pub fn new(request_id: Uuid, prompt_digest: &str, kind: GenerationEventKind) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            request_id,
            at: Utc::now(),
            prompt_digest: prompt_digest.to_string(),
            kind,
        }
    }
}

pub trait EventSink: Send + Sync {
    fn record(&self, event: GenerationEvent);
}

/// Log-only sink
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: GenerationEvent) {
        log_event(&event);
    }
}

/// Bounded in-memory event history, newest last
pub struct EventLog {
    events: Mutex<VecDeque<GenerationEvent>>,
    capacity: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    pub fn snapshot(&self) -> Vec<GenerationEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(500)
    }
}

impl EventSink for EventLog {
    fn record(&self, event: GenerationEvent) {
        log_event(&event);
        let mut events = self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }
}

fn log_event(event: &GenerationEvent) {
    let digest = event.prompt_digest.as_str();
    match &event.kind {
        GenerationEventKind::AttemptStarted { backend, attempt } => {
            info!(request_id = %event.request_id, digest, backend, attempt, "Generation attempt started");
        }
        GenerationEventKind::AttemptFailed {
            backend,
            attempt,
            latency_ms,
            error,
            will_retry,
        } => {
            warn!(
                request_id = %event.request_id,
                digest, backend, attempt, latency_ms, will_retry,
                "Generation attempt failed: {}", error
            );
        }
        GenerationEventKind::FallingBack { from, to } => {
            warn!(request_id = %event.request_id, digest, from, to, "Falling back to next backend");
        }
        GenerationEventKind::Succeeded {
            backend,
            attempt,
            latency_ms,
            total_latency_ms,
        } => {
            info!(
                request_id = %event.request_id,
                digest, backend, attempt, latency_ms, total_latency_ms,
                "Generation succeeded"
            );
        }
        GenerationEventKind::Degraded {
            reason,
            backends_tried,
            total_latency_ms,
        } => {
            warn!(
                request_id = %event.request_id,
                digest, backends_tried, total_latency_ms,
                "Every backend failed, answering in limited mode: {}", reason
            );
        }
    }
}

/// SHA256 of the prompt text, hex encoded
pub fn prompt_digest(prompt: &str) -> String {
    hex::encode(Sha256::digest(prompt.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_stable() {
        let a = prompt_digest("Compare Shell and BP");
        assert_eq!(a, prompt_digest("Compare Shell and BP"));
        assert_ne!(a, prompt_digest("Compare Shell and Chevron"));
        assert_eq!(a.len(), 64);
        assert_eq!(
            prompt_digest(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_event_log_is_bounded() {
        let log = EventLog::new(2);
        let request = Uuid::new_v4();
        for attempt in 1..=3 {
            log.record(GenerationEvent::new(
                request,
                "d",
                GenerationEventKind::AttemptStarted {
                    backend: "mock".into(),
                    attempt,
                },
            ));
        }

        let events = log.snapshot();
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0].kind,
            GenerationEventKind::AttemptStarted {
                backend: "mock".into(),
                attempt: 2
            }
        );
    }

    #[test]
    fn test_event_serializes_flat() {
        let event = GenerationEvent::new(
            Uuid::nil(),
            "abc",
            GenerationEventKind::FallingBack {
                from: "openai".into(),
                to: "gemini".into(),
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "falling_back");
        assert_eq!(json["to"], "gemini");
        assert_eq!(json["prompt_digest"], "abc");
    }
}

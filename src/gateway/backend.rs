//! Text-generation backend capability
//!
//! Every provider (OpenAI, Gemini, the scripted mock) is reached through
//! this one trait; the gateway never branches on which provider it holds.

use crate::error::BackendError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[async_trait]
pub trait TextBackend: Send + Sync {
    /// Short identifier used in logs and events
    fn name(&self) -> &str;

    async fn send(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Result<String, BackendError>;
}

/// One scripted outcome for `MockBackend`
#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    /// Return the prompt unchanged
    Echo,
    Fail(BackendError),
    /// Sleep this long before answering, to trip the gateway timeout
    Stall(Duration),
}

/// Mock backend for development & testing.
/// Plays scripted replies in order, then repeats the fallback reply.
pub struct MockBackend {
    name: String,
    script: Mutex<VecDeque<MockReply>>,
    fallback: MockReply,
    latency: Option<Duration>,
    calls: AtomicUsize,
}

impl MockBackend {
    pub fn new(name: impl Into<String>, fallback: MockReply) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            fallback,
            latency: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn replying(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(name, MockReply::Text(text.into()))
    }

    pub fn failing(name: impl Into<String>, error: BackendError) -> Self {
        Self::new(name, MockReply::Fail(error))
    }

    pub fn then(self, reply: MockReply) -> Self {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(reply);
        self
    }

    /// Wait this long before every reply
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_reply(&self) -> MockReply {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl TextBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, prompt: &str, _max_tokens: u32, _temperature: f32) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.next_reply();

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        match reply {
            MockReply::Text(text) => Ok(text),
            MockReply::Echo => Ok(prompt.to_string()),
            MockReply::Fail(error) => Err(error),
            MockReply::Stall(duration) => {
                tokio::time::sleep(duration).await;
                Ok("late reply".to_string())
            }
        }
    }
}

//! Turns a generation result into what the user sees

use crate::models::{GenerationResult, ResponseMode, UserResponse};
use tracing::error;

pub const APOLOGY: &str =
    "I'm sorry, I couldn't put together an answer to that just now. Please try again in a moment.";

pub struct ResponseFormatter;

impl ResponseFormatter {
    pub fn format(result: GenerationResult) -> UserResponse {
        match result {
            GenerationResult::Success { text } => {
                let text = normalize(&text);
                if text.is_empty() {
                    error!("Generated answer was blank after normalization");
                    return Self::apology();
                }
                UserResponse {
                    text,
                    mode: ResponseMode::Generated,
                }
            }
            GenerationResult::Degraded { text, .. } => UserResponse {
                text,
                mode: ResponseMode::Limited,
            },
            GenerationResult::ProviderError { reason } => {
                error!(reason = %reason, "Provider error reached the formatter");
                Self::apology()
            }
        }
    }

    pub fn clarification(text: impl Into<String>) -> UserResponse {
        UserResponse {
            text: text.into(),
            mode: ResponseMode::Clarification,
        }
    }

    pub fn apology() -> UserResponse {
        UserResponse {
            text: APOLOGY.to_string(),
            mode: ResponseMode::Apology,
        }
    }
}

/// Trim lines, drop trailing spaces and collapse runs of blank lines
fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;

    for line in text.trim().lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }

    out.truncate(out.trim_end().len());
    out
}

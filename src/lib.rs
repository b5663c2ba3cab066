//! Petro Analyst
//!
//! Answers natural-language questions about oil & gas company financials:
//! - Classifies the question (single company, comparison, trend, unsupported)
//! - Pulls only the stored figures that answer it
//! - Derives graded ratios (margin, cash conversion, leverage, revenue per BOE)
//! - Builds an intent-specific prompt with units and recent conversation
//! - Generates through a fallback chain of language-model backends
//! - Falls back to a stored-figures answer when every backend is down
//!
//! QUERY FLOW:
//! CLASSIFY → ASSEMBLE → PROMPT → GENERATE → FORMAT

pub mod analysis;
pub mod api;
pub mod classifier;
pub mod config;
pub mod context;
pub mod error;
pub mod formatter;
pub mod gateway;
pub mod models;
pub mod pipeline;
pub mod prompt;
pub mod session;
pub mod store;

pub use error::Result;

// Re-export common types
pub use classifier::QueryClassifier;
pub use config::AppConfig;
pub use models::*;
pub use pipeline::Pipeline;
pub use session::{Session, SessionRegistry};

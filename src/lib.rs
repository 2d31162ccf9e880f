//! DialogForge - Resumable Function-Calling Dataset Pipeline
//!
//! Generates synthetic training conversations for a function-calling
//! model in two phases: quota-balanced, deduplicated question sampling
//! across a tool catalog, then completion of each question into a full
//! call/observation/reply exchange against the live tools. Progress is
//! persisted atomically after every batch, so interrupted runs resume
//! without duplicating or losing accepted work.

pub mod catalog;
pub mod client;
pub mod config;
pub mod dataset;
pub mod error;
pub mod pipeline;
pub mod state;

// Re-export key types
pub use catalog::{default_catalog, Catalog, ToolSpec};
pub use client::{ChatClient, RetryPolicy, TextGenerator, ToolInvoker, ToolServiceClient};
pub use config::Config;
pub use dataset::{ConversationRecord, QuestionDataset, Role, Turn};
pub use error::{ApiError, Error, Result, SkipReason, ToolError};
pub use pipeline::completion::CompletionController;
pub use pipeline::generation::GenerationController;
pub use pipeline::RunPhase;
pub use state::{QuestionRecord, RunState};

/// Initialize tracing for the library.
pub fn setup_logging(level: Option<String>) {
    let filter = level.unwrap_or_else(|| "info".to_string());
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

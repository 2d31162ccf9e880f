//! Pipeline configuration
//!
//! Loaded from a JSON config file; every field has a default so a missing
//! file still yields a runnable configuration (minus the API key, which
//! `validate` insists on).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// Environment variable consulted when no API key is configured.
pub const API_KEY_ENV: &str = "DIALOGFORGE_API_KEY";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            api_key: String::new(),
            base_url: "https://api.deepseek.com".to_string(),
            model: "deepseek-chat".to_string(),
            timeout_secs: 120,
            temperature: 0.7,
            max_tokens: 4096,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Global target: total accepted questions across the whole catalog.
    pub total_questions: u64,
    pub batch_size: u64,
    pub output_file: String,
    pub state_file: String,
    /// Pause between batches, bounding the external request rate.
    pub batch_delay_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        GenerationConfig {
            total_questions: 6000,
            batch_size: 50,
            output_file: "question_dataset.json".to_string(),
            state_file: "generation_state.json".to_string(),
            batch_delay_secs: 2,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    pub question_file: String,
    pub output_file: String,
    pub state_file: String,
    pub batch_size: usize,
    pub batch_delay_secs: u64,
    /// Tool routed to when inference finds no confident match.
    /// `None` skips the item instead.
    pub fallback_tool: Option<String>,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        CompletionConfig {
            question_file: "question_dataset.json".to_string(),
            output_file: "completed_dataset.json".to_string(),
            state_file: "completion_state.json".to_string(),
            batch_size: 10,
            batch_delay_secs: 3,
            fallback_tool: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_secs: u64,
    /// Exponential backoff when true, fixed-interval otherwise.
    pub exponential: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 3,
            base_delay_secs: 5,
            exponential: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolServiceConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for ToolServiceConfig {
    fn default() -> Self {
        ToolServiceConfig {
            base_url: "https://mcp.merlinchain.io".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Root configuration for both pipeline phases.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub generation: GenerationConfig,
    pub completion: CompletionConfig,
    pub retry: RetryConfig,
    pub tool_service: ToolServiceConfig,
}

impl Config {
    /// Loads the config file, falling back to defaults when it is absent.
    /// A file that exists but fails to parse is a fatal configuration
    /// error, not a silent fallback.
    pub fn load(path: &Path) -> Result<Config> {
        if !path.exists() {
            warn!("config file {} not found, using defaults", path.display());
            return Ok(Config::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        info!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Resolves the API key: configured value first, then the environment.
    pub fn api_key(&self) -> Option<String> {
        if !self.api.api_key.is_empty() {
            return Some(self.api.api_key.clone());
        }
        std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty())
    }

    pub fn set_api_key(&mut self, key: String) {
        self.api.api_key = key;
    }

    /// Rejects configurations that would fail mid-run.
    pub fn validate(&self) -> Result<()> {
        if self.api_key().is_none() {
            return Err(Error::Config(format!(
                "no API key configured (set api.api_key or {})",
                API_KEY_ENV
            )));
        }
        if self.generation.total_questions == 0 {
            return Err(Error::Config("generation.total_questions must be > 0".into()));
        }
        if self.generation.batch_size == 0 {
            return Err(Error::Config("generation.batch_size must be > 0".into()));
        }
        if self.completion.batch_size == 0 {
            return Err(Error::Config("completion.batch_size must be > 0".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be > 0".into()));
        }
        Ok(())
    }
}

//! Generative text API client
//!
//! Speaks the OpenAI-compatible chat-completions protocol. The pipeline
//! only depends on the [`TextGenerator`] trait: one prompt pair in, one
//! text completion out, errors classified retryable or fatal.

use crate::config::ApiConfig;
use crate::error::{ApiError, Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// The single seam the pipeline has on the generative API.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> std::result::Result<String, ApiError>;
}

/// Typed view of the completion response, so downstream code never pokes
/// at loose JSON shapes.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

pub struct ChatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
    timeout: Duration,
}

impl ChatClient {
    pub fn new(config: &ApiConfig, api_key: String) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| Error::Config(format!("failed to build http client: {}", e)))?;
        Ok(ChatClient {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout,
        })
    }
}

fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[async_trait]
impl TextGenerator for ChatClient {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> std::result::Result<String, ApiError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_prompt },
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ApiError::Timeout(self.timeout)
                } else {
                    ApiError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            let detail = response.text().await.unwrap_or_default();
            return Err(ApiError::Auth(truncate(&detail, 200).to_string()));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ApiError::RateLimited);
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ApiError::Transport(format!(
                "status {}: {}",
                status,
                truncate(&detail, 200)
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ApiError::Malformed(e.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ApiError::Malformed("response carries no completion text".into()))?;

        debug!("completion received, {} chars", content.len());
        Ok(content)
    }
}

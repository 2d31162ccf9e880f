//! Tool-invocation service client
//!
//! JSON-RPC client for the external tool service. A GET on the SSE
//! endpoint yields a per-session message endpoint; `tools/list` and
//! `tools/call` are POSTed there. Expired sessions are detected and the
//! handshake is redone a bounded number of times before giving up.

use crate::catalog::ToolSpec;
use crate::config::ToolServiceConfig;
use crate::error::{Error, Result, ToolError};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Reconnect attempts after a session-expiry response.
const MAX_RECONNECTS: u32 = 2;

/// The seam the completion phase has on the tool service.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn list_tools(&self) -> std::result::Result<Vec<ToolSpec>, ToolError>;
    async fn invoke(
        &self,
        tool_id: &str,
        arguments: &Value,
    ) -> std::result::Result<Value, ToolError>;
}

#[derive(Default)]
struct Session {
    endpoint: Option<String>,
    known_tools: Vec<String>,
}

pub struct ToolServiceClient {
    client: reqwest::Client,
    base_url: String,
    session: Mutex<Session>,
}

/// Scans an SSE buffer for the session endpoint event.
fn parse_session_endpoint(buffer: &str) -> Option<&str> {
    for line in buffer.lines() {
        if let Some(path) = line.strip_prefix("data: ") {
            let path = path.trim();
            if !path.is_empty() {
                return Some(path);
            }
        }
    }
    None
}

/// Service tool names may carry a routing prefix (`xxx__yyy__name`);
/// the catalog uses the bare name.
fn bare_tool_name(name: &str) -> &str {
    name.rsplit("__").next().unwrap_or(name)
}

/// Typed extraction of the `tools/list` result.
fn parse_tool_list(result: &Value) -> std::result::Result<Vec<ToolSpec>, ToolError> {
    let tools = result
        .get("tools")
        .and_then(Value::as_array)
        .ok_or_else(|| ToolError::Transport("tools/list result carries no tools".into()))?;

    let mut specs = Vec::with_capacity(tools.len());
    for tool in tools {
        let name = tool.get("name").and_then(Value::as_str).unwrap_or("");
        if name.is_empty() {
            continue;
        }
        let description = tool
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let parameters = tool
            .get("inputSchema")
            .cloned()
            .unwrap_or_else(|| json!({ "type": "object", "properties": {} }));
        specs.push(ToolSpec {
            id: bare_tool_name(name).to_string(),
            description,
            parameters,
            weight: 1,
        });
    }
    Ok(specs)
}

fn looks_like_session_error(detail: &str) -> bool {
    let lower = detail.to_lowercase();
    ["session", "expired", "invalid", "unauthorized"]
        .iter()
        .any(|kw| lower.contains(kw))
}

impl ToolServiceClient {
    pub fn new(config: &ToolServiceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| Error::Config(format!("failed to build http client: {}", e)))?;
        Ok(ToolServiceClient {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            session: Mutex::new(Session::default()),
        })
    }

    /// Performs the SSE handshake and stores the session endpoint.
    pub async fn connect(&self) -> std::result::Result<(), ToolError> {
        let sse_url = format!("{}/sse", self.base_url);
        let mut response = self
            .client
            .get(&sse_url)
            .header("Accept", "text/event-stream")
            .header("Cache-Control", "no-cache")
            .send()
            .await
            .map_err(|e| ToolError::Transport(format!("sse connect failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ToolError::Transport(format!(
                "sse connect returned status {}",
                response.status()
            )));
        }

        let mut buffer = String::new();
        let endpoint = loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    buffer.push_str(&String::from_utf8_lossy(&chunk));
                    if let Some(path) = parse_session_endpoint(&buffer) {
                        break format!("{}{}", self.base_url, path);
                    }
                }
                Ok(None) => {
                    return Err(ToolError::Transport(
                        "sse stream ended before the session endpoint arrived".into(),
                    ))
                }
                Err(e) => return Err(ToolError::Transport(format!("sse read failed: {}", e))),
            }
        };

        info!("tool service session endpoint: {}", endpoint);
        self.session.lock().await.endpoint = Some(endpoint);
        Ok(())
    }

    /// Drops the session. Safe to call on every exit path.
    pub async fn disconnect(&self) {
        let mut session = self.session.lock().await;
        if session.endpoint.take().is_some() {
            info!("tool service session closed");
        }
        session.known_tools.clear();
    }

    async fn ensure_connected(&self) -> std::result::Result<String, ToolError> {
        if let Some(endpoint) = self.session.lock().await.endpoint.clone() {
            return Ok(endpoint);
        }
        self.connect().await?;
        self.session
            .lock()
            .await
            .endpoint
            .clone()
            .ok_or(ToolError::NotConnected)
    }

    /// One JSON-RPC round trip. Session-expiry responses surface as
    /// [`ToolError::SessionExpired`] so the caller can redo the handshake.
    async fn rpc(&self, id: u32, method: &str, params: Value) -> std::result::Result<Value, ToolError> {
        let endpoint = self.ensure_connected().await?;
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| ToolError::Transport(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ToolError::SessionExpired);
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ToolError::Transport(format!("unparseable rpc response: {}", e)))?;

        if let Some(error) = body.get("error") {
            let detail = error.to_string();
            if looks_like_session_error(&detail) {
                return Err(ToolError::SessionExpired);
            }
            return Err(ToolError::Invocation(detail));
        }
        if !status.is_success() {
            return Err(ToolError::Transport(format!("rpc returned status {}", status)));
        }
        body.get("result")
            .cloned()
            .ok_or_else(|| ToolError::Transport("rpc response carries no result".into()))
    }

    /// Runs an rpc, redoing the handshake on session expiry up to
    /// [`MAX_RECONNECTS`] times.
    async fn rpc_with_reconnect(
        &self,
        id: u32,
        method: &str,
        params: Value,
    ) -> std::result::Result<Value, ToolError> {
        let mut attempt = 0;
        loop {
            match self.rpc(id, method, params.clone()).await {
                Err(ToolError::SessionExpired) if attempt < MAX_RECONNECTS => {
                    attempt += 1;
                    warn!(
                        "tool service session expired, reconnecting ({}/{})",
                        attempt, MAX_RECONNECTS
                    );
                    self.disconnect().await;
                    self.connect().await?;
                }
                other => return other,
            }
        }
    }
}

#[async_trait]
impl ToolInvoker for ToolServiceClient {
    async fn list_tools(&self) -> std::result::Result<Vec<ToolSpec>, ToolError> {
        let result = self.rpc_with_reconnect(1, "tools/list", json!({})).await?;
        let specs = parse_tool_list(&result)?;
        info!("tool service exposes {} tools", specs.len());
        self.session.lock().await.known_tools = specs.iter().map(|t| t.id.clone()).collect();
        Ok(specs)
    }

    async fn invoke(
        &self,
        tool_id: &str,
        arguments: &Value,
    ) -> std::result::Result<Value, ToolError> {
        {
            let session = self.session.lock().await;
            if !session.known_tools.is_empty()
                && !session.known_tools.iter().any(|t| t == tool_id)
            {
                return Err(ToolError::UnknownTool(tool_id.to_string()));
            }
        }
        self.rpc_with_reconnect(
            2,
            "tools/call",
            json!({ "name": tool_id, "arguments": arguments }),
        )
        .await
    }
}

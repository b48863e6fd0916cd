//! Ollama API client implementation
//!
//! Implements the LlmClient trait against a local Ollama server. Streaming
//! responses arrive as newline-delimited JSON objects on the response body.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::LmConfig;

use super::{LlmClient, LlmError, Message};

/// Ollama API client
pub struct OllamaClient {
    base_url: String,
    model: String,
    http: Client,
}

impl OllamaClient {
    /// Create a new client from configuration
    pub fn from_config(config: &LmConfig) -> Result<Self, LlmError> {
        debug!(base_url = %config.base_url, model = %config.model, "from_config: called");
        let timeout = Duration::from_millis(config.timeout_ms);
        let http = Client::builder().timeout(timeout).build().map_err(LlmError::Network)?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            http,
        })
    }

    /// Build the request body for the Ollama chat endpoint
    fn build_request_body(&self, messages: &[Message], stream: bool) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": messages
                .iter()
                .map(|m| serde_json::json!({ "role": m.role.as_str(), "content": m.content }))
                .collect::<Vec<_>>(),
            "stream": stream,
        })
    }

    /// Parse a single NDJSON line from a streaming response
    fn parse_chunk(line: &str) -> Result<OllamaChunk, LlmError> {
        let chunk: OllamaChunk = serde_json::from_str(line)?;
        if let Some(error) = chunk.error {
            return Err(LlmError::InvalidResponse(error));
        }
        Ok(chunk)
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn chat_messages(
        &self,
        messages: &[Message],
        token_tx: Option<mpsc::Sender<String>>,
        cancel: &CancellationToken,
    ) -> Result<String, LlmError> {
        debug!(model = %self.model, message_count = messages.len(), "chat_messages: called");
        let url = format!("{}/api/chat", self.base_url);
        let body = self.build_request_body(messages, true);

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            resp = self.http.post(&url).json(&body).send() => resp.map_err(LlmError::Network)?,
        };

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "chat_messages: API error");
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        let mut content = String::new();

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("chat_messages: cancelled mid-stream");
                    return Err(LlmError::Cancelled);
                }
                chunk = stream.next() => chunk,
            };

            let Some(chunk) = chunk else { break };
            buffer.extend_from_slice(&chunk.map_err(LlmError::Network)?);

            while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let parsed = Self::parse_chunk(line)?;
                if !parsed.message.content.is_empty() {
                    content.push_str(&parsed.message.content);
                    if let Some(tx) = &token_tx {
                        // Receiver gone means the caller stopped listening;
                        // keep accumulating so the return value stays complete.
                        let _ = tx.send(parsed.message.content).await;
                    }
                }
                if parsed.done {
                    debug!(content_len = content.len(), "chat_messages: stream complete");
                    return Ok(content);
                }
            }
        }

        debug!(content_len = content.len(), "chat_messages: stream ended without done marker");
        Ok(content)
    }

    async fn simple_chat(&self, system_prompt: &str, user_message: &str) -> Result<String, LlmError> {
        debug!(model = %self.model, "simple_chat: called");
        let url = format!("{}/api/chat", self.base_url);
        let messages = vec![Message::system(system_prompt), Message::user(user_message)];
        let body = self.build_request_body(&messages, false);

        let response = self.http.post(&url).json(&body).send().await.map_err(LlmError::Network)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: OllamaChunk = response.json().await.map_err(LlmError::Network)?;
        if let Some(error) = parsed.error {
            return Err(LlmError::InvalidResponse(error));
        }

        debug!(content_len = parsed.message.content.len(), "simple_chat: complete");
        Ok(parsed.message.content)
    }

    fn model(&self) -> String {
        self.model.clone()
    }
}

// Ollama API response types

#[derive(Debug, Deserialize)]
struct OllamaChunk {
    #[serde(default)]
    message: OllamaMessage,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    role: String,
    #[serde(default)]
    content: String,
}

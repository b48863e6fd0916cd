//! LM client trait
//!
//! Two entry points: `chat_messages` for the planning/synthesis path (full
//! message list, optional streaming token sink) and `simple_chat` for
//! one-shot system+user exchanges such as schema generation.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{LlmError, Message};

/// Interface for LM communication
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a message list and return the full response text.
    ///
    /// When `token_tx` is provided, response tokens are streamed through it
    /// in order as they arrive; the concatenation of all streamed tokens
    /// equals the returned text. Cancelling `cancel` aborts the call with
    /// [`LlmError::Cancelled`].
    async fn chat_messages(
        &self,
        messages: &[Message],
        token_tx: Option<mpsc::Sender<String>>,
        cancel: &CancellationToken,
    ) -> Result<String, LlmError>;

    /// One-shot system prompt + user message exchange, no streaming
    async fn simple_chat(&self, system_prompt: &str, user_message: &str) -> Result<String, LlmError>;

    /// Model identifier, for logging
    fn model(&self) -> String;
}

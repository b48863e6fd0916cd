//! LM client module
//!
//! Provides the abstract LM interface consumed by the pipeline and the
//! Ollama implementation used by the daemon.

use std::sync::Arc;

use tracing::debug;

mod client;
mod error;
mod ollama;
mod types;

pub use client::LlmClient;
pub use error::LlmError;
pub use ollama::OllamaClient;
pub use types::{Message, Role};

use crate::config::LmConfig;

/// Create an LM client based on the provider specified in config
pub fn create_client(config: &LmConfig) -> Result<Arc<dyn LlmClient>, LlmError> {
    debug!(provider = %config.provider, model = %config.model, "create_client: called");
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaClient::from_config(config)?)),
        other => Err(LlmError::InvalidResponse(format!(
            "Unknown LM provider: '{}'. Supported: ollama",
            other
        ))),
    }
}

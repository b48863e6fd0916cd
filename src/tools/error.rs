//! Tool error types

use thiserror::Error;

use crate::llm::LlmError;

/// Errors that can occur during tool execution
///
/// The command variants carry the merged stdout/stderr so failing or timed
/// out commands still surface whatever output they produced.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("command not in allowlist: {command} (allowed: {allowed})")]
    NotInAllowlist { command: String, allowed: String },

    #[error("command contains disallowed pattern: {pattern}")]
    DisallowedPattern { pattern: &'static str },

    #[error("command timed out after {timeout_secs}s; output so far:\n{output}")]
    Timeout { timeout_secs: u64, output: String },

    #[error("command failed with exit code {code}:\n{output}")]
    CommandFailed { code: i32, output: String },

    #[error("no help output available for {command}")]
    NoHelpOutput { command: String },

    #[error("language model call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

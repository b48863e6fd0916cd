//! Session protocol types
//!
//! JSON-over-newline frames on the daemon socket. Each frame is a single
//! line of JSON followed by `\n`.

use serde::{Deserialize, Serialize};

use crate::agent::EventRole;

/// Requests from the client to the daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientRequest {
    /// A user utterance to run through the pipeline
    Chat { message: String },

    /// Set the per-connection user hints
    SetContext { context: String },

    /// Liveness check
    Ping,
}

/// Response frames from the daemon to the client
///
/// `Done` terminates a successful chat; `Error` terminates a failed one.
/// Never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ResponseFrame {
    Text {
        role: FrameRole,
        content: String,
    },

    ToolCall {
        id: String,
        name: String,
        args: String,
    },

    ToolResult {
        id: String,
        name: String,
        output: String,
        success: bool,
    },

    ShellCommand {
        command: String,
        is_discovery: bool,
    },

    Pong {
        version: String,
    },

    Done,

    Error {
        message: String,
    },
}

/// Role attached to a text frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameRole {
    Assistant,
    System,
}

impl From<EventRole> for FrameRole {
    fn from(role: EventRole) -> Self {
        match role {
            EventRole::Assistant => FrameRole::Assistant,
            EventRole::System => FrameRole::System,
        }
    }
}

//! Events emitted by the pipeline
//!
//! The pipeline is a single producer; the session handler is the single
//! consumer. Events arrive in strict program order on a bounded channel.

use super::Plan;

/// Role attached to streamed text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventRole {
    Assistant,
    System,
}

/// A structured record of one observable pipeline step
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Streamed answer text
    Text { role: EventRole, chunk: String },

    /// A tool is about to be invoked
    ToolCall { id: String, name: String, args: String },

    /// A tool invocation finished
    ToolResult {
        id: String,
        name: String,
        output: String,
        success: bool,
    },

    /// A planning round produced a plan
    PlanGenerated { plan: Plan },

    /// A plan step is starting
    StepStarted { tool: String, args: String },

    /// A shell command is about to spawn
    ShellCommand { command: String, is_discovery: bool },
}

impl Event {
    /// Variant name, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Text { .. } => "Text",
            Event::ToolCall { .. } => "ToolCall",
            Event::ToolResult { .. } => "ToolResult",
            Event::PlanGenerated { .. } => "PlanGenerated",
            Event::StepStarted { .. } => "StepStarted",
            Event::ShellCommand { .. } => "ShellCommand",
        }
    }
}

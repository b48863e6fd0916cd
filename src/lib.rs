//! Errand - local agent daemon
//!
//! Errand turns a user utterance into a final natural-language answer by
//! iteratively consulting a language model and dispatching allowlisted
//! shell actions, streaming every intermediate event to the client.
//!
//! # Modules
//!
//! - [`agent`] - plan parsing, events, and the iterative pipeline
//! - [`tools`] - tool registry, shell execution, schema discovery
//! - [`llm`] - LM client trait and the Ollama implementation
//! - [`session`] - socket listener, wire protocol, per-connection handler
//! - [`prompts`] - embedded prompt templates and rendering
//! - [`steplog`] - per-request step records for debugging
//! - [`config`] - settings types and loading

pub mod agent;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod external;
pub mod llm;
pub mod prompts;
pub mod session;
pub mod steplog;
pub mod tools;

// Re-export commonly used types
pub use agent::{Event, EventRole, MAX_ITERATIONS, Pipeline, PipelineError, Plan, PlanStep, RunOptions, parse_plan};
pub use config::{LmConfig, Settings};
pub use external::{ExternalTool, load_external_tools};
pub use llm::{LlmClient, LlmError, Message, Role, create_client};
pub use prompts::PromptSet;
pub use session::{ClientRequest, ResponseFrame, SessionHandler};
pub use steplog::StepLogger;
pub use tools::{ListCommandsTool, SchemaCache, SchemaDiscoveryTool, ShellTool, Tool, ToolError, ToolRegistry};

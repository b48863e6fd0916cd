//! Tool system
//!
//! Tools are named, side-effectful capabilities exposed to the planner. The
//! registry owns them for the process lifetime; the pipeline dispatches them
//! by name with an argument map.

mod catalog;
mod discovery;
mod error;
mod registry;
mod schema_cache;
mod shell;
mod traits;

pub use catalog::ListCommandsTool;
pub use discovery::SchemaDiscoveryTool;
pub use error::ToolError;
pub use registry::ToolRegistry;
pub use schema_cache::{CachedSchema, SchemaCache, default_cache_dir};
pub use shell::{CommandObserver, SHELL_TIMEOUT, ShellTool};
pub use traits::{Tool, ToolArgs, ToolDefinition};

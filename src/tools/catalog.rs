//! Tool catalog tool
//!
//! Side-effect-free listing of everything the planner could run: the shell
//! allowlist, declared external tools, and commands with cached schemas.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::config::Settings;
use crate::external::ExternalTool;

use super::schema_cache::SchemaCache;
use super::traits::optional_str;
use super::{Tool, ToolArgs, ToolError};

/// Lists available commands by category
pub struct ListCommandsTool {
    settings: Arc<Settings>,
    external_tools: Vec<ExternalTool>,
    cache: Option<Arc<SchemaCache>>,
}

impl ListCommandsTool {
    pub fn new(settings: Arc<Settings>, external_tools: Vec<ExternalTool>, cache: Option<Arc<SchemaCache>>) -> Self {
        Self {
            settings,
            external_tools,
            cache,
        }
    }
}

#[async_trait]
impl Tool for ListCommandsTool {
    fn name(&self) -> &'static str {
        "list_available_commands"
    }

    fn description(&self) -> String {
        "Lists all available CLI commands that can be used.\n\
         Returns commands from the allowlist, external tools, and previously discovered commands.\n\
         Use this to find out what tools are available before attempting to use them.\n\
         After finding a command you want to use, call get_command_schema to learn its parameters."
            .to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "category": {
                    "type": "string",
                    "description": "Optional filter: 'allowlist', 'external', 'cached', or 'all' (default)",
                    "enum": ["all", "allowlist", "external", "cached"]
                }
            },
            "required": []
        })
    }

    async fn execute(&self, args: &ToolArgs) -> Result<String, ToolError> {
        let category = optional_str(args, "category").unwrap_or("all");

        let mut out = String::from("# Available Commands\n\n");

        if category == "all" || category == "allowlist" {
            out.push_str("## Shell Allowlist\nThese are pre-approved shell commands:\n");
            for cmd in &self.settings.tools.shell.allowlist {
                out.push_str(&format!("- `{cmd}`\n"));
            }
            out.push('\n');
        }

        if (category == "all" || category == "external") && !self.external_tools.is_empty() {
            out.push_str("## External Tools\nSpecialized tools with full documentation:\n");
            for ext in &self.external_tools {
                out.push_str(&format!("- `{}`: {}\n", ext.access.command, ext.description));
            }
            out.push('\n');
        }

        if category == "all" || category == "cached" {
            if let Some(cache) = &self.cache {
                let cached = cache.list();
                if !cached.is_empty() {
                    out.push_str("## Previously Discovered\nCommands with cached schemas (ready to use):\n");
                    for cmd in cached {
                        out.push_str(&format!("- `{cmd}`\n"));
                    }
                    out.push('\n');
                }
            }
        }

        out.push_str("---\nUse `get_command_schema` with a command name to learn its parameters.\n");
        Ok(out)
    }
}
